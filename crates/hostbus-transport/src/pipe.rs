use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{Result, TransportError};

/// Read end of an anonymous pipe.
#[derive(Debug)]
pub struct PipeReader {
    file: File,
}

/// Write end of an anonymous pipe.
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
}

/// Create an anonymous pipe.
///
/// Both ends are created close-on-exec. An end meant for a child process must
/// be made inheritable in the child only, see [`clear_cloexec`].
pub fn pipe_pair() -> Result<(PipeReader, PipeWriter)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];

    // SAFETY: `fds` is a valid writable array of two c_ints as pipe(2) requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Pipe(std::io::Error::last_os_error()));
    }

    // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by nobody else.
    let (read_fd, write_fd) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    set_cloexec(read_fd.as_raw_fd()).map_err(TransportError::Pipe)?;
    set_cloexec(write_fd.as_raw_fd()).map_err(TransportError::Pipe)?;

    debug!(
        read_fd = read_fd.as_raw_fd(),
        write_fd = write_fd.as_raw_fd(),
        "created pipe"
    );

    Ok((PipeReader::from(read_fd), PipeWriter::from(write_fd)))
}

fn set_cloexec(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; F_GETFD/F_SETFD touch no memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Clear `FD_CLOEXEC` so the descriptor survives `exec`.
///
/// Only calls `fcntl(2)`, so it is async-signal-safe and may be used from a
/// `pre_exec` hook between fork and exec.
pub fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl with F_GETFD/F_SETFD touches no memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> std::io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; F_GETFL/F_SETFL touch no memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, flags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl From<OwnedFd> for PipeReader {
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl From<OwnedFd> for PipeWriter {
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl PipeReader {
    /// Adopt an inherited descriptor number, e.g. one passed on a command line.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else in the process owns.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: upheld by the caller.
        Self::from(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Make reads return `WouldBlock` instead of waiting.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        set_nonblocking(self.as_raw_fd(), nonblocking).map_err(TransportError::Io)
    }
}

impl PipeWriter {
    /// Adopt an inherited descriptor number, e.g. one passed on a command line.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else in the process owns.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: upheld by the caller.
        Self::from(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Make writes return `WouldBlock` instead of waiting.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        set_nonblocking(self.as_raw_fd(), nonblocking).map_err(TransportError::Io)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Read for &PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.file).read(buf)
    }
}

impl Write for &PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&self.file).flush()
    }
}

impl AsFd for PipeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsFd for PipeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl IntoRawFd for PipeReader {
    fn into_raw_fd(self) -> RawFd {
        self.file.into_raw_fd()
    }
}

impl IntoRawFd for PipeWriter {
    fn into_raw_fd(self) -> RawFd {
        self.file.into_raw_fd()
    }
}
