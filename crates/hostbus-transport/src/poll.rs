use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::error::{Result, TransportError};

/// What a caller wants to wait for on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    Both,
}

impl Interest {
    fn events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
            Interest::Both => libc::POLLIN | libc::POLLOUT,
        }
    }
}

/// One descriptor in a [`poll_fds`] call, plus the readiness it reported.
#[derive(Debug, Clone, Copy)]
pub struct PollEntry {
    fd: RawFd,
    interest: Interest,
    revents: libc::c_short,
}

impl PollEntry {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            revents: 0,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Data (or EOF) can be read without blocking.
    pub fn readable(&self) -> bool {
        self.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
    }

    /// A write would not block.
    pub fn writable(&self) -> bool {
        self.revents & (libc::POLLOUT | libc::POLLERR) != 0
    }

    /// The peer hung up or the descriptor is in an error state.
    pub fn hangup(&self) -> bool {
        self.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
    }
}

/// Wait until at least one entry is ready or `timeout` elapses.
///
/// `None` waits indefinitely. Returns the number of ready entries; a signal
/// interruption is reported as zero ready entries.
pub fn poll_fds(entries: &mut [PollEntry], timeout: Option<Duration>) -> Result<usize> {
    let mut pollfds: Vec<libc::pollfd> = entries
        .iter()
        .map(|entry| libc::pollfd {
            fd: entry.fd,
            events: entry.interest.events(),
            revents: 0,
        })
        .collect();

    // SAFETY: `pollfds` is a valid, initialized array of `pollfds.len()` entries.
    let rc = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };

    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            entries.iter_mut().for_each(|entry| entry.revents = 0);
            return Ok(0);
        }
        return Err(TransportError::Poll(err));
    }

    for (entry, pollfd) in entries.iter_mut().zip(&pollfds) {
        entry.revents = pollfd.revents;
    }
    Ok(rc as usize)
}

/// Wait until `fd` has data (or EOF) to read. Returns `false` on timeout.
pub fn wait_readable(fd: &impl AsRawFd, timeout: Option<Duration>) -> Result<bool> {
    let mut entry = [PollEntry::new(fd.as_raw_fd(), Interest::Readable)];
    poll_fds(&mut entry, timeout)?;
    Ok(entry[0].readable())
}

/// Wait until a write to `fd` would not block. Returns `false` on timeout.
pub fn wait_writable(fd: &impl AsRawFd, timeout: Option<Duration>) -> Result<bool> {
    let mut entry = [PollEntry::new(fd.as_raw_fd(), Interest::Writable)];
    poll_fds(&mut entry, timeout)?;
    Ok(entry[0].writable())
}

fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if ms == 0 && !d.is_zero() {
                ms = 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Instant;

    use super::*;
    use crate::pipe::pipe_pair;

    #[test]
    fn readable_after_write() {
        let (reader, mut writer) = pipe_pair().expect("pipe should be created");
        writer.write_all(b"a").expect("write should succeed");

        let ready = wait_readable(&reader, Some(Duration::from_millis(100)))
            .expect("poll should succeed");
        assert!(ready);
    }

    #[test]
    fn times_out_when_idle() {
        let (reader, _writer) = pipe_pair().expect("pipe should be created");

        let start = Instant::now();
        let ready =
            wait_readable(&reader, Some(Duration::from_millis(20))).expect("poll should succeed");
        assert!(!ready);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (reader, writer) = pipe_pair().expect("pipe should be created");
        drop(writer);

        let ready = wait_readable(&reader, Some(Duration::from_millis(100)))
            .expect("poll should succeed");
        assert!(ready);
    }

    #[test]
    fn empty_pipe_is_writable() {
        let (_reader, writer) = pipe_pair().expect("pipe should be created");
        let ready = wait_writable(&writer, Some(Duration::from_millis(100)))
            .expect("poll should succeed");
        assert!(ready);
    }

    #[test]
    fn poll_many_reports_only_ready_entries() {
        let (idle_reader, _idle_writer) = pipe_pair().expect("pipe should be created");
        let (busy_reader, mut busy_writer) = pipe_pair().expect("pipe should be created");
        busy_writer.write_all(b"z").expect("write should succeed");

        let mut entries = [
            PollEntry::new(idle_reader.as_raw_fd(), Interest::Readable),
            PollEntry::new(busy_reader.as_raw_fd(), Interest::Readable),
        ];
        let ready = poll_fds(&mut entries, Some(Duration::from_millis(100)))
            .expect("poll should succeed");

        assert_eq!(ready, 1);
        assert!(!entries[0].readable());
        assert!(entries[1].readable());
    }

    #[test]
    fn sub_millisecond_timeout_rounds_up() {
        assert_eq!(timeout_millis(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(None), -1);
    }
}
