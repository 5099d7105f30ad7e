use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

type Block = Box<dyn FnOnce() + Send>;

/// FIFO of closures deferred to the owner's idle cycle.
///
/// Any thread may [`push`](UiQueue::push); only the owning context calls
/// [`pump`](UiQueue::pump). Cloning shares the same queue.
#[derive(Clone, Default)]
pub struct UiQueue {
    blocks: Arc<Mutex<VecDeque<Block>>>,
}

impl UiQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, block: impl FnOnce() + Send + 'static) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Box::new(block));
    }

    /// Run every block queued before this call, in order. Blocks queued while
    /// pumping wait for the next pump. Returns how many ran.
    pub fn pump(&self) -> usize {
        let batch = std::mem::take(&mut *self.blocks.lock().unwrap_or_else(PoisonError::into_inner));
        let count = batch.len();
        for block in batch {
            block();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for UiQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn pump_runs_in_order() {
        let queue = UiQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            queue.push(move || log.lock().expect("lock").push(i));
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.pump(), 5);
        assert!(queue.is_empty());
        assert_eq!(*log.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn blocks_queued_during_pump_wait_for_next_pump() {
        let queue = UiQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let queue2 = queue.clone();
            let ran = Arc::clone(&ran);
            queue.push(move || {
                let ran = Arc::clone(&ran);
                queue2.push(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
            });
        }

        assert_eq!(queue.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn push_from_other_threads() {
        let queue = UiQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let ran = Arc::clone(&ran);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let ran = Arc::clone(&ran);
                        queue.push(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker should finish");
        }

        assert_eq!(queue.pump(), 100);
        assert_eq!(ran.load(Ordering::SeqCst), 100);
    }
}
