use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver};

/// Result of a job that may be running on the rayon pool.
///
/// Dropping the handle detaches the job; its value is thrown away when it
/// finishes. A job that panics never sends, so [`TaskHandle::join`] yields
/// `None` instead of propagating the panic.
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub fn spawn<F>(job: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = sync_channel(1);
        rayon::spawn(move || {
            if let Ok(value) = catch_unwind(AssertUnwindSafe(job)) {
                let _ = sender.send(value);
            }
        });
        Self { receiver }
    }

    /// Runs `job` on the pool when `threaded`, otherwise right here.
    pub fn dispatch<F>(threaded: bool, job: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if threaded {
            Self::spawn(job)
        } else {
            Self::ready(job())
        }
    }
}

impl<T> TaskHandle<T> {
    pub fn ready(value: T) -> Self {
        let (sender, receiver) = sync_channel(1);
        let _ = sender.send(value);
        Self { receiver }
    }

    /// Blocks until the job finishes.
    pub fn join(self) -> Option<T> {
        self.receiver.recv().ok()
    }
}
