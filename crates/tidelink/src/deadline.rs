//! One-shot owned timers.
//!
//! Every pending request and pending mutation owns a [`Deadline`]. Dropping
//! the owning entry aborts the timer, so removing an entry from its map is
//! the single teardown path — there is no separate cancel call to forget.

use std::time::Duration;

use tokio::task::JoinHandle;

/// A timer that runs `f` once after `duration`, unless dropped first.
#[derive(Debug)]
pub(crate) struct Deadline {
    handle: JoinHandle<()>,
}

impl Deadline {
    /// Schedule `f` to run after `duration` on the current runtime.
    pub(crate) fn after(duration: Duration, f: impl FnOnce() + Send + 'static) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            f();
        });
        Self { handle }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
