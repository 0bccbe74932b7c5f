use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A single-shot timer that posts `msg` to an actor mailbox after `delay`.
///
/// Cancelling or dropping the timer aborts it; a cancelled timer never
/// delivers its message.
#[derive(Debug)]
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    pub fn after<M: Send + 'static>(
        delay: Duration,
        tx: mpsc::UnboundedSender<M>,
        msg: M,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
        Self { handle }
    }

    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
