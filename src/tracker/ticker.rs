use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owned handle to the periodic tick task. Dropping it cancels the task, so a
/// tick can never outlive the tracker that spawned it.
pub(crate) struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl Ticker {
    pub(crate) fn new(handle: JoinHandle<()>, cancel_token: CancellationToken) -> Self {
        Self {
            handle,
            cancel_token,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.handle.is_finished()
    }

    /// Cancels the task and waits for it to wind down.
    pub(crate) async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Err(err) = (&mut self.handle).await {
            if !err.is_cancelled() {
                log::error!("tick task failed: {err}");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}
