//! Cancellable background task handle.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned loop plus the token that stops it.
pub struct TaskHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `make(token)`; the future must return once the token is cancelled.
    pub fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(make(token.clone()));
        Self { token, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the task to exit, so no callback runs after this returns.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                tracing::error!("Background task panicked: {}", e);
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
