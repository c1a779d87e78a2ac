//! Explicit timer service (§9 design notes): retransmission timers,
//! duplicate-suppression windows, and rate-limit warning windows all go
//! through one abstraction, so they are cancellable together on disconnect
//! and advanceable with a virtual clock in tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;

/// A single outstanding delayed callback.
///
/// Dropping or cancelling the handle prevents the callback from firing if
/// it hasn't already; this is how §5's "cancellation... produces no further
/// side effects on shared state" is implemented for timers.
pub struct TimerHandle {
    cancel: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Arms a callback to run after `delay`, scoped to `parent` so that
/// cancelling `parent` (e.g. a peer's whole connection token) also cancels
/// every timer armed under it.
pub fn arm<F>(spawner: &Arc<dyn TaskSpawner>, parent: &CancellationToken, delay: Duration, callback: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = parent.child_token();
    let token = cancel.clone();
    spawner.spawn_boxed(Box::pin(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                callback.await;
            }
        }
    }));
    TimerHandle { cancel }
}
