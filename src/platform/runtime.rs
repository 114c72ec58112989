//! Background task and timer helpers shared by the batch synchronizer, the stream
//! registry and the bundled stores.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

static BACKGROUND_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("magnetar-background")
        .enable_all()
        .build()
        .expect("failed to build background tokio runtime")
});

/// Spawns `future` on the ambient tokio runtime, or on a private background
/// runtime when called outside of one.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else {
        let _ = BACKGROUND_RUNTIME.spawn(future);
    }
}

/// Waits for `duration`. A zero duration still yields once, so work queued in the
/// same poll gets a chance to run first.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        next_tick().await;
        return;
    }
    tokio::time::sleep(duration).await;
}

/// Yields back to the scheduler once.
pub async fn next_tick() {
    tokio::task::yield_now().await;
}
