use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast::{self, error::RecvError};

/// Run a future and turn a panic inside it into an error message.
///
/// Background tasks report panics as `AppEvent::TaskPanicked` instead of
/// dying silently and leaving the engine stuck in a loading state.
pub(crate) async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("Unknown panic: {:?}", (*panic).type_id())
            }
        })
}

/// Receive from an optional subscription. A missing or closed subscription
/// never yields, so it can sit in a `select!` arm.
pub(super) async fn recv_subscription<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
