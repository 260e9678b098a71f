//! Main event loop of the engine.
//!
//! Multiplexes background task results, download queue notifications and
//! library update notifications until the shutdown future resolves.
use std::future::Future;

use anyhow::Result;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use super::handlers::handle_app_event;
use super::helpers::recv_subscription;
use crate::app::{App, AppEvent};
use crate::library::LibraryEvent;

/// Run the engine until `shutdown` resolves or every event source closes.
///
/// Uses `tokio::select!` over:
/// - **Shutdown**: highest priority, ends the loop
/// - **Background tasks**: aggregation and mutation results
/// - **Download queue**: single-entry patches, overlay refreshes
/// - **Library updates**: refreshing indicator and fresh passes
///
/// A subscription that lags behind triggers a full overlay resync instead
/// of replaying what was missed.
pub async fn run<F>(
    app: &mut App,
    mut event_rx: mpsc::Receiver<AppEvent>,
    library: Option<broadcast::Receiver<LibraryEvent>>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut downloads = Some(app.subscribe_downloads());
    let mut library = library;

    loop {
        // Drain finished tasks first so results are not starved by a busy queue
        while let Ok(event) = event_rx.try_recv() {
            handle_app_event(app, event);
        }

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, stopping engine loop");
                break;
            }

            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => handle_app_event(app, event),
                    None => {
                        tracing::debug!("Task channel closed, stopping engine loop");
                        break;
                    }
                }
            }

            result = recv_subscription(&mut downloads) => {
                match result {
                    Ok(event) => app.on_download_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Download notifications lagged, resyncing");
                        app.resync_downloads();
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Download notifications closed");
                        downloads = None;
                    }
                }
            }

            result = recv_subscription(&mut library) => {
                match result {
                    Ok(event) => app.on_library_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Library notifications lagged, refreshing");
                        app.refresh();
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Library notifications closed");
                        library = None;
                    }
                }
            }
        }
    }

    Ok(())
}
