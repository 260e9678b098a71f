use crate::app::{App, AppEvent};

/// Apply one background task event to the engine.
pub fn handle_app_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Aggregated {
            generation,
            query,
            outcome,
        } => {
            app.publish(generation, &query, outcome);
        }
        AppEvent::MutationApplied { action } => {
            tracing::debug!(action, "Mutation applied, reloading feed");
            app.refresh();
        }
        AppEvent::MutationFailed { action, error } => {
            tracing::warn!(action, error = %error, "Mutation failed");
        }
        AppEvent::TaskPanicked { task, error } => {
            app.task_failed(task, &error);
        }
    }
}
