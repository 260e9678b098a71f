//! Background event handling for the engine.
//!
//! - [`handlers`] - applies task results to the [`App`](crate::app::App)
//! - [`loop_runner`] - the `select!` loop over tasks and subscriptions

mod handlers;
mod helpers;
mod loop_runner;

pub use handlers::handle_app_event;
pub(crate) use helpers::catch_task_panic;
pub use loop_runner::run;
