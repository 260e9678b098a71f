//! Text helpers shared by the storage adapter and the CLI output.
//!
//! - **Sanitizing**: titles from sources are stripped of escapes and control
//!   characters before they reach the feed
//! - **Widths**: Unicode-aware column widths for the plain-text listing

mod text;

pub use text::{display_width, fit_to_width, sanitize_title, truncate_to_width};
