mod library;
mod preferences;
mod recents;
mod schema;
mod types;

pub use library::{DumpChapter, DumpManga, LibraryDump};
pub use schema::Database;
pub use types::{DatabaseError, NewChapter, NewManga};
