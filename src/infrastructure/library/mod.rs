//! Prompt and gate library files

mod loader;

pub use loader::{ImportSummary, Library, LibraryLoader};
