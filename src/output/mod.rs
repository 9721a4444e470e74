//! Output formatting module
//!
//! Renders run results and test listings for the terminal.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
