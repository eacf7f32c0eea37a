//! Output formatting utilities

use console::style;

/// Print an error message to stderr
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}
