//! Small helpers: process execution, logging setup, path and text utilities.

mod logging;
mod process;

pub use logging::{init_logging, register_to_tracing};
pub use process::{CommandOutput, SystemRunner, ToolRunner};

/// Turn a user-facing name into a filename-safe slug.
///
/// Keeps ASCII alphanumerics, folds everything else into single dashes.
/// Returns `"node"` for names with nothing usable.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "node".to_string()
    } else {
        slug
    }
}

/// Truncate `text` to at most `max` bytes on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Canonical form of a Windows disk path for comparisons.
///
/// Case-folded, forward slashes turned into backslashes, `\\?\` prefix and
/// surrounding quotes/whitespace removed.
pub fn normalize_disk_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('"');
    let stripped = trimmed.strip_prefix(r"\\?\").unwrap_or(trimmed);
    stripped.replace('/', "\\").to_lowercase()
}
