//! Read-only catalog tables that carry origin image URLs.

pub mod actor;
pub mod director;
pub mod screenshot;
pub mod video;

/// A catalog record that can name origin images.
pub trait ImageRecord {
    /// Origin URLs in preference order. Unset or empty columns are skipped.
    fn candidate_urls(&self) -> Vec<&str>;
}

fn present(column: &Option<String>) -> Option<&str> {
    column.as_deref().filter(|url| !url.is_empty())
}
