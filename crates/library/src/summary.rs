//! Per-batch outcome accounting.
//!
//! Batch operations never fail because of a single book. Each book that did
//! not simply get added lands in one of the lists below, named by title and
//! author so the user can act on it.

use derive_more::Display;
use iosra_book::BookRecord;

/// How a book is shown to the user.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("'{title}' by {authors}")]
pub struct BookLabel {
    pub title: String,
    pub authors: String,
}

impl BookLabel {
    pub fn new(title: impl Into<String>, authors: &[String]) -> Self {
        Self { title: title.into(), authors: authors.join(", ") }
    }
}

impl From<&BookRecord> for BookLabel {
    fn from(book: &BookRecord) -> Self {
        Self::new(book.title.clone(), &book.authors)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    /// Already on the device and protected from overwrite.
    pub skipped: Vec<BookLabel>,
    pub replaced: Vec<BookLabel>,
    /// Already on the device; only its metadata was refreshed.
    pub updated: Vec<BookLabel>,
    /// Failed validation or metadata extraction, with the reason.
    pub malformed: Vec<(BookLabel, String)>,
    /// Refused by the companion app.
    pub rejected: Vec<String>,
    /// Books or paths the device would not take, with the error.
    pub failed: Vec<(String, String)>,
    pub deleted: Vec<String>,
    /// Reconciliation only: cache entries re-keyed after their file moved.
    pub moved: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn new(attempted: usize) -> Self {
        Self { attempted, ..Self::default() }
    }

    /// Books that went onto the device as new copies.
    pub fn added_count(&self) -> usize {
        self.attempted.saturating_sub(
            self.malformed.len()
                + self.skipped.len()
                + self.replaced.len()
                + self.updated.len()
                + self.rejected.len()
                + self.failed.len(),
        )
    }

    pub fn has_problems(&self) -> bool {
        !self.malformed.is_empty() || !self.rejected.is_empty() || !self.failed.is_empty()
    }

    /// One user-facing message for the batch, or `None` when every book was
    /// simply added. Problems take precedence over skipped books, which take
    /// precedence over replacements and then metadata updates.
    pub fn report(&self) -> Option<String> {
        let mut lines = Vec::new();
        if self.has_problems() {
            lines.push(format!("{} of {} books added.", self.added_count(), self.attempted));
            if !self.malformed.is_empty() {
                lines.push("Unable to read metadata from:".to_string());
                lines.extend(self.malformed.iter().map(|(label, reason)| format!("  {label}: {reason}")));
            }
            if !self.rejected.is_empty() {
                lines.push("Rejected by the companion app:".to_string());
                lines.extend(self.rejected.iter().map(|f| format!("  {f}")));
            }
            if !self.failed.is_empty() {
                lines.push("Could not be transferred:".to_string());
                lines.extend(self.failed.iter().map(|(what, reason)| format!("  {what}: {reason}")));
            }
        } else if !self.skipped.is_empty() {
            lines.push(format!(
                "{} of {} books added. Already on the device and protected:",
                self.added_count(),
                self.attempted
            ));
            lines.extend(self.skipped.iter().map(|label| format!("  {label}")));
        } else if !self.replaced.is_empty() {
            lines.push("Replaced on the device:".to_string());
            lines.extend(self.replaced.iter().map(|label| format!("  {label}")));
        } else if !self.updated.is_empty() {
            lines.push("Metadata updated on the device:".to_string());
            lines.extend(self.updated.iter().map(|label| format!("  {label}")));
        } else {
            return None;
        }
        Some(lines.join("\n"))
    }

    pub(crate) fn log(&self, operation: &str) {
        tracing::info!(
            operation,
            attempted = self.attempted,
            added = self.added_count(),
            skipped = self.skipped.len(),
            replaced = self.replaced.len(),
            updated = self.updated.len(),
            malformed = self.malformed.len(),
            rejected = self.rejected.len(),
            failed = self.failed.len(),
            deleted = self.deleted.len(),
            moved = self.moved.len(),
            "Batch complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(title: &str) -> BookLabel {
        BookLabel::new(title, &["Ann Author".to_string(), "Bob".to_string()])
    }

    #[test]
    fn test_label_display() {
        assert_eq!(label("Foo").to_string(), "'Foo' by Ann Author, Bob");
    }

    #[test]
    fn test_counts_and_precedence() {
        let mut summary = BatchSummary::new(5);
        summary.skipped.push(label("Skipped"));
        summary.updated.push(label("Updated"));
        assert_eq!(summary.added_count(), 3);
        let report = summary.report().unwrap();
        assert!(report.contains("'Skipped'"));
        assert!(!report.contains("'Updated'"));

        summary.malformed.push((label("Broken"), "not a zip".to_string()));
        summary.rejected.push("u-9.epub".to_string());
        assert_eq!(summary.added_count(), 1);
        let report = summary.report().unwrap();
        assert!(report.starts_with("1 of 5 books added."));
        assert!(report.contains("'Broken' by Ann Author, Bob: not a zip"));
        assert!(report.contains("u-9.epub"));
        assert!(!report.contains("'Skipped'"));

        summary.failed.push(("'Lost' by Bob".to_string(), "permission denied".to_string()));
        assert_eq!(summary.added_count(), 0);
        assert!(summary.report().unwrap().contains("Could not be transferred:\n  'Lost' by Bob: permission denied"));
    }

    #[test]
    fn test_clean_batch_has_no_report() {
        assert!(BatchSummary::new(3).report().is_none());
        let mut summary = BatchSummary::new(1);
        summary.updated.push(label("Updated"));
        assert!(summary.report().unwrap().contains("'Updated'"));
    }
}
