//! Bounded accumulation of per-child failure messages.

use std::fmt::Write as _;

/// Appended when a summary was cut to fit its bound.
pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// Collects `(child index, message)` pairs in arrival order.
///
/// No deduplication is performed. [`ErrorCollector::summarize`] renders the
/// entries as `"<index>: <message>"` lines and bounds the output length, so
/// the persisted text stays small however many children fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorCollector {
    entries: Vec<(usize, String)>,
}

impl ErrorCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure message for a child.
    pub fn collect(&mut self, child_index: usize, message: impl Into<String>) {
        self.entries.push((child_index, message.into()));
    }

    /// Number of collected entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Joins the entries and bounds the result to `max_length` characters.
    ///
    /// Returns an empty string when nothing was collected.
    #[must_use]
    pub fn summarize(&self, max_length: usize) -> String {
        self.summarize_after("", max_length)
    }

    /// Like [`summarize`](Self::summarize), but continues text produced by
    /// an earlier round.
    ///
    /// With no new entries the prior text is returned as is (re-bounded).
    #[must_use]
    pub fn summarize_after(&self, prior: &str, max_length: usize) -> String {
        let mut text = prior.to_string();
        for (child_index, message) in &self.entries {
            if !text.is_empty() {
                text.push('\n');
            }
            let _ = write!(text, "{child_index}: {message}");
        }
        truncate(text, max_length)
    }
}

/// Bounds `text` to `max_length` characters, ending cut text with the marker.
pub(crate) fn truncate(text: String, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text;
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_length <= marker_len {
        return TRUNCATION_MARKER.chars().take(max_length).collect();
    }
    let mut bounded: String = text.chars().take(max_length - marker_len).collect();
    bounded.push_str(TRUNCATION_MARKER);
    bounded
}
