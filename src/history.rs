//! In-memory capture of emitted records.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Metadata, Severity};

/// A record as stored in [`RecordedHistory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub severity: Severity,
    pub metadata: Metadata,
    pub message: String,
    /// Rendered description of the attached error, if any.
    pub error: Option<String>,
}

/// An append-only list of the records that passed the severity check.
///
/// Every [`LogHandler`](crate::LogHandler) appends to the history of its registry, so
/// tests can verify what was emitted (and what was suppressed) without parsing
/// backend output.
#[derive(Debug, Default)]
pub struct RecordedHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl RecordedHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        severity: Severity,
        metadata: Metadata,
        message: impl Into<String>,
        error: Option<String>,
    ) {
        let entry = HistoryEntry {
            severity,
            metadata,
            message: message.into(),
            error,
        };
        self.lock().push(entry);
    }

    /// Returns a copy of all entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the entries with exactly the given severity.
    #[must_use]
    pub fn filter_by_severity(&self, severity: Severity) -> Vec<HistoryEntry> {
        self.lock()
            .iter()
            .filter(|entry| entry.severity == severity)
            .cloned()
            .collect()
    }

    /// Finds the first entry matching all of the given fields.
    ///
    /// Metadata is compared as a whole and `None` is the same as an empty map.
    /// Errors are compared by description, a missing error counts as an empty one.
    #[must_use]
    pub fn find(
        &self,
        severity: Severity,
        message: &str,
        metadata: Option<&Metadata>,
        error: Option<&str>,
    ) -> Option<HistoryEntry> {
        let empty = Metadata::new();
        let metadata = metadata.unwrap_or(&empty);
        let error = error.unwrap_or_default();

        self.lock()
            .iter()
            .find(|entry| {
                entry.severity == severity
                    && entry.message == message
                    && &entry.metadata == metadata
                    && entry.error.as_deref().unwrap_or_default() == error
            })
            .cloned()
    }

    /// Panics unless a matching entry was recorded.
    ///
    /// # Panics
    ///
    /// Panics with the list of recorded entries if [`find`](Self::find) returns `None`.
    #[track_caller]
    pub fn assert_present(
        &self,
        severity: Severity,
        message: &str,
        metadata: Option<&Metadata>,
        error: Option<&str>,
    ) -> HistoryEntry {
        match self.find(severity, message, metadata, error) {
            Some(entry) => entry,
            None => panic!(
                "expected a {severity} entry {message:?} with metadata {metadata:?} \
                 and error {error:?}, recorded: {:#?}",
                self.entries()
            ),
        }
    }

    /// Panics if a matching entry was recorded.
    ///
    /// # Panics
    ///
    /// Panics with the offending entry if [`find`](Self::find) returns one.
    #[track_caller]
    pub fn assert_absent(
        &self,
        severity: Severity,
        message: &str,
        metadata: Option<&Metadata>,
        error: Option<&str>,
    ) {
        if let Some(entry) = self.find(severity, message, metadata, error) {
            panic!("unexpected entry recorded: {entry:#?}");
        }
    }

    /// Drops all entries.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
