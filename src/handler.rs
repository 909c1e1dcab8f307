use std::{
    error::Error,
    panic::Location,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    AmbientContext, Backend, ExecutionUnitId, LogRecord, Metadata, MetadataValue,
    RecordedHistory, Severity, SeverityPolicy, SourceLocation, StaticCowStr, value::merge,
};

/// Shared collaborators of every handler created by one registry.
pub(crate) struct Shared {
    pub policy: Arc<SeverityPolicy>,
    pub context: Arc<AmbientContext>,
    pub history: Arc<RecordedHistory>,
    pub backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("policy", &self.policy)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// Source of the base context merged into every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum LocalMetadata {
    /// Local metadata was never set; the ambient context of the calling unit is used.
    #[default]
    Inherited,
    /// Local metadata was set at least once and replaces the ambient context entirely.
    Local(Metadata),
}

/// Emits records for one logger label.
///
/// A handler is obtained from [`LogRegistry::handler`](crate::LogRegistry::handler).
/// Each record is checked against the effective threshold, then its metadata is built
/// from the base context (the handler's local metadata once it has been set, the
/// ambient context of the calling thread otherwise) with the per-call metadata
/// merged on top.
///
/// # Example
///
/// ```
/// use mdc_logger::{AmbientContext, LogRegistry, NullBackend, Severity, metadata};
///
/// let registry = LogRegistry::new(NullBackend);
/// let handler = registry.handler("svc");
///
/// let context = AmbientContext::global();
/// let _guard = context.enter(metadata! { "request_id" => "abc" });
/// handler.emit(Severity::Info, "hello", metadata! { "attempt" => 1 }, None);
///
/// registry.history().assert_present(
///     Severity::Info,
///     "hello",
///     Some(&metadata! { "request_id" => "abc", "attempt" => 1 }),
///     None,
/// );
/// ```
#[derive(Debug)]
pub struct LogHandler {
    label: StaticCowStr,
    severity: Mutex<Option<Severity>>,
    metadata: Mutex<LocalMetadata>,
    shared: Arc<Shared>,
}

impl LogHandler {
    pub(crate) fn new(label: StaticCowStr, shared: Arc<Shared>) -> Self {
        Self {
            label,
            severity: Mutex::new(None),
            metadata: Mutex::new(LocalMetadata::Inherited),
            shared,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the severity set directly on this handler, if any.
    #[must_use]
    pub fn severity_override(&self) -> Option<Severity> {
        *lock(&self.severity)
    }

    /// Sets a threshold that takes precedence over the policy for this label.
    ///
    /// Pass `None` to go back to the policy.
    pub fn set_severity_override(&self, severity: Option<Severity>) {
        *lock(&self.severity) = severity;
    }

    /// Resolves the threshold records of this handler are checked against.
    #[must_use]
    pub fn effective_threshold(&self) -> Severity {
        self.severity_override()
            .unwrap_or_else(|| self.shared.policy.threshold(&self.label))
    }

    #[must_use]
    pub fn is_enabled(&self, severity: Severity) -> bool {
        severity >= self.effective_threshold()
    }

    /// Returns the local metadata, or an empty map if it was never set.
    #[must_use]
    pub fn local_metadata(&self) -> Metadata {
        match &*lock(&self.metadata) {
            LocalMetadata::Inherited => Metadata::new(),
            LocalMetadata::Local(metadata) => metadata.clone(),
        }
    }

    /// Returns `true` once local metadata has been set, even if it is empty now.
    #[must_use]
    pub fn has_local_metadata(&self) -> bool {
        matches!(*lock(&self.metadata), LocalMetadata::Local(_))
    }

    /// Replaces the local metadata.
    ///
    /// From now on the ambient context is ignored by this handler.
    pub fn set_local_metadata(&self, metadata: Metadata) {
        *lock(&self.metadata) = LocalMetadata::Local(metadata);
    }

    #[must_use]
    pub fn local_value(&self, key: &str) -> Option<MetadataValue> {
        match &*lock(&self.metadata) {
            LocalMetadata::Inherited => None,
            LocalMetadata::Local(metadata) => metadata.get(key).cloned(),
        }
    }

    /// Sets or removes (`None`) a single local metadata key.
    ///
    /// Like [`set_local_metadata`](Self::set_local_metadata), this switches the
    /// handler to local metadata.
    pub fn set_local_value(
        &self,
        key: impl Into<StaticCowStr>,
        value: Option<MetadataValue>,
    ) -> Option<MetadataValue> {
        let mut local = lock(&self.metadata);
        let mut metadata = match std::mem::take(&mut *local) {
            LocalMetadata::Local(metadata) => metadata,
            LocalMetadata::Inherited => Metadata::new(),
        };

        let key = key.into();
        let previous = match value {
            Some(value) => metadata.insert(key, value),
            None => metadata.remove(&key),
        };
        *local = LocalMetadata::Local(metadata);
        previous
    }

    /// Emits a record, using the caller's location as the source location.
    #[track_caller]
    pub fn emit(
        &self,
        severity: Severity,
        message: &str,
        metadata: Metadata,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let location = SourceLocation::from(Location::caller());
        self.emit_at(severity, message, metadata, error, Some(location));
    }

    /// Emits a record with an explicit source location.
    ///
    /// Records below the effective threshold are dropped before any metadata is
    /// gathered: they reach neither the backend nor the history.
    pub fn emit_at(
        &self,
        severity: Severity,
        message: &str,
        metadata: Metadata,
        error: Option<&(dyn Error + 'static)>,
        location: Option<SourceLocation<'_>>,
    ) {
        let unit = ExecutionUnitId::current();
        self.dispatch(unit, severity, message, metadata, error, location);
    }

    /// Emits a record on behalf of `unit`: its ambient context is used as the base
    /// instead of the calling thread's.
    #[track_caller]
    pub fn emit_in(
        &self,
        unit: ExecutionUnitId,
        severity: Severity,
        message: &str,
        metadata: Metadata,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let location = SourceLocation::from(Location::caller());
        self.dispatch(unit, severity, message, metadata, error, Some(location));
    }

    fn dispatch(
        &self,
        unit: ExecutionUnitId,
        severity: Severity,
        message: &str,
        metadata: Metadata,
        error: Option<&(dyn Error + 'static)>,
        location: Option<SourceLocation<'_>>,
    ) {
        if !self.is_enabled(severity) {
            return;
        }

        // Release the local metadata lock before touching the ambient context.
        let local = lock(&self.metadata).clone();
        let base = match local {
            LocalMetadata::Local(local) => local,
            LocalMetadata::Inherited => self.shared.context.unit(unit).snapshot(),
        };
        let metadata = merge(base, metadata);

        self.shared.backend.log(&LogRecord {
            severity,
            label: &self.label,
            message,
            metadata: &metadata,
            error,
            location,
        });
        self.shared.history.record(
            severity,
            metadata,
            message,
            error.map(ToString::to_string),
        );
    }

    #[track_caller]
    pub fn trace(&self, message: &str) {
        self.emit(Severity::Trace, message, Metadata::new(), None);
    }

    #[track_caller]
    pub fn debug(&self, message: &str) {
        self.emit(Severity::Debug, message, Metadata::new(), None);
    }

    #[track_caller]
    pub fn info(&self, message: &str) {
        self.emit(Severity::Info, message, Metadata::new(), None);
    }

    #[track_caller]
    pub fn warning(&self, message: &str) {
        self.emit(Severity::Warning, message, Metadata::new(), None);
    }

    #[track_caller]
    pub fn error(&self, message: &str) {
        self.emit(Severity::Error, message, Metadata::new(), None);
    }

    #[track_caller]
    pub fn critical(&self, message: &str) {
        self.emit(Severity::Critical, message, Metadata::new(), None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
