//! Backend sinks receiving the merged records.

use std::{error::Error, panic::Location};

use crate::{Metadata, Severity};

/// Where a log call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub line: u32,
}

impl<'a> From<&'a Location<'a>> for SourceLocation<'a> {
    fn from(location: &'a Location<'a>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

/// A record that passed the severity check, with its metadata already merged.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub severity: Severity,
    pub label: &'a str,
    pub message: &'a str,
    pub metadata: &'a Metadata,
    pub error: Option<&'a (dyn Error + 'static)>,
    pub location: Option<SourceLocation<'a>>,
}

/// Renders and writes log records.
///
/// Failures inside a backend are its own concern; the handler neither retries nor
/// reports them.
pub trait Backend: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);

    fn flush(&self) {}
}

/// A backend forwarding records to a [`log::Log`] implementation.
///
/// The label becomes the record target and the merged metadata becomes the record
/// key/values, followed by `error` when an error is attached. Critical records are
/// forwarded at [`log::Level::Error`] with an extra `severity = "critical"` pair.
///
/// # Example
///
/// ```
/// use mdc_logger::{LogBackend, LogRegistry};
///
/// let backend = LogBackend::new(env_logger::builder().build());
/// let registry = LogRegistry::new(backend);
/// registry.handler("svc").info("Processing request");
/// ```
pub struct LogBackend {
    inner: Box<dyn log::Log>,
}

impl LogBackend {
    /// Creates a new [`LogBackend`] wrapping the given logging implementation.
    ///
    /// Do not pass the global [`log::logger`] when the registry is installed as the
    /// global logger itself, records would loop back into it.
    pub fn new<L>(inner: L) -> Self
    where
        L: log::Log + 'static,
    {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LogBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBackend").finish_non_exhaustive()
    }
}

impl Backend for LogBackend {
    fn log(&self, record: &LogRecord<'_>) {
        let extra_records = ExtraRecords {
            metadata: record.metadata,
            error: record.error,
            critical: record.severity == Severity::Critical,
        };
        self.inner.log(
            &log::Record::builder()
                .level(record.severity.to_log_level())
                .target(record.label)
                .args(format_args!("{}", record.message))
                .file(record.location.map(|location| location.file))
                .line(record.location.map(|location| location.line))
                .key_values(&extra_records)
                .build(),
        );
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

struct ExtraRecords<'a> {
    metadata: &'a Metadata,
    error: Option<&'a (dyn Error + 'static)>,
    critical: bool,
}

impl log::kv::Source for ExtraRecords<'_> {
    fn visit<'kvs>(
        &'kvs self,
        visitor: &mut dyn log::kv::VisitSource<'kvs>,
    ) -> Result<(), log::kv::Error> {
        for (key, value) in self.metadata {
            visitor.visit_pair(log::kv::Key::from_str(key), value.as_log_value())?;
        }
        if let Some(error) = self.error {
            visitor.visit_pair(
                log::kv::Key::from_str("error"),
                log::kv::Value::from_dyn_error(error),
            )?;
        }
        if self.critical {
            visitor.visit_pair(
                log::kv::Key::from_str("severity"),
                log::kv::Value::from(Severity::Critical.as_str()),
            )?;
        }
        Ok(())
    }
}

/// A backend that discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn log(&self, _record: &LogRecord<'_>) {}
}
