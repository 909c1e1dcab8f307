/// Builds a [`Metadata`](crate::Metadata) map from `key => value` pairs.
///
/// ```
/// use mdc_logger::{MetadataValue, metadata};
///
/// let metadata = metadata! { "user" => "alice", "attempt" => 3 };
/// assert_eq!(metadata["attempt"], MetadataValue::from("3"));
/// ```
#[macro_export]
macro_rules! metadata {
    () => {
        $crate::Metadata::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut metadata = $crate::Metadata::new();
        $(
            metadata.insert(
                $crate::StaticCowStr::from($key),
                $crate::MetadataValue::from($value),
            );
        )+
        metadata
    }};
}

/// Emits a formatted message through a [`LogHandler`](crate::LogHandler).
///
/// The message is only formatted when the severity passes the handler threshold.
/// Per-call metadata may be given in braces before the format string.
///
/// ```
/// use mdc_logger::{LogRegistry, NullBackend, Severity, emit, metadata};
///
/// let registry = LogRegistry::new(NullBackend);
/// let handler = registry.handler("svc");
///
/// emit!(handler, Severity::Warning, { "code" => "E1" }, "retrying in {}s", 5);
/// emit!(handler, Severity::Info, "done");
///
/// let history = registry.history();
/// let code = metadata! { "code" => "E1" };
/// history.assert_present(Severity::Warning, "retrying in 5s", Some(&code), None);
/// history.assert_present(Severity::Info, "done", None, None);
/// ```
#[macro_export]
macro_rules! emit {
    ($handler:expr, $severity:expr, { $($key:expr => $value:expr),* $(,)? }, $($arg:tt)+) => {{
        let handler = &$handler;
        let severity = $severity;
        if handler.is_enabled(severity) {
            handler.emit(
                severity,
                &::std::format!($($arg)+),
                $crate::metadata! { $($key => $value),* },
                ::std::option::Option::None,
            );
        }
    }};
    ($handler:expr, $severity:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $severity, {}, $($arg)+)
    };
}

/// Emits a [`Severity::Trace`](crate::Severity::Trace) record, see [`emit!`].
#[macro_export]
macro_rules! trace {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Trace, $($arg)+)
    };
}

/// Emits a [`Severity::Debug`](crate::Severity::Debug) record, see [`emit!`].
#[macro_export]
macro_rules! debug {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Debug, $($arg)+)
    };
}

/// Emits a [`Severity::Info`](crate::Severity::Info) record, see [`emit!`].
///
/// ```
/// use mdc_logger::{LogRegistry, NullBackend, Severity, metadata};
///
/// let registry = LogRegistry::new(NullBackend);
/// let handler = registry.handler("svc");
///
/// mdc_logger::info!(handler, { "user" => "alice" }, "logged in after {} attempts", 2);
/// mdc_logger::info!(handler, "plain");
///
/// let user = metadata! { "user" => "alice" };
/// let history = registry.history();
/// history.assert_present(Severity::Info, "logged in after 2 attempts", Some(&user), None);
/// history.assert_present(Severity::Info, "plain", None, None);
/// ```
#[macro_export]
macro_rules! info {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Info, $($arg)+)
    };
}

/// Emits a [`Severity::Warning`](crate::Severity::Warning) record, see [`emit!`].
#[macro_export]
macro_rules! warning {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Warning, $($arg)+)
    };
}

/// Emits a [`Severity::Error`](crate::Severity::Error) record, see [`emit!`].
#[macro_export]
macro_rules! error {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Error, $($arg)+)
    };
}

/// Emits a [`Severity::Critical`](crate::Severity::Critical) record, see [`emit!`].
#[macro_export]
macro_rules! critical {
    ($handler:expr, $($arg:tt)+) => {
        $crate::emit!($handler, $crate::Severity::Critical, $($arg)+)
    };
}
