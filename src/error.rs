//! Configuration errors.

use crate::severity::ParseSeverityError;

/// Errors produced while building a [`SeverityPolicy`](crate::SeverityPolicy) from
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A directive named a severity that does not exist.
    #[error("invalid directive `{directive}`: {source}")]
    InvalidSeverity {
        directive: String,
        #[source]
        source: ParseSeverityError,
    },
    /// A directive had an empty label, e.g. `=info`.
    #[error("invalid directive `{0}`: empty label")]
    EmptyLabel(String),
    /// The environment variable exists but is not valid unicode.
    #[error("environment variable `{0}` is not valid unicode")]
    NotUnicode(String),
}
