//! Per-label severity thresholds.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError},
};

use serde::Deserialize;

use crate::{ConfigError, Severity, StaticCowStr};

/// Reserved label holding the threshold for labels without an explicit entry.
pub const WILDCARD: &str = "*";

/// Environment variable read by [`SeverityPolicy::from_default_env`].
pub const DEFAULT_ENV_VAR: &str = "MDC_LOG";

static GLOBAL_POLICY: LazyLock<Arc<SeverityPolicy>> =
    LazyLock::new(|| Arc::new(SeverityPolicy::new()));

/// A table mapping logger labels to their minimum severity.
///
/// Lookups fall back to the [`WILDCARD`] entry and then to [`Severity::Trace`].
///
/// # Example
///
/// ```
/// use mdc_logger::{Severity, SeverityPolicy};
///
/// let policy = SeverityPolicy::parse_directives("warning,db=error").unwrap();
/// assert_eq!(policy.threshold("db"), Severity::Error);
/// assert_eq!(policy.threshold("http"), Severity::Warning);
/// ```
#[derive(Debug, Default)]
pub struct SeverityPolicy {
    thresholds: Mutex<HashMap<StaticCowStr, Severity>>,
}

/// Serialized form of a [`SeverityPolicy`].
///
/// ```json
/// { "default": "warning", "labels": { "svc": "info" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Threshold stored under the [`WILDCARD`] label.
    pub default: Option<Severity>,
    /// Explicit per-label thresholds.
    pub labels: HashMap<String, Severity>,
}

impl SeverityPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide policy, creating it on first use.
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL_POLICY.clone()
    }

    /// Builds a policy from comma separated directives.
    ///
    /// A bare severity (`warning`) sets the wildcard threshold, `label=severity`
    /// sets a single label. Later directives override earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a directive names an unknown severity or has an empty label.
    pub fn parse_directives(directives: &str) -> Result<Self, ConfigError> {
        let policy = Self::new();
        policy.apply_directives(directives)?;
        Ok(policy)
    }

    /// Builds a policy from the directives stored in the given environment variable.
    ///
    /// A missing variable yields an empty policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not unicode or contains invalid directives.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        Self::from_var(var, std::env::var(var))
    }

    fn from_var(
        var: &str,
        value: Result<String, std::env::VarError>,
    ) -> Result<Self, ConfigError> {
        match value {
            Ok(directives) => Self::parse_directives(&directives),
            Err(std::env::VarError::NotPresent) => Ok(Self::new()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(var.to_owned())),
        }
    }

    /// Same as [`SeverityPolicy::from_env`] with [`DEFAULT_ENV_VAR`].
    ///
    /// # Errors
    ///
    /// See [`SeverityPolicy::from_env`].
    pub fn from_default_env() -> Result<Self, ConfigError> {
        Self::from_env(DEFAULT_ENV_VAR)
    }

    /// Applies comma separated directives on top of the current table.
    ///
    /// Directives are validated before any of them is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a directive names an unknown severity or has an empty label.
    pub fn apply_directives(&self, directives: &str) -> Result<(), ConfigError> {
        let mut parsed = Vec::new();
        for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let (label, severity) = match directive.split_once('=') {
                Some((label, severity)) => (label.trim(), severity),
                None => (WILDCARD, directive),
            };
            if label.is_empty() {
                return Err(ConfigError::EmptyLabel(directive.to_owned()));
            }
            let severity = severity
                .parse::<Severity>()
                .map_err(|source| ConfigError::InvalidSeverity {
                    directive: directive.to_owned(),
                    source,
                })?;
            parsed.push((label.to_owned(), severity));
        }

        let mut thresholds = self.lock();
        for (label, severity) in parsed {
            thresholds.insert(label.into(), severity);
        }
        Ok(())
    }

    /// Applies a deserialized configuration on top of the current table.
    pub fn apply_config(&self, config: PolicyConfig) {
        let mut thresholds = self.lock();
        if let Some(default) = config.default {
            thresholds.insert(WILDCARD.into(), default);
        }
        for (label, severity) in config.labels {
            thresholds.insert(label.into(), severity);
        }
    }

    /// Resolves the minimum severity for `label`.
    #[must_use]
    pub fn threshold(&self, label: &str) -> Severity {
        let thresholds = self.lock();
        thresholds
            .get(label)
            .or_else(|| thresholds.get(WILDCARD))
            .copied()
            .unwrap_or_default()
    }

    /// Sets the threshold for `label`; pass [`WILDCARD`] to set the default.
    pub fn set_threshold(&self, label: impl Into<StaticCowStr>, severity: Severity) {
        self.lock().insert(label.into(), severity);
    }

    /// Sets the threshold used by labels without an explicit entry.
    pub fn set_default_threshold(&self, severity: Severity) {
        self.set_threshold(WILDCARD, severity);
    }

    /// Removes every entry, including the wildcard.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StaticCowStr, Severity>> {
        self.thresholds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
