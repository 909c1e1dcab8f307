use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    AmbientContext, Backend, LogHandler, Metadata, MetadataValue, RecordedHistory, Severity,
    SeverityPolicy, SourceLocation, StaticCowStr, handler::Shared,
};

/// Creates and caches [`LogHandler`]s sharing one policy, ambient context, history and backend.
///
/// The registry is cheap to clone; clones share handlers and collaborators.
///
/// It also implements [`log::Log`], so the standard `log` macros can be routed
/// through it: the record target is used as the label and the record key/values as
/// per-call metadata. Key/values captured with `:serde` keep their lists and maps.
///
/// # Example
///
/// ```
/// use log::LevelFilter;
/// use mdc_logger::{AmbientContext, LogBackend, LogRegistry, Severity, metadata};
///
/// let registry = LogRegistry::new(LogBackend::new(env_logger::builder().build()));
/// registry.policy().set_threshold("svc", Severity::Info);
/// registry.clone().init(LevelFilter::Trace);
///
/// let context = AmbientContext::global();
/// let _guard = context.enter(metadata! { "request_id" => "req-123" });
/// log::info!(target: "svc", attempt = 1; "Processing request");
/// log::debug!(target: "svc", "Suppressed");
///
/// registry.history().assert_present(
///     Severity::Info,
///     "Processing request",
///     Some(&metadata! { "request_id" => "req-123", "attempt" => 1 }),
///     None,
/// );
/// assert_eq!(registry.history().len(), 1);
/// ```
#[derive(Clone)]
pub struct LogRegistry {
    shared: Arc<Shared>,
    handlers: Arc<RwLock<HashMap<StaticCowStr, Arc<LogHandler>>>>,
}

impl LogRegistry {
    /// Creates a registry writing to `backend`, using the global policy and ambient
    /// context and a fresh history.
    pub fn new<B>(backend: B) -> Self
    where
        B: Backend + 'static,
    {
        Self::from_shared(Shared {
            policy: SeverityPolicy::global(),
            context: AmbientContext::global(),
            history: Arc::new(RecordedHistory::new()),
            backend: Arc::new(backend),
        })
    }

    fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            handlers: Arc::default(),
        }
    }

    fn rebuild(self, update: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = Shared {
            policy: self.shared.policy.clone(),
            context: self.shared.context.clone(),
            history: self.shared.history.clone(),
            backend: self.shared.backend.clone(),
        };
        update(&mut shared);
        Self::from_shared(shared)
    }

    /// Replaces the severity policy. Handlers created earlier are not affected.
    #[must_use]
    pub fn with_policy(self, policy: Arc<SeverityPolicy>) -> Self {
        self.rebuild(|shared| shared.policy = policy)
    }

    /// Replaces the ambient context table. Handlers created earlier are not affected.
    #[must_use]
    pub fn with_context(self, context: Arc<AmbientContext>) -> Self {
        self.rebuild(|shared| shared.context = context)
    }

    /// Replaces the recorded history. Handlers created earlier are not affected.
    #[must_use]
    pub fn with_history(self, history: Arc<RecordedHistory>) -> Self {
        self.rebuild(|shared| shared.history = history)
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<SeverityPolicy> {
        &self.shared.policy
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AmbientContext> {
        &self.shared.context
    }

    #[must_use]
    pub fn history(&self) -> &Arc<RecordedHistory> {
        &self.shared.history
    }

    /// Returns the handler for `label`, creating it on first use.
    #[must_use]
    pub fn handler(&self, label: &str) -> Arc<LogHandler> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = handlers.get(label) {
            return handler.clone();
        }
        drop(handlers);

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(StaticCowStr::Owned(label.to_owned()))
            .or_insert_with(|| {
                let handler = LogHandler::new(label.to_owned().into(), self.shared.clone());
                Arc::new(handler)
            })
            .clone()
    }

    /// Installs the registry as the global [`log`] logger.
    ///
    /// # Panics
    ///
    /// Panics if a logger has already been set.
    pub fn init(self, max_level: log::LevelFilter) {
        self.try_init(max_level)
            .expect("LogRegistry::init should not be called after logger initialization");
    }

    /// Installs the registry as the global [`log`] logger.
    ///
    /// # Errors
    ///
    /// Returns an error if a logger has already been set.
    pub fn try_init(self, max_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_max_level(max_level);
        log::set_boxed_logger(Box::new(self))
    }
}

impl std::fmt::Debug for LogRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRegistry")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl log::Log for LogRegistry {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.handler(metadata.target())
            .is_enabled(metadata.level().into())
    }

    fn log(&self, record: &log::Record) {
        let handler = self.handler(record.target());
        let severity = Severity::from(record.level());
        if !handler.is_enabled(severity) {
            return;
        }

        let mut collector = MetadataCollector::default();
        if let Err(err) = record.key_values().visit(&mut collector) {
            // We can't use `log::error!` here because we are in the middle of logging and
            // this invocation becomes recursive.
            eprintln!("Error reading record key/values: {err}");
        }
        let location = record
            .file()
            .zip(record.line())
            .map(|(file, line)| SourceLocation { file, line });

        handler.emit_at(
            severity,
            &record.args().to_string(),
            collector.0,
            None,
            location,
        );
    }

    fn flush(&self) {
        self.shared.backend.flush();
    }
}

#[derive(Default)]
struct MetadataCollector(Metadata);

impl<'kvs> log::kv::VisitSource<'kvs> for MetadataCollector {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        self.0
            .insert(key.as_str().to_owned().into(), decode_value(&value));
        Ok(())
    }
}

fn decode_value(value: &log::kv::Value<'_>) -> MetadataValue {
    serde_json::to_value(value)
        .map_or_else(|_| value.to_string().into(), MetadataValue::from)
}
