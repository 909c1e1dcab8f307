#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use log::{Level, LevelFilter, Record, kv::Key};
use mdc_logger::{
    AmbientContext, Backend, LogBackend, LogRecord, LogRegistry, Metadata, Severity, SeverityPolicy,
};

/// A record as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub severity: Severity,
    pub label: String,
    pub message: String,
    pub metadata: Metadata,
    pub error: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectingBackend {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

impl CollectingBackend {
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Backend for CollectingBackend {
    fn log(&self, record: &LogRecord<'_>) {
        self.records.lock().unwrap().push(CapturedRecord {
            severity: record.severity,
            label: record.label.to_owned(),
            message: record.message.to_owned(),
            metadata: record.metadata.clone(),
            error: record.error.map(ToString::to_string),
            file: record.location.map(|location| location.file.to_owned()),
        });
    }
}

/// A registry with its own policy, ambient context and history.
pub fn isolated_registry() -> (LogRegistry, CollectingBackend) {
    let backend = CollectingBackend::default();
    let registry = LogRegistry::new(backend.clone())
        .with_policy(Arc::new(SeverityPolicy::new()))
        .with_context(Arc::new(AmbientContext::new()));
    (registry, backend)
}

pub trait RecordExt {
    fn get_record(&self, key: &str) -> Option<serde_json::Value>;
}

impl RecordExt for Record<'_> {
    fn get_record(&self, key: &str) -> Option<serde_json::Value> {
        let key = Key::from_str(key);
        let val = self.key_values().get(key)?;
        serde_json::to_value(val).ok()
    }
}

/// A `log::Record` as received by the wrapped `log::Log` implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub key_values: BTreeMap<String, serde_json::Value>,
    pub line: Option<u32>,
}

/// Builds an `env_logger` backed [`LogBackend`] that keeps the forwarded records.
pub fn env_logger_backend() -> (LogBackend, Arc<Mutex<Vec<ForwardedRecord>>>) {
    const KEYS: [&str; 4] = ["request_id", "code", "nested", "severity"];

    let forwarded = Arc::new(Mutex::new(Vec::new()));
    let sink = forwarded.clone();
    let env_logger = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .format(move |_fmt, record| {
            let key_values = KEYS
                .iter()
                .filter_map(|key| Some(((*key).to_owned(), record.get_record(key)?)))
                .collect();
            sink.lock().unwrap().push(ForwardedRecord {
                level: record.level(),
                target: record.target().to_owned(),
                message: record.args().to_string(),
                key_values,
                line: record.line(),
            });
            Ok(())
        })
        .build();
    (LogBackend::new(env_logger), forwarded)
}
