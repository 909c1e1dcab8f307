use std::sync::Arc;

use mdc_logger::{ExecutionUnitId, Metadata, MetadataValue, Severity, emit, metadata};
use pretty_assertions::assert_eq;

use crate::common::{env_logger_backend, isolated_registry};

pub mod common;

#[derive(Debug)]
struct DiskFull;

impl std::fmt::Display for DiskFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("disk full")
    }
}

impl std::error::Error for DiskFull {}

#[test]
fn test_suppressed_records_leave_no_trace() {
    let (registry, backend) = isolated_registry();
    registry.policy().set_default_threshold(Severity::Info);
    let handler = registry.handler("svc");

    handler.debug("x");
    assert!(registry.history().is_empty());
    assert!(backend.records().is_empty());

    handler.warning("x");
    assert_eq!(registry.history().len(), 1);
    assert_eq!(backend.records().len(), 1);
}

#[test]
fn test_wildcard_policy_scenario() {
    let (registry, backend) = isolated_registry();
    registry.policy().set_default_threshold(Severity::Warning);
    let handler = registry.handler("svc");

    handler.emit(Severity::Info, "starting", Metadata::new(), None);
    assert!(registry.history().is_empty());

    handler.emit(Severity::Error, "boom", metadata! { "code" => "E1" }, None);
    let entries = registry.history().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, Severity::Error);
    assert_eq!(entries[0].metadata, metadata! { "code" => "E1" });
    assert_eq!(entries[0].message, "boom");
    assert_eq!(entries[0].error, None);

    let records = backend.records();
    assert_eq!(records[0].label, "svc");
    assert_eq!(records[0].file.as_deref(), Some(file!()));
}

#[test]
fn test_handler_override_beats_policy() {
    let (registry, _backend) = isolated_registry();
    registry.policy().set_threshold("svc", Severity::Error);
    let handler = registry.handler("svc");
    assert_eq!(handler.effective_threshold(), Severity::Error);

    handler.set_severity_override(Some(Severity::Debug));
    assert_eq!(handler.effective_threshold(), Severity::Debug);
    handler.debug("visible");
    registry
        .history()
        .assert_present(Severity::Debug, "visible", None, None);

    handler.set_severity_override(None);
    handler.warning("hidden");
    registry
        .history()
        .assert_absent(Severity::Warning, "hidden", None, None);
}

#[test]
fn test_ambient_context_flows_into_records() {
    let (registry, _backend) = isolated_registry();
    registry.context().set("request_id", "abc");
    let handler = registry.handler("svc");

    handler.info("hello");
    registry.history().assert_present(
        Severity::Info,
        "hello",
        Some(&metadata! { "request_id" => "abc" }),
        None,
    );
}

#[test]
fn test_per_call_metadata_overrides_ambient_keys() {
    let (registry, _backend) = isolated_registry();
    registry.context().set("k", "ambient");
    registry.context().set("only_ambient", "a");
    let handler = registry.handler("svc");

    handler.emit(
        Severity::Info,
        "m",
        metadata! { "k" => "call", "only_call" => "b" },
        None,
    );
    registry.history().assert_present(
        Severity::Info,
        "m",
        Some(&metadata! { "k" => "call", "only_ambient" => "a", "only_call" => "b" }),
        None,
    );
}

#[test]
fn test_local_metadata_replaces_ambient_context() {
    let (registry, _backend) = isolated_registry();
    let handler = registry.handler("svc");
    handler.set_local_metadata(metadata! { "k" => "v1" });
    registry.context().set("k", "v2");
    registry.context().set("j", "w");

    handler.info("m");
    registry
        .history()
        .assert_present(Severity::Info, "m", Some(&metadata! { "k" => "v1" }), None);
}

#[test]
fn test_local_metadata_switch_is_permanent() {
    let (registry, _backend) = isolated_registry();
    registry.context().set("request_id", "abc");
    let handler = registry.handler("svc");
    assert!(!handler.has_local_metadata());

    assert_eq!(handler.set_local_value("k", Some("v".into())), None);
    assert_eq!(handler.local_value("k"), Some(MetadataValue::from("v")));
    assert_eq!(handler.set_local_value("k", None), Some("v".into()));
    assert!(handler.has_local_metadata());
    assert_eq!(handler.local_metadata(), Metadata::new());

    handler.info("m");
    registry.history().assert_present(Severity::Info, "m", None, None);
}

#[test]
fn test_error_is_recorded_by_description() {
    let (registry, backend) = isolated_registry();
    let handler = registry.handler("storage");

    handler.emit(Severity::Critical, "write failed", Metadata::new(), Some(&DiskFull));
    registry
        .history()
        .assert_present(Severity::Critical, "write failed", None, Some("disk full"));
    registry
        .history()
        .assert_absent(Severity::Critical, "write failed", None, None);
    assert_eq!(backend.records()[0].error.as_deref(), Some("disk full"));
}

#[test]
fn test_emit_macro_skips_formatting_when_suppressed() {
    struct Loud;
    impl std::fmt::Display for Loud {
        fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            panic!("formatted a suppressed message");
        }
    }

    let (registry, _backend) = isolated_registry();
    registry.policy().set_threshold("svc", Severity::Error);
    let handler = registry.handler("svc");

    emit!(handler, Severity::Info, "{}", Loud);
    emit!(handler, Severity::Error, { "code" => "E2" }, "failed after {} attempts", 3);
    registry.history().assert_present(
        Severity::Error,
        "failed after 3 attempts",
        Some(&metadata! { "code" => "E2" }),
        None,
    );
}

#[test]
fn test_handlers_on_other_units_do_not_see_context() {
    let (registry, _backend) = isolated_registry();
    registry.context().set("request_id", "main");
    registry
        .context()
        .unit(ExecutionUnitId::synthetic(9))
        .set("request_id", "synthetic");

    let worker_registry = registry.clone();
    std::thread::spawn(move || worker_registry.handler("svc").info("from worker"))
        .join()
        .unwrap();

    let history = registry.history();
    history.assert_present(Severity::Info, "from worker", None, None);
    history.assert_absent(
        Severity::Info,
        "from worker",
        Some(&metadata! { "request_id" => "synthetic" }),
        None,
    );
}

#[test]
fn test_emit_in_uses_the_given_unit_context() {
    let (registry, backend) = isolated_registry();
    registry.context().set("request_id", "main");
    let unit = registry.context().unit(ExecutionUnitId::synthetic(9));
    unit.set("request_id", "synthetic");

    let handler = registry.handler("svc");
    handler.emit_in(
        unit.id(),
        Severity::Info,
        "on synthetic",
        metadata! { "attempt" => 1 },
        None,
    );
    handler.emit_in(
        ExecutionUnitId::synthetic(10),
        Severity::Info,
        "on empty unit",
        Metadata::new(),
        None,
    );
    handler.info("on thread");

    let history = registry.history();
    history.assert_present(
        Severity::Info,
        "on synthetic",
        Some(&metadata! { "request_id" => "synthetic", "attempt" => 1 }),
        None,
    );
    history.assert_present(Severity::Info, "on empty unit", None, None);
    history.assert_present(
        Severity::Info,
        "on thread",
        Some(&metadata! { "request_id" => "main" }),
        None,
    );

    let records = backend.records();
    assert_eq!(records[0].label, "svc");
    assert_eq!(records[0].file.as_deref(), Some(file!()));
}

#[test]
fn test_emit_in_respects_local_metadata_and_threshold() {
    let (registry, _backend) = isolated_registry();
    let unit = registry.context().unit(ExecutionUnitId::synthetic(3));
    unit.set("request_id", "synthetic");
    registry.policy().set_threshold("svc", Severity::Warning);

    let handler = registry.handler("svc");
    handler.emit_in(unit.id(), Severity::Info, "dropped", Metadata::new(), None);
    handler.set_local_metadata(metadata! { "component" => "db" });
    handler.emit_in(unit.id(), Severity::Error, "kept", Metadata::new(), None);

    let history = registry.history();
    assert_eq!(history.len(), 1);
    history.assert_present(
        Severity::Error,
        "kept",
        Some(&metadata! { "component" => "db" }),
        None,
    );
}

#[test]
fn test_concurrent_emitters_share_history() {
    let (registry, _backend) = isolated_registry();
    let handler = registry.handler("svc");

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let handler = Arc::clone(&handler);
            let context = registry.context().clone();
            std::thread::spawn(move || {
                context.scoped(metadata! { "worker" => worker }, || {
                    handler.info("tick");
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut workers: Vec<_> = registry
        .history()
        .entries()
        .into_iter()
        .map(|entry| entry.metadata["worker"].to_string())
        .collect();
    workers.sort();
    assert_eq!(workers, ["0", "1", "2", "3", "4", "5", "6", "7"]);
}

#[test]
fn test_log_backend_forwards_merged_record() {
    let (backend, forwarded) = env_logger_backend();
    let registry = mdc_logger::LogRegistry::new(backend)
        .with_policy(Arc::new(mdc_logger::SeverityPolicy::new()))
        .with_context(Arc::new(mdc_logger::AmbientContext::new()));
    registry.context().set("request_id", "abc");
    let handler = registry.handler("svc");

    handler.emit(
        Severity::Critical,
        "boom",
        metadata! { "code" => "E1", "nested" => vec!["a", "b"] },
        Some(&DiskFull),
    );

    let forwarded = forwarded.lock().unwrap();
    assert_eq!(forwarded.len(), 1);
    let record = &forwarded[0];
    assert_eq!(record.level, log::Level::Error);
    assert_eq!(record.target, "svc");
    assert_eq!(record.message, "boom");
    assert_eq!(record.key_values["request_id"], "abc");
    assert_eq!(record.key_values["code"], "E1");
    assert_eq!(record.key_values["nested"], serde_json::json!(["a", "b"]));
    assert_eq!(record.key_values["severity"], "critical");
    assert!(record.line.is_some());
}
