//! # Overview
//!
#![doc = include_utils::include_md!("README.md:description")]
//!
//! The crate is organised around a few small pieces:
//!
//! - [`Severity`] and [`SeverityPolicy`] decide whether a record for a given label is emitted.
//! - [`AmbientContext`] holds diagnostic key/values per thread or synthetic execution unit.
//! - [`LogHandler`] merges the base context and per-call metadata into one record and
//!   forwards it to a [`Backend`] and to the [`RecordedHistory`].
//! - [`LogRegistry`] caches handlers per label and bridges the standard [`log`] macros.
//!
//! ## Basic example
//!
#![doc = include_utils::include_md!("README.md:basic_example")]
//!
//! ## Async Context Propagation
//!
#![doc = include_utils::include_md!("README.md:async_example")]

use std::borrow::Cow;

pub use self::{
    backend::{Backend, LogBackend, LogRecord, NullBackend, SourceLocation},
    context::{AmbientContext, ExecutionUnitId, UnitContext},
    error::ConfigError,
    future::{AmbientContextFuture, FutureExt},
    guard::AmbientScopeGuard,
    handler::LogHandler,
    history::{HistoryEntry, RecordedHistory},
    policy::{DEFAULT_ENV_VAR, PolicyConfig, SeverityPolicy, WILDCARD},
    registry::LogRegistry,
    severity::{ParseSeverityError, Severity},
    value::{Metadata, MetadataValue, merge},
};

mod backend;
mod context;
mod error;
pub mod future;
pub mod guard;
mod handler;
mod history;
mod macros;
mod policy;
mod registry;
mod severity;
mod value;

/// Owned or static string used for labels and metadata keys.
pub type StaticCowStr = Cow<'static, str>;
