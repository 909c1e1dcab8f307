//! Mapped diagnostic context keyed by execution unit.

use std::{
    collections::HashMap,
    iter,
    sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError},
    thread::ThreadId,
};

use crate::{
    Metadata, MetadataValue, StaticCowStr,
    guard::AmbientScopeGuard,
};

static GLOBAL_CONTEXT: LazyLock<Arc<AmbientContext>> =
    LazyLock::new(|| Arc::new(AmbientContext::new()));

/// Identifies the execution unit that owns an ambient context entry.
///
/// This is only a lookup key. Threads are identified by their [`ThreadId`], tests may
/// use [`ExecutionUnitId::synthetic`] to get deterministic units without spawning threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionUnitId {
    Thread(ThreadId),
    Synthetic(u64),
}

impl ExecutionUnitId {
    /// Returns the identifier of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self::Thread(std::thread::current().id())
    }

    #[must_use]
    pub const fn synthetic(id: u64) -> Self {
        Self::Synthetic(id)
    }
}

/// A key override made by one scope guard.
#[derive(Debug)]
struct ScopeOverride {
    scope: u64,
    previous: Option<MetadataValue>,
}

/// Visible values of a unit together with the scope overrides applied to them.
///
/// Every overridden key keeps a stack of the scopes that changed it, oldest first.
/// Each record holds the value the key had right before that scope, so a scope can
/// be closed in any order.
#[derive(Debug, Default)]
pub(crate) struct ContextFrame {
    values: Metadata,
    scopes: HashMap<StaticCowStr, Vec<ScopeOverride>>,
}

impl ContextFrame {
    pub(crate) fn new(values: Metadata) -> Self {
        Self {
            values,
            scopes: HashMap::new(),
        }
    }

    pub(crate) const fn values(&self) -> &Metadata {
        &self.values
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.scopes.is_empty()
    }

    fn open_scope(&mut self, scope: u64, metadata: Metadata) -> Vec<StaticCowStr> {
        metadata
            .into_iter()
            .map(|(key, value)| {
                let previous = self.values.insert(key.clone(), value);
                self.scopes
                    .entry(key.clone())
                    .or_default()
                    .push(ScopeOverride { scope, previous });
                key
            })
            .collect()
    }

    /// Undoes the override `scope` made to `key`. Returns `false` if this frame
    /// holds no such override.
    fn close_scope(&mut self, scope: u64, key: &StaticCowStr) -> bool {
        let Some(stack) = self.scopes.get_mut(key) else {
            return false;
        };
        let Some(position) = stack.iter().position(|item| item.scope == scope) else {
            return false;
        };

        let closed = stack.remove(position);
        if let Some(newer) = stack.get_mut(position) {
            // The key still shows the newer scope's value; it has to fall back to what
            // the closed scope saw.
            newer.previous = closed.previous;
        } else {
            match closed.previous {
                Some(value) => self.values.insert(key.clone(), value),
                None => self.values.remove(key),
            };
        }
        if stack.is_empty() {
            self.scopes.remove(key);
        }
        true
    }
}

/// Context of one execution unit: its own frame plus the frames installed by futures
/// currently being polled on it. The last installed frame is the visible one.
#[derive(Debug, Default)]
struct UnitEntry {
    own: ContextFrame,
    installed: Vec<ContextFrame>,
}

impl UnitEntry {
    fn active(&self) -> &ContextFrame {
        self.installed.last().unwrap_or(&self.own)
    }

    fn active_mut(&mut self) -> &mut ContextFrame {
        match self.installed.last_mut() {
            Some(frame) => frame,
            None => &mut self.own,
        }
    }

    fn frames_mut(&mut self) -> impl Iterator<Item = &mut ContextFrame> {
        self.installed
            .iter_mut()
            .rev()
            .chain(iter::once(&mut self.own))
    }

    fn is_idle(&self) -> bool {
        self.installed.is_empty() && self.own.is_empty()
    }
}

/// A table of diagnostic key/value pairs per execution unit.
///
/// Values stored for a unit are visible to every log call made later on that unit.
/// Nothing is inherited across units: work handed to another thread or task has to
/// carry a [`snapshot`](Self::snapshot) explicitly, see [`FutureExt`](crate::FutureExt).
/// A unit whose context becomes empty is dropped from the table.
///
/// # Example
///
/// ```
/// use mdc_logger::{AmbientContext, metadata};
///
/// let context = AmbientContext::new();
/// context.set("request_id", "abc");
///
/// context.scoped(metadata! { "request_id" => "nested" }, || {
///     assert_eq!(context.get("request_id").unwrap().as_str(), Some("nested"));
/// });
/// assert_eq!(context.get("request_id").unwrap().as_str(), Some("abc"));
/// ```
#[derive(Debug, Default)]
pub struct AmbientContext {
    units: Mutex<HashMap<ExecutionUnitId, UnitEntry>>,
}

impl AmbientContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide context, creating it on first use.
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL_CONTEXT.clone()
    }

    /// Returns a view of the context bound to an explicit execution unit.
    #[must_use]
    pub const fn unit(&self, unit: ExecutionUnitId) -> UnitContext<'_> {
        UnitContext {
            context: self,
            unit,
        }
    }

    /// Returns a view of the context bound to the calling thread.
    #[must_use]
    pub fn current(&self) -> UnitContext<'_> {
        self.unit(ExecutionUnitId::current())
    }

    /// Reads `key` from the calling thread's context.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MetadataValue> {
        self.current().get(key)
    }

    /// Sets `key` in the calling thread's context.
    pub fn set(&self, key: impl Into<StaticCowStr>, value: impl Into<MetadataValue>) {
        self.current().set(key, value);
    }

    /// Removes `key` from the calling thread's context.
    pub fn remove(&self, key: &str) -> Option<MetadataValue> {
        self.current().remove(key)
    }

    /// Returns a copy of the calling thread's context.
    #[must_use]
    pub fn snapshot(&self) -> Metadata {
        self.current().snapshot()
    }

    /// Overrides keys in the calling thread's context until the guard is dropped.
    #[must_use]
    pub fn enter(&self, metadata: Metadata) -> AmbientScopeGuard<'_> {
        self.current().enter(metadata)
    }

    /// Runs `body` with `metadata` applied to the calling thread's context.
    ///
    /// The overridden keys are restored when `body` returns or unwinds.
    pub fn scoped<R>(&self, metadata: Metadata, body: impl FnOnce() -> R) -> R {
        self.current().scoped(metadata, body)
    }

    /// Clears the context of every execution unit.
    ///
    /// Meant for test teardown; ordinary code should restore what it sets.
    pub fn reset_all(&self) {
        self.lock().clear();
    }

    /// Returns the number of execution units that currently hold any context.
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExecutionUnitId, UnitEntry>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<R>(&self, unit: ExecutionUnitId, read: impl FnOnce(&ContextFrame) -> R) -> Option<R> {
        self.lock().get(&unit).map(|entry| read(entry.active()))
    }

    /// Runs `update` on the entry of `unit` and drops the entry if it is left idle.
    fn update<R>(&self, unit: ExecutionUnitId, update: impl FnOnce(&mut UnitEntry) -> R) -> R {
        let mut units = self.lock();
        let entry = units.entry(unit).or_default();
        let result = update(entry);
        if entry.is_idle() {
            units.remove(&unit);
        }
        result
    }
}

/// The ambient context of a single execution unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitContext<'a> {
    context: &'a AmbientContext,
    unit: ExecutionUnitId,
}

impl<'a> UnitContext<'a> {
    #[must_use]
    pub const fn id(&self) -> ExecutionUnitId {
        self.unit
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<MetadataValue> {
        self.context
            .read(self.unit, |frame| frame.values.get(key).cloned())
            .flatten()
    }

    pub fn set(&self, key: impl Into<StaticCowStr>, value: impl Into<MetadataValue>) {
        let (key, value) = (key.into(), value.into());
        self.context.update(self.unit, |entry| {
            entry.active_mut().values.insert(key, value);
        });
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<MetadataValue> {
        self.context
            .update(self.unit, |entry| entry.active_mut().values.remove(key))
    }

    /// Sets `key` to `value`, or removes it when `value` is `None`.
    ///
    /// Returns the previous value.
    pub fn put(&self, key: StaticCowStr, value: Option<MetadataValue>) -> Option<MetadataValue> {
        self.context.update(self.unit, |entry| {
            let values = &mut entry.active_mut().values;
            match value {
                Some(value) => values.insert(key, value),
                None => values.remove(&key),
            }
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> Metadata {
        self.context
            .read(self.unit, |frame| frame.values.clone())
            .unwrap_or_default()
    }

    /// Overrides keys until the returned guard is dropped.
    #[must_use]
    pub fn enter(&self, metadata: Metadata) -> AmbientScopeGuard<'a> {
        AmbientScopeGuard::enter(*self, metadata)
    }

    /// Runs `body` with `metadata` applied, restoring the overridden keys on every exit path.
    pub fn scoped<R>(&self, metadata: Metadata, body: impl FnOnce() -> R) -> R {
        let _guard = self.enter(metadata);
        body()
    }

    pub(crate) fn open_scope(&self, scope: u64, metadata: Metadata) -> Vec<StaticCowStr> {
        self.context
            .update(self.unit, |entry| entry.active_mut().open_scope(scope, metadata))
    }

    /// Closes `scope` for each of `keys`, in whichever frame the override was made.
    pub(crate) fn close_scope(&self, scope: u64, keys: &[StaticCowStr]) {
        self.context.update(self.unit, |entry| {
            for key in keys {
                for frame in entry.frames_mut() {
                    if frame.close_scope(scope, key) {
                        break;
                    }
                }
            }
        });
    }

    /// Makes `frame` the visible context of the unit until [`uninstall`](Self::uninstall).
    pub(crate) fn install(&self, frame: ContextFrame) {
        self.context
            .update(self.unit, |entry| entry.installed.push(frame));
    }

    /// Removes the most recently installed frame and returns it.
    pub(crate) fn uninstall(&self) -> ContextFrame {
        self.context
            .update(self.unit, |entry| entry.installed.pop().unwrap_or_default())
    }
}
