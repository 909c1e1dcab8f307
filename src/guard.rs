//! A scoped ambient context override.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{Metadata, StaticCowStr, context::UnitContext};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(0);

/// A guard holding temporary overrides in the ambient context of one execution unit.
///
/// When the guard is dropped, every overridden key gets its previous value back, and
/// keys that did not exist before are removed. Dropping also happens while unwinding,
/// so the context is restored when the guarded code panics.
///
/// Guards may be dropped in any order. A guard dropped while a newer guard still
/// overrides the same key leaves the newer value visible, and the newer guard later
/// restores the value that was there before both.
/// This is returned by [`AmbientContext::enter`](crate::AmbientContext::enter).
///
/// # Examples
///
/// ```
/// use mdc_logger::{AmbientContext, metadata};
///
/// let context = AmbientContext::new();
///
/// // Apply the overrides.
/// let guard = context.enter(metadata! { "user_id" => 123 });
/// assert!(context.get("user_id").is_some());
///
/// // When `guard` goes out of scope, the key is removed again.
/// drop(guard);
/// assert!(context.get("user_id").is_none());
/// ```
#[derive(Debug)]
pub struct AmbientScopeGuard<'a> {
    unit: UnitContext<'a>,
    scope: u64,
    keys: Vec<StaticCowStr>,
    // Make this guard unsendable.
    _marker: PhantomData<*mut ()>,
}

impl<'a> AmbientScopeGuard<'a> {
    pub(crate) fn enter(unit: UnitContext<'a>, metadata: Metadata) -> Self {
        let scope = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        let keys = unit.open_scope(scope, metadata);
        Self {
            unit,
            scope,
            keys,
            _marker: PhantomData,
        }
    }
}

impl Drop for AmbientScopeGuard<'_> {
    fn drop(&mut self) {
        self.unit.close_scope(self.scope, &self.keys);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{AmbientContext, ExecutionUnitId, Metadata, metadata};

    #[test]
    fn test_scope_guard_enter() {
        let context = AmbientContext::new();
        let unit = context.unit(ExecutionUnitId::synthetic(1));
        assert_eq!(unit.snapshot(), Metadata::new());

        let guard = unit.enter(metadata! { "simple" => 42 });
        assert_eq!(unit.snapshot(), metadata! { "simple" => 42 });

        drop(guard);
        assert_eq!(unit.snapshot(), Metadata::new());
    }

    #[test]
    fn test_nested_scopes_restore_previous_values() {
        let context = AmbientContext::new();
        let unit = context.unit(ExecutionUnitId::synthetic(1));
        unit.set("untouched", "yes");

        let outer_guard = unit.enter(metadata! { "simple_record" => "outer_value" });
        assert_eq!(unit.get("simple_record"), Some("outer_value".into()));
        {
            let _inner_guard = unit.enter(metadata! {
                "simple_record" => "inner_value",
                "inner_only" => "x",
            });
            assert_eq!(unit.get("simple_record"), Some("inner_value".into()));
            assert_eq!(unit.get("inner_only"), Some("x".into()));
        }
        assert_eq!(unit.get("simple_record"), Some("outer_value".into()));
        assert_eq!(unit.get("inner_only"), None);

        drop(outer_guard);
        assert_eq!(unit.snapshot(), metadata! { "untouched" => "yes" });
    }

    #[test]
    fn test_scoped_restores_on_error() {
        let context = AmbientContext::new();
        context.set("k", "before");

        let overrides = metadata! { "k" => "during", "j" => "x" };
        let result: Result<(), &str> = context.scoped(overrides, || {
            assert_eq!(context.get("k"), Some("during".into()));
            Err("failed")
        });

        assert_eq!(result, Err("failed"));
        assert_eq!(context.snapshot(), metadata! { "k" => "before" });
    }

    #[test]
    fn test_scoped_restores_on_panic() {
        let context = AmbientContext::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            context.scoped(metadata! { "k" => "during" }, || -> () {
                assert_eq!(context.get("k"), Some("during".into()));
                panic!("body failed");
            });
        }));

        assert!(result.is_err());
        assert_eq!(context.get("k"), None);
    }

    #[test]
    fn test_guards_dropped_out_of_order() {
        let context = AmbientContext::new();
        let unit = context.unit(ExecutionUnitId::synthetic(1));

        let a = unit.enter(metadata! { "k" => "a" });
        let b = unit.enter(metadata! { "k" => "b" });
        drop(a);
        assert_eq!(unit.get("k"), Some("b".into()));
        drop(b);
        assert_eq!(unit.get("k"), None);
        assert_eq!(context.active_units(), 0);
    }

    #[test]
    fn test_out_of_order_drop_restores_original_value() {
        let context = AmbientContext::new();
        let unit = context.unit(ExecutionUnitId::synthetic(1));
        unit.set("k", "original");

        let a = unit.enter(metadata! { "k" => "a", "only_a" => "x" });
        let b = unit.enter(metadata! { "k" => "b" });
        let c = unit.enter(metadata! { "k" => "c" });
        drop(b);
        assert_eq!(unit.get("k"), Some("c".into()));
        drop(a);
        assert_eq!(unit.snapshot(), metadata! { "k" => "c" });
        drop(c);
        assert_eq!(unit.snapshot(), metadata! { "k" => "original" });
    }

    #[test]
    fn test_guard_dropped_after_reset_is_noop() {
        let context = AmbientContext::new();
        let guard = context.enter(metadata! { "k" => "v" });

        context.reset_all();
        context.set("k", "fresh");
        drop(guard);
        assert_eq!(context.get("k"), Some("fresh".into()));
    }
}
