//! Carrying ambient context across task boundaries.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use pin_project::pin_project;

use crate::{AmbientContext, Metadata, UnitContext, context::ContextFrame};

/// Extension trait attaching ambient context to a future.
///
/// Ambient context is bound to the thread that polls a future, and a spawned task
/// may be polled by any worker thread. Wrapping the future makes every poll run with
/// the carried metadata installed as the whole context of the polling thread.
///
/// # Example
///
/// ```
/// use mdc_logger::{AmbientContext, FutureExt};
///
/// # futures_util::future::FutureExt::now_or_never(async {
/// let context = AmbientContext::global();
/// context.set("request_id", "abc");
///
/// // Capture on the producer side, reapply on whichever thread polls the task.
/// let task = async {
///     assert_eq!(
///         AmbientContext::global().get("request_id").unwrap().as_str(),
///         Some("abc")
///     );
/// }
/// .with_current_ambient_context();
/// task.await;
/// # context.remove("request_id");
/// # }).unwrap();
/// ```
pub trait FutureExt: Future + Sized {
    /// Polls the future with `metadata` as the global ambient context of the polling thread.
    fn in_ambient_context(self, metadata: Metadata) -> AmbientContextFuture<Self> {
        self.in_ambient_context_of(AmbientContext::global(), metadata)
    }

    /// Same as [`FutureExt::in_ambient_context`], for an explicit context table.
    fn in_ambient_context_of(
        self,
        context: Arc<AmbientContext>,
        metadata: Metadata,
    ) -> AmbientContextFuture<Self>;

    /// Captures the calling thread's global ambient context and carries it into the future.
    fn with_current_ambient_context(self) -> AmbientContextFuture<Self> {
        let metadata = AmbientContext::global().snapshot();
        self.in_ambient_context(metadata)
    }
}

impl<F> FutureExt for F
where
    F: Future,
{
    fn in_ambient_context_of(
        self,
        context: Arc<AmbientContext>,
        metadata: Metadata,
    ) -> AmbientContextFuture<Self> {
        AmbientContextFuture {
            inner: self,
            context,
            frame: Some(ContextFrame::new(metadata)),
        }
    }
}

/// Future returned by the [`FutureExt`] methods.
#[pin_project]
#[derive(Debug)]
pub struct AmbientContextFuture<F> {
    #[pin]
    inner: F,
    context: Arc<AmbientContext>,
    frame: Option<ContextFrame>,
}

impl<F> AmbientContextFuture<F> {
    /// Returns the metadata the future currently carries.
    ///
    /// Changes the future made to its ambient context during earlier polls are included.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.frame.as_ref().map(ContextFrame::values)
    }
}

impl<F> Future for AmbientContextFuture<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let unit = this.context.current();
        unit.install(this.frame.take().unwrap_or_default());
        let installed = InstalledFrame {
            unit,
            active: true,
        };
        let result = this.inner.poll(cx);
        this.frame.replace(installed.finish());

        result
    }
}

/// Takes the carried frame off the polling thread again, even if the inner poll panics.
struct InstalledFrame<'a> {
    unit: UnitContext<'a>,
    active: bool,
}

impl InstalledFrame<'_> {
    fn finish(mut self) -> ContextFrame {
        self.active = false;
        self.unit.uninstall()
    }
}

impl Drop for InstalledFrame<'_> {
    fn drop(&mut self) {
        if self.active {
            self.unit.uninstall();
        }
    }
}
