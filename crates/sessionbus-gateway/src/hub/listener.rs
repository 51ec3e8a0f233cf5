use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;

use sessionbus_core::{Event, Result};

/// Consumer of events, registered on a hub or directly on a transport.
///
/// Closures `Fn(Event) -> impl Future<Output = Result<()>>` implement this
/// trait, so `Arc::new(|ev: Event| async move { ... Ok(()) })` can be
/// registered as-is.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: Event) -> Result<()>;
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: Event) -> Result<()> {
        (self)(event).await
    }
}

/// Identity of a registered listener (ignores vtable differences).
pub(crate) fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Run listeners one after another, each awaited to completion.
///
/// Errors and panics are logged and contained to the failing listener.
/// Returns how many listeners failed.
pub(crate) async fn deliver(listeners: &[Arc<dyn EventListener>], event: &Event, origin: &str) -> usize {
    let mut failed = 0;
    for listener in listeners {
        match AssertUnwindSafe(listener.on_event(event.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                tracing::warn!(
                    origin,
                    event_type = %event.event_type,
                    event_id = %event.id,
                    code = e.code().as_str(),
                    error = %e,
                    "event listener failed"
                );
            }
            Err(panic) => {
                failed += 1;
                tracing::warn!(
                    origin,
                    event_type = %event.event_type,
                    event_id = %event.id,
                    panic = panic_message(panic.as_ref()),
                    "event listener panicked"
                );
            }
        }
    }
    failed
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
