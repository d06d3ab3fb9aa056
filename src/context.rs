//! Per-request context.
//!
//! The correlation id lives in a tokio task-local, so concurrent requests
//! never see each other's value. Outside a [`RequestContext::scope`] every
//! accessor is a no-op.
//!
//! Each scope also runs inside a `request` span carrying the id, so every
//! log event emitted during the request is tagged with it.

use std::cell::RefCell;
use std::future::Future;
use tracing::field::{Empty, display};
use tracing::{Instrument, Span, info_span};

tokio::task_local! {
    static CORRELATION_ID: RefCell<Option<String>>;
}

/// Generate a fresh correlation id.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Accessors for the current task's request context.
pub struct RequestContext;

impl RequestContext {
    /// Run `f` inside a new context holding `correlation_id`.
    pub async fn scope<F, T>(correlation_id: Option<String>, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let span = info_span!("request", correlation_id = Empty);
        if let Some(id) = &correlation_id {
            span.record("correlation_id", display(id));
        }
        CORRELATION_ID
            .scope(RefCell::new(correlation_id), f.instrument(span))
            .await
    }

    /// Correlation id of the current request, if any.
    pub fn correlation_id() -> Option<String> {
        CORRELATION_ID
            .try_with(|id| id.borrow().clone())
            .ok()
            .flatten()
    }

    /// Replace the correlation id. Returns `false` outside a scope.
    ///
    /// The new id is recorded on the current span when called directly
    /// inside the scope's future.
    pub fn set_correlation_id(correlation_id: impl Into<String>) -> bool {
        let correlation_id = correlation_id.into();
        let set = CORRELATION_ID
            .try_with(|id| *id.borrow_mut() = Some(correlation_id.clone()))
            .is_ok();
        if set {
            Span::current().record("correlation_id", display(&correlation_id));
        }
        set
    }

    /// Clear the context back to its initial state. Log events keep the id
    /// already recorded on the request span.
    pub fn reset() {
        let _ = CORRELATION_ID.try_with(|id| id.borrow_mut().take());
    }
}
