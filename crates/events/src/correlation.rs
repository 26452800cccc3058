//! Flow-scoped correlation tracking.
//!
//! Every inbound message is processed inside [`scope`], which makes its correlation
//! id the current one for that logical flow only. Nested scopes behave as a stack:
//! the inner id wins while the inner future runs and the outer id is visible again
//! afterwards, whether the inner future completed, failed or was dropped.
//! Messages processed concurrently on other tasks never observe each other's ids.

use std::future::Future;

use jitney_core::CorrelationId;

tokio::task_local! {
    static CURRENT: CorrelationId;
}

/// Run `future` with `correlation_id` as the current correlation id.
pub async fn scope<F>(correlation_id: CorrelationId, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(correlation_id, future).await
}

/// Innermost active correlation id for the current flow, if any.
pub fn current() -> Option<CorrelationId> {
    CURRENT.try_with(|id| *id).ok()
}
