//! Flush span helpers.

use tracing::Span;

/// Start a span covering one flush.
///
/// Result fields are declared empty and filled by [`record_flush_result`].
pub fn start_flush_span(category: &str, trigger: &str) -> Span {
    tracing::info_span!(
        "batch.flush",
        "batch.category" = category,
        "batch.trigger" = trigger,
        "batch.read" = tracing::field::Empty,
        "batch.delivered" = tracing::field::Empty,
        "batch.collapsed" = tracing::field::Empty,
    )
}

pub fn record_flush_result(span: &Span, read: usize, delivered: usize, collapsed: usize) {
    span.record("batch.read", read as u64);
    span.record("batch.delivered", delivered as u64);
    span.record("batch.collapsed", collapsed as u64);
}
