//! # Trace Context
//!
//! W3C trace/span identifiers stored on a transaction so that every event of
//! its life can be stitched into one distributed trace. The transaction
//! carries the root context created by `create_tx`; each processed event gets
//! a child span id, and its `tracing` span is parented to the stored context
//! through `tracing-opentelemetry` when an OpenTelemetry layer is installed.

use opentelemetry::trace::{
    SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
}

impl TraceContext {
    /// Fresh trace with a new root span.
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::from_bytes(*Uuid::new_v4().as_bytes()),
            span_id: random_span_id(),
        }
    }

    /// Parses hex identifiers. `None` for malformed or all-zero ids.
    pub fn parse(trace_id: &str, span_id: &str) -> Option<Self> {
        let trace_id = TraceId::from_hex(trace_id).ok()?;
        let span_id = SpanId::from_hex(span_id).ok()?;

        if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
            return None;
        }

        Some(Self { trace_id, span_id })
    }

    /// New span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: random_span_id(),
        }
    }

    /// 32 lowercase hex digits.
    pub fn trace_id(&self) -> String {
        self.trace_id.to_string()
    }

    /// 16 lowercase hex digits.
    pub fn span_id(&self) -> String {
        self.span_id.to_string()
    }

    /// Makes this context the remote parent of `span`.
    pub fn link(&self, span: &tracing::Span) {
        let parent = SpanContext::new(
            self.trace_id,
            self.span_id,
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        span.set_parent(opentelemetry::Context::new().with_remote_span_context(parent));
    }
}

fn random_span_id() -> SpanId {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&Uuid::new_v4().as_bytes()[..8]);
    SpanId::from_bytes(bytes)
}
