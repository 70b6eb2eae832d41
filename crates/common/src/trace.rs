use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Carrier for propagating a trace across the event log.
///
/// Commands write it into event metadata; the projection reads it back so the
/// apply span can be correlated with the command that produced the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Uuid>,
}

impl TraceContext {
    /// Metadata key under which the carrier is stored on an event.
    pub const METADATA_KEY: &'static str = "trace";

    /// Starts a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
        }
    }

    /// Derives a child span within the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new_root()
    }
}
