//! Shared identifier and tracing-carrier types.

mod trace;
mod types;

pub use trace::TraceContext;
pub use types::AggregateId;
