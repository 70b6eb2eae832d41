//! Wallet read model for the CQRS query side.
//!
//! - [`WalletProjection`] records and the [`WalletReadStore`] contract, with
//!   in-memory and PostgreSQL stores
//! - [`WalletProjector`] applying one event with duplicate and conflict handling
//! - [`ProjectionWorker`] driving the projector from a persistent subscription

pub mod error;
pub mod memory;
pub mod postgres;
pub mod projector;
pub mod read_model;
pub mod worker;

pub use error::{ProjectionError, Result};
pub use memory::InMemoryWalletReadStore;
pub use postgres::PostgresWalletReadStore;
pub use projector::{ApplyOutcome, DEFAULT_MAX_CONFLICT_RETRIES, RebuildSummary, WalletProjector};
pub use read_model::{WalletProjection, WalletReadStore};
pub use worker::{ProjectionWorker, WorkerState};
