//! Wallet aggregate implementation.

use std::sync::Arc;

use common::{AggregateId, TraceContext};
use event_store::{EventEnvelope, Version};
use rust_decimal::Decimal;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::clock::{Clock, SystemClock};
use crate::error::{DomainError, FoldError};

use super::{
    AGGREGATE_TYPE, Wallet, WalletEvent, WalletLink, WalletSnapshot, WalletState,
    WalletTransaction,
};

/// In-memory reconstruction of one wallet stream.
///
/// Hydrated by folding the stream, then used for a single command flow and
/// discarded; the event log stays the source of truth. Commands fold their own
/// event immediately, so the instance reflects what it has staged.
#[derive(Clone)]
pub struct WalletAggregate {
    id: AggregateId,
    version: Version,
    snapshot: WalletSnapshot,
    link: Option<WalletLink>,
    uncommitted: Vec<EventEnvelope>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WalletAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletAggregate")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("snapshot", &self.snapshot)
            .field("link", &self.link)
            .field("uncommitted", &self.uncommitted.len())
            .finish_non_exhaustive()
    }
}

impl Default for WalletAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregate for WalletAggregate {
    type Event = WalletEvent;

    fn aggregate_type() -> &'static str {
        AGGREGATE_TYPE
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn apply(&mut self, event: &WalletEvent) -> Result<(), FoldError> {
        let at = self.clock.now();
        self.snapshot.apply(event, at)?;
        Ok(())
    }
}

// Construction and replay
impl WalletAggregate {
    /// Creates an empty aggregate with a fresh id.
    pub fn new() -> Self {
        Self::empty(AggregateId::new())
    }

    /// Creates an empty aggregate for a known stream. The nil id names no
    /// stream and yields `None`.
    pub fn with_id(id: AggregateId) -> Option<Self> {
        if id.is_nil() {
            return None;
        }
        Some(Self::empty(id))
    }

    fn empty(id: AggregateId) -> Self {
        let mut snapshot = WalletSnapshot::default();
        snapshot.wallet.id = id.to_string();
        Self {
            id,
            version: Version::initial(),
            snapshot,
            link: None,
            uncommitted: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used to stamp fold-time timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rebuilds a wallet from its stream, oldest first.
    ///
    /// Versions must run 1, 2, 3... without gaps; anything else is a
    /// data-integrity error and nothing is returned.
    pub fn load<'a>(
        id: AggregateId,
        events: impl IntoIterator<Item = &'a EventEnvelope>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        let mut aggregate = Self::with_id(id)
            .ok_or(DomainError::WalletNotFound(id))?
            .with_clock(clock);
        for envelope in events {
            aggregate.fold(envelope)?;
        }
        Ok(aggregate)
    }

    /// Folds one stored event onto the current state.
    pub fn fold(&mut self, envelope: &EventEnvelope) -> Result<(), FoldError> {
        if envelope.aggregate_id != self.id {
            return Err(FoldError::AggregateMismatch {
                expected: self.id,
                actual: envelope.aggregate_id,
            });
        }
        let expected = self.version.next();
        if envelope.version != expected {
            return Err(FoldError::VersionMismatch {
                expected,
                actual: envelope.version,
            });
        }

        let event = WalletEvent::from_envelope(envelope)?;
        self.apply(&event)?;
        self.version = envelope.version;
        Ok(())
    }
}

// Query methods
impl WalletAggregate {
    pub fn wallet(&self) -> &Wallet {
        &self.snapshot.wallet
    }

    pub fn state(&self) -> &WalletState {
        &self.snapshot.state
    }

    pub fn transactions(&self) -> &[WalletTransaction] {
        &self.snapshot.transactions
    }

    pub fn snapshot(&self) -> &WalletSnapshot {
        &self.snapshot
    }

    /// The contact link bound to this wallet. No event in the catalog sets it yet.
    pub fn link(&self) -> Option<&WalletLink> {
        self.link.as_ref()
    }

    /// True when no event has been folded or staged.
    pub fn is_not_found(&self) -> bool {
        self.version == Version::initial()
    }

    /// Events staged by commands and not yet appended.
    pub fn uncommitted_events(&self) -> &[EventEnvelope] {
        &self.uncommitted
    }

    /// Drains the staged events for append.
    pub fn take_uncommitted(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.uncommitted)
    }

    /// Stream head the log must still be at for the staged events to append.
    pub fn expected_version(&self) -> Version {
        self.version.rewind(self.uncommitted.len())
    }
}

// Command methods (stage events)
impl WalletAggregate {
    fn record(&mut self, event: WalletEvent, trace: &TraceContext) -> Result<(), DomainError> {
        let version = self.version.next();
        let span = trace.child();
        let envelope = event
            .to_envelope(self.id, version, self.clock.now(), &span)
            .map_err(DomainError::EventConstruction)?;

        tracing::debug!(
            aggregate_id = %self.id,
            event_type = event.event_type(),
            %version,
            "staging wallet event"
        );

        self.apply(&event)?;
        self.version = version;
        self.uncommitted.push(envelope);
        Ok(())
    }

    pub fn create_wallet(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        id: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        let event = WalletEvent::created(amount, description, user_id, account_id, id);
        self.record(event, trace)
    }

    pub fn credit_wallet(
        &mut self,
        debit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(
            WalletEvent::credited(debit_wallet_id, amount, description),
            trace,
        )
    }

    pub fn debit_wallet(
        &mut self,
        credit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(
            WalletEvent::debited(credit_wallet_id, amount, description),
            trace,
        )
    }

    pub fn reserve_wallet_credit(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::credit_reserved(amount, description), trace)
    }

    pub fn release_wallet_credit(
        &mut self,
        amount: Decimal,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::credit_released(amount, description), trace)
    }

    pub fn lock_wallet(
        &mut self,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::locked(description), trace)
    }

    pub fn unlock_wallet(
        &mut self,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::unlocked(description), trace)
    }

    pub fn blacklist_wallet(
        &mut self,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::blacklisted(description), trace)
    }

    pub fn unblacklist_wallet(
        &mut self,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::unblacklisted(description), trace)
    }

    pub fn delete_wallet(
        &mut self,
        description: impl Into<String>,
        trace: &TraceContext,
    ) -> Result<(), DomainError> {
        self.record(WalletEvent::deleted(description), trace)
    }
}
