//! Wallet event catalog.
//!
//! The envelope's `event_type` carries the versioned tag; the payload is only
//! the kind's data, so payloads never repeat the aggregate identity or a full
//! snapshot.

use chrono::{DateTime, Utc};
use common::{AggregateId, TraceContext};
use event_store::{EnvelopeError, EventEnvelope, Version};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::aggregate::DomainEvent;

/// Stream category of every wallet stream; external names are `wallet-<id>`.
pub const AGGREGATE_TYPE: &str = "wallet";

pub const WALLET_CREATED: &str = "V1_WALLET_CREATED";
pub const WALLET_DEBITED: &str = "V1_WALLET_DEBITED";
pub const WALLET_CREDITED: &str = "V1_WALLET_CREDITED";
pub const WALLET_LOCKED: &str = "V1_WALLET_LOCKED";
pub const WALLET_BLACKLISTED: &str = "V1_WALLET_BLACKLISTED";
pub const WALLET_UNLOCKED: &str = "V1_WALLET_UNLOCKED";
pub const WALLET_DELETED: &str = "V1_WALLET_DELETED";
pub const WALLET_UNBLACKLISTED: &str = "V1_WALLET_UNBLACKLISTED";
pub const WALLET_CREDIT_RESERVED: &str = "V1_WALLET_CREDIT_RESERVED";
pub const WALLET_CREDIT_RELEASED: &str = "V1_WALLET_CREDIT_RELEASED";

/// Recovers the aggregate id from an external stream name such as `wallet-<uuid>`.
pub fn wallet_aggregate_id(stream: &str) -> Option<AggregateId> {
    AggregateId::parse_stream(stream, AGGREGATE_TYPE)
}

/// Errors raised while encoding or decoding wallet events.
#[derive(Debug, Error)]
pub enum WalletEventError {
    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    #[error("malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event_type} payload: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

// Field names follow the payloads already written to the log.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WalletCreatedData {
    pub amount: Decimal,
    pub description: String,
    pub user_id: String,
    pub account_id: String,
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WalletDebitedData {
    pub amount: Decimal,
    /// The counterpart wallet that receives the funds.
    pub credit_wallet_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WalletCreditedData {
    pub amount: Decimal,
    /// The counterpart wallet the funds came from.
    pub debit_wallet_id: String,
    pub description: String,
}

/// Payload of credit reservations and releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmountData {
    pub amount: Decimal,
    pub description: String,
}

/// Payload of the flag-only events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptionData {
    pub description: String,
}

/// The closed set of wallet events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Created(WalletCreatedData),
    Debited(WalletDebitedData),
    Credited(WalletCreditedData),
    CreditReserved(AmountData),
    CreditReleased(AmountData),
    Locked(DescriptionData),
    Unlocked(DescriptionData),
    Blacklisted(DescriptionData),
    UnBlacklisted(DescriptionData),
    Deleted(DescriptionData),
}

impl DomainEvent for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::Created(_) => WALLET_CREATED,
            WalletEvent::Debited(_) => WALLET_DEBITED,
            WalletEvent::Credited(_) => WALLET_CREDITED,
            WalletEvent::CreditReserved(_) => WALLET_CREDIT_RESERVED,
            WalletEvent::CreditReleased(_) => WALLET_CREDIT_RELEASED,
            WalletEvent::Locked(_) => WALLET_LOCKED,
            WalletEvent::Unlocked(_) => WALLET_UNLOCKED,
            WalletEvent::Blacklisted(_) => WALLET_BLACKLISTED,
            WalletEvent::UnBlacklisted(_) => WALLET_UNBLACKLISTED,
            WalletEvent::Deleted(_) => WALLET_DELETED,
        }
    }
}

fn describe(description: impl Into<String>) -> DescriptionData {
    DescriptionData {
        description: description.into(),
    }
}

// Factory functions
impl WalletEvent {
    pub fn created(
        amount: Decimal,
        description: impl Into<String>,
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        WalletEvent::Created(WalletCreatedData {
            amount,
            description: description.into(),
            user_id: user_id.into(),
            account_id: account_id.into(),
            id: id.into(),
        })
    }

    pub fn debited(
        credit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        WalletEvent::Debited(WalletDebitedData {
            amount,
            credit_wallet_id: credit_wallet_id.into(),
            description: description.into(),
        })
    }

    pub fn credited(
        debit_wallet_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        WalletEvent::Credited(WalletCreditedData {
            amount,
            debit_wallet_id: debit_wallet_id.into(),
            description: description.into(),
        })
    }

    pub fn credit_reserved(amount: Decimal, description: impl Into<String>) -> Self {
        WalletEvent::CreditReserved(AmountData {
            amount,
            description: description.into(),
        })
    }

    pub fn credit_released(amount: Decimal, description: impl Into<String>) -> Self {
        WalletEvent::CreditReleased(AmountData {
            amount,
            description: description.into(),
        })
    }

    pub fn locked(description: impl Into<String>) -> Self {
        WalletEvent::Locked(describe(description))
    }

    pub fn unlocked(description: impl Into<String>) -> Self {
        WalletEvent::Unlocked(describe(description))
    }

    pub fn blacklisted(description: impl Into<String>) -> Self {
        WalletEvent::Blacklisted(describe(description))
    }

    pub fn unblacklisted(description: impl Into<String>) -> Self {
        WalletEvent::UnBlacklisted(describe(description))
    }

    pub fn deleted(description: impl Into<String>) -> Self {
        WalletEvent::Deleted(describe(description))
    }
}

// Envelope encoding
impl WalletEvent {
    fn payload(&self) -> Result<serde_json::Value, WalletEventError> {
        let encoded = match self {
            WalletEvent::Created(data) => serde_json::to_value(data),
            WalletEvent::Debited(data) => serde_json::to_value(data),
            WalletEvent::Credited(data) => serde_json::to_value(data),
            WalletEvent::CreditReserved(data) | WalletEvent::CreditReleased(data) => {
                serde_json::to_value(data)
            }
            WalletEvent::Locked(data)
            | WalletEvent::Unlocked(data)
            | WalletEvent::Blacklisted(data)
            | WalletEvent::UnBlacklisted(data)
            | WalletEvent::Deleted(data) => serde_json::to_value(data),
        };
        encoded.map_err(|source| WalletEventError::Encode {
            event_type: self.event_type(),
            source,
        })
    }

    /// Stamps this event into an envelope bound to a wallet stream at `version`,
    /// carrying `trace` in its metadata.
    pub fn to_envelope(
        &self,
        aggregate_id: AggregateId,
        version: Version,
        timestamp: DateTime<Utc>,
        trace: &TraceContext,
    ) -> Result<EventEnvelope, WalletEventError> {
        let envelope = EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type(AGGREGATE_TYPE)
            .event_type(self.event_type())
            .version(version)
            .timestamp(timestamp)
            .payload_raw(self.payload()?)
            .trace(trace)
            .map_err(|source| WalletEventError::Encode {
                event_type: self.event_type(),
                source,
            })?
            .build()?;
        Ok(envelope)
    }

    /// Decodes an envelope, dispatching on its tag.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, WalletEventError> {
        fn decode<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T, WalletEventError> {
            envelope
                .payload_as()
                .map_err(|source| WalletEventError::MalformedPayload {
                    event_type: envelope.event_type.clone(),
                    source,
                })
        }

        let event = match envelope.event_type.as_str() {
            WALLET_CREATED => WalletEvent::Created(decode(envelope)?),
            WALLET_DEBITED => WalletEvent::Debited(decode(envelope)?),
            WALLET_CREDITED => WalletEvent::Credited(decode(envelope)?),
            WALLET_CREDIT_RESERVED => WalletEvent::CreditReserved(decode(envelope)?),
            WALLET_CREDIT_RELEASED => WalletEvent::CreditReleased(decode(envelope)?),
            WALLET_LOCKED => WalletEvent::Locked(decode(envelope)?),
            WALLET_UNLOCKED => WalletEvent::Unlocked(decode(envelope)?),
            WALLET_BLACKLISTED => WalletEvent::Blacklisted(decode(envelope)?),
            WALLET_UNBLACKLISTED => WalletEvent::UnBlacklisted(decode(envelope)?),
            WALLET_DELETED => WalletEvent::Deleted(decode(envelope)?),
            other => return Err(WalletEventError::InvalidEventType(other.to_string())),
        };
        Ok(event)
    }
}
