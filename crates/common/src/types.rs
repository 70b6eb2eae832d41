use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one event stream (one wallet).
///
/// The external log names streams `wallet-<uuid>`; see [`AggregateId::parse_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an aggregate ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true for the all-zero UUID, which never names a real stream.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses either a bare UUID or a prefixed stream name such as `wallet-<uuid>`.
    pub fn parse_stream(stream: &str, prefix: &str) -> Option<Self> {
        let raw = stream
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .unwrap_or(stream);
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AggregateId> for Uuid {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}
