//! Wire protocol between authorities and mirrors
//!
//! # Protocol Design
//!
//! - Frames are serialized with bincode inside a versioned envelope
//! - Requests carry identities and parameters, never item bodies
//! - Confirmations echo the request id and carry full copies of every
//!   container the mutation touched, so receivers overwrite instead of merge

use crate::error::{MutationError, SyncError};
use crate::mutation::Mutation;
use serde::{Deserialize, Serialize};
use std::fmt;
use void_inventory::{Container, InstanceId, InventoryConfig, InventoryKind, Seed, TagSet, TagValues, UniqueId};

/// Protocol version for compatibility checks
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifier of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(u64);

impl PeerId {
    /// Create a new unique peer ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Unique identifier for a request (for request/confirmation correlation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a new unique request ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Who issued a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The peer holding the source of truth
    Authority,
    /// A predicting peer
    Client,
}

/// A mutation sent to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub id: RequestId,
    /// Instance the mutation is addressed to
    pub instance: InstanceId,
    pub mutation: Mutation,
    /// Shared random seed
    pub seed: Seed,
    pub caller: Role,
    /// Containers the sender changed while speculating
    pub speculative: Vec<UniqueId>,
}

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Confirmed,
    Rejected(MutationError),
}

impl Verdict {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Authoritative state of part of one instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstancePatch {
    pub instance: InstanceId,
    /// Full copies of containers that exist after the mutation
    pub upserts: Vec<Container>,
    /// Containers that no longer exist
    pub removed: Vec<UniqueId>,
    /// Instance tags, when they may have changed
    pub tags: Option<TagSet>,
    /// Instance tag values, when they may have changed
    pub tag_values: Option<TagValues>,
}

impl InstancePatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty() && self.tags.is_none() && self.tag_values.is_none()
    }
}

/// The authority's answer to a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Request being answered
    pub request: RequestId,
    /// Peer that issued the request
    pub origin: PeerId,
    /// Authority-wide ordering of confirmations
    pub sequence: u64,
    pub verdict: Verdict,
    pub mutation: Mutation,
    pub seed: Seed,
    pub patches: Vec<InstancePatch>,
}

/// Full copy of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub instance: InstanceId,
    pub kind: InventoryKind,
    pub config: InventoryConfig,
    pub containers: Vec<Container>,
    pub tags: TagSet,
    pub tag_values: TagValues,
    /// Sequence of the last confirmation included
    pub sequence: u64,
}

/// Everything that crosses a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Request(MutationRequest),
    Confirmation(Confirmation),
    /// Start receiving an instance's confirmations
    Subscribe { instance: InstanceId },
    /// Stop receiving an instance's confirmations
    Unsubscribe { instance: InstanceId },
    /// Ask for a fresh snapshot
    RequestSnapshot { instance: InstanceId },
    Snapshot(Snapshot),
    /// Instance is not hosted or the peer may not see it
    Unavailable { instance: InstanceId },
}

impl Frame {
    /// Frame kind for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Confirmation(_) => "confirmation",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::RequestSnapshot { .. } => "request_snapshot",
            Self::Snapshot(_) => "snapshot",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    frame: Frame,
}

/// Encode a frame
pub fn encode(frame: &Frame) -> Result<Vec<u8>, SyncError> {
    #[derive(Serialize)]
    struct EnvelopeRef<'a> {
        version: u32,
        frame: &'a Frame,
    }
    bincode::serialize(&EnvelopeRef {
        version: PROTOCOL_VERSION,
        frame,
    })
    .map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Decode a frame, refusing other protocol versions
pub fn decode(bytes: &[u8]) -> Result<Frame, SyncError> {
    let version: u32 = bincode::deserialize(bytes).map_err(|e| SyncError::Deserialization(e.to_string()))?;
    if version != PROTOCOL_VERSION {
        return Err(SyncError::VersionMismatch(version, PROTOCOL_VERSION));
    }
    let envelope: Envelope = bincode::deserialize(bytes).map_err(|e| SyncError::Deserialization(e.to_string()))?;
    Ok(envelope.frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_inventory::{Serial, Tag, TagOwner};

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
        assert_ne!(PeerId::new(), PeerId::new());
    }

    #[test]
    fn test_request_frame_decodes() {
        let frame = Frame::Request(MutationRequest {
            id: RequestId::new(),
            instance: InstanceId::from_raw(3),
            mutation: Mutation::SetTagValue {
                instance: InstanceId::from_raw(3),
                owner: TagOwner::Instance,
                tag: Tag::new("Inventory.Gold"),
                value: 12.5,
                add_if_not_found: true,
                calculation: Some("clamp".into()),
            },
            seed: Seed(99),
            caller: Role::Client,
            speculative: vec![UniqueId::new(Serial::PROVISIONAL, InstanceId::from_raw(3))],
        });
        let bytes = encode(&frame).unwrap();
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_rejection_carries_reason() {
        let frame = Frame::Confirmation(Confirmation {
            request: RequestId::new(),
            origin: PeerId::from_raw(4),
            sequence: 8,
            verdict: Verdict::Rejected(MutationError::UnknownInstance(InstanceId::from_raw(5))),
            mutation: Mutation::Remove {
                item: UniqueId::new(Serial::PROVISIONAL, InstanceId::from_raw(5)),
            },
            seed: Seed(1),
            patches: Vec::new(),
        });
        let Frame::Confirmation(decoded) = decode(&encode(&frame).unwrap()).unwrap() else {
            panic!("expected a confirmation");
        };
        assert!(!decoded.verdict.is_confirmed());
        assert_eq!(decoded.sequence, 8);
    }

    #[test]
    fn test_other_version_is_refused() {
        let bytes = bincode::serialize(&(PROTOCOL_VERSION + 1, 0u32)).unwrap();
        assert!(matches!(decode(&bytes), Err(SyncError::VersionMismatch(2, 1))));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(decode(&[1]), Err(SyncError::Deserialization(_))));
    }
}
