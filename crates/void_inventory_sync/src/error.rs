//! Error types for inventory replication

use crate::message::PeerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use void_inventory::{InstanceId, InventoryError};

/// Why a mutation was refused.
///
/// Travels inside rejections, so it is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MutationError {
    /// The inventory refused the operation
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    /// Instance is not hosted or mirrored here
    #[error("Unknown inventory instance {0}")]
    UnknownInstance(InstanceId),
    /// Peer neither owns nor listens to the instance
    #[error("Peer {peer} is not listening to inventory {instance}")]
    NotListening { peer: PeerId, instance: InstanceId },
}

/// Replication errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Other end of the connection is gone
    #[error("Connection closed")]
    Disconnected,
    /// Outbound queue is full
    #[error("Connection backlog is full")]
    Backlog,
    /// Frame encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Frame decoding failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// Peer speaks another protocol version
    #[error("Protocol version mismatch: peer {0}, local {1}")]
    VersionMismatch(u32, u32),
    /// Instance is not hosted or mirrored here
    #[error("Unknown inventory instance {0}")]
    UnknownInstance(InstanceId),
    /// Mirror has no copy of the instance
    #[error("Not subscribed to inventory {0}")]
    NotSubscribed(InstanceId),
    /// Mirror reached its in-flight request limit
    #[error("Too many requests in flight ({0})")]
    TooManyInFlight(usize),
    /// The mutation itself was refused
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

impl From<InventoryError> for SyncError {
    fn from(error: InventoryError) -> Self {
        Self::Mutation(MutationError::Inventory(error))
    }
}

/// Result type for replication
pub type Result<T> = std::result::Result<T, SyncError>;
