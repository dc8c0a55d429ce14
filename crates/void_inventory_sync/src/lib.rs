//! Void Inventory Sync - Replication for Spatial Inventories
//!
//! Client-predicted, authority-confirmed replication of
//! [`void_inventory`] instances.
//!
//! # Features
//!
//! - One mutation vocabulary executed by both sides
//! - Shared seeds so predicted and confirmed outcomes draw the same values
//! - Confirmations carry whole containers and always win over predictions
//! - Explicit listener sets per instance
//! - Ref-counted network queue of identities awaiting confirmation
//! - Bincode frames over bounded crossbeam channels
//!
//! # Example
//!
//! ```ignore
//! use void_inventory_sync::prelude::*;
//!
//! let mut authority = Authority::new(SyncConfig::default());
//! let chest = authority.host(chest_inventory, None);
//!
//! let peer = PeerId::new();
//! let link = authority.connect(peer);
//! let mut mirror = Mirror::new(peer, link, catalog, SyncConfig::default());
//! mirror.subscribe(chest)?;
//! authority.pump();
//! mirror.poll()?;
//!
//! let request = mirror.move_item(item, container, Some(4), None)?;
//! authority.pump();
//! mirror.poll()?;
//! assert_eq!(mirror.state(request), Some(MutationState::Confirmed));
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod instances;
pub mod link;
pub mod message;
pub mod mirror;
pub mod mutation;
pub mod patch;
pub mod peer;
pub mod queue;

pub mod prelude {
    pub use crate::authority::{Authority, AuthorityStats};
    pub use crate::config::SyncConfig;
    pub use crate::error::{MutationError, Result, SyncError};
    pub use crate::instances::InstanceSet;
    pub use crate::link::{connect_pair, Connection, LinkStats};
    pub use crate::message::{
        Confirmation, Frame, InstancePatch, MutationRequest, PeerId, RequestId, Role, Snapshot, Verdict,
        PROTOCOL_VERSION,
    };
    pub use crate::mirror::{Mirror, MutationState, PendingMutation};
    pub use crate::mutation::Mutation;
    pub use crate::patch::{apply_patch, build_patch};
    pub use crate::peer::InventoryPeer;
    pub use crate::queue::NetworkQueue;
}

pub use prelude::*;
