//! The predicting peer
//!
//! A [`Mirror`] keeps local copies of the instances it subscribed to. Calls
//! run speculatively against the copy through [`Mutation::execute`], the same
//! code the authority runs, and are then sent off. When the confirmation
//! arrives its patches overwrite the affected containers whatever the
//! prediction produced; a rejection does the same and is the only rollback.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::instances::InstanceSet;
use crate::link::Connection;
use crate::message::{Confirmation, Frame, MutationRequest, PeerId, RequestId, Role, Snapshot, Verdict};
use crate::mutation::Mutation;
use crate::patch::apply_patch;
use crate::peer::InventoryPeer;
use crate::queue::NetworkQueue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use void_inventory::{CalculationRegistry, InstanceId, Inventory, InventoryError, ItemCatalog, Seed, UniqueId};

/// Lifecycle of a mutation issued by a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    /// Issued, not yet applied anywhere
    Requested,
    /// Applied to the local copy
    Speculative,
    /// Waiting for the authority
    Pending,
    /// Authority applied it
    Confirmed,
    /// Authority refused it
    Rejected,
}

impl MutationState {
    /// Whether the authority has answered
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }
}

/// A request waiting for its confirmation
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub request: MutationRequest,
    pub state: MutationState,
    /// Whether the local copy already reflects it
    pub speculated: bool,
    queued: Vec<UniqueId>,
}

/// Local copies of remote inventory instances
pub struct Mirror {
    id: PeerId,
    config: SyncConfig,
    link: Connection,
    catalog: Arc<ItemCatalog>,
    calculations: Arc<CalculationRegistry>,
    instances: InstanceSet,
    subscriptions: BTreeSet<InstanceId>,
    sequences: HashMap<InstanceId, u64>,
    pending: BTreeMap<RequestId, PendingMutation>,
    settled: Vec<(RequestId, Verdict)>,
    finished: HashMap<RequestId, MutationState>,
    queue: NetworkQueue,
}

impl Mirror {
    /// Create a mirror on one end of a connection to an authority
    pub fn new(id: PeerId, link: Connection, catalog: Arc<ItemCatalog>, config: SyncConfig) -> Self {
        Self {
            id,
            config,
            link,
            catalog,
            calculations: Arc::new(CalculationRegistry::new()),
            instances: InstanceSet::new(),
            subscriptions: BTreeSet::new(),
            sequences: HashMap::new(),
            pending: BTreeMap::new(),
            settled: Vec::new(),
            finished: HashMap::new(),
            queue: NetworkQueue::new(),
        }
    }

    /// Set the tag-value calculation registry used by mirrored instances
    pub fn with_calculations(mut self, registry: Arc<CalculationRegistry>) -> Self {
        self.calculations = registry;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ask to mirror an instance. The copy appears once the snapshot arrives.
    pub fn subscribe(&mut self, instance: InstanceId) -> Result<()> {
        self.link.send(&Frame::Subscribe { instance })?;
        self.subscriptions.insert(instance);
        Ok(())
    }

    /// Stop mirroring an instance and drop the local copy
    pub fn unsubscribe(&mut self, instance: InstanceId) -> Result<()> {
        self.subscriptions.remove(&instance);
        self.instances.remove(instance);
        self.sequences.remove(&instance);
        self.link.send(&Frame::Unsubscribe { instance })
    }

    pub fn is_subscribed(&self, instance: InstanceId) -> bool {
        self.subscriptions.contains(&instance)
    }

    /// Whether a local copy exists
    pub fn is_mirrored(&self, instance: InstanceId) -> bool {
        self.instances.contains(instance)
    }

    /// Ask for a fresh snapshot of a mirrored instance
    pub fn resync(&mut self, instance: InstanceId) -> Result<()> {
        if !self.subscriptions.contains(&instance) {
            return Err(SyncError::NotSubscribed(instance));
        }
        self.link.send(&Frame::RequestSnapshot { instance })
    }

    /// State of a request this mirror issued
    pub fn state(&self, request: RequestId) -> Option<MutationState> {
        self.pending
            .get(&request)
            .map(|p| p.state)
            .or_else(|| self.finished.get(&request).copied())
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingMutation> {
        self.pending.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Take the verdicts received since the last call. Their requests are
    /// forgotten afterwards.
    pub fn drain_settled(&mut self) -> Vec<(RequestId, Verdict)> {
        for (request, _) in &self.settled {
            self.finished.remove(request);
        }
        std::mem::take(&mut self.settled)
    }

    /// Identities with unconfirmed mutations
    pub fn network_queue(&self) -> &NetworkQueue {
        &self.queue
    }

    pub fn is_queued(&self, id: UniqueId) -> bool {
        self.queue.is_queued(id)
    }

    /// Give up on an unconfirmed request.
    ///
    /// Its network-queue entries are dropped and fresh snapshots of the
    /// instances it touched are requested. Returns false if the request was
    /// not pending.
    pub fn clear_pending(&mut self, request: RequestId) -> Result<bool> {
        let Some(pending) = self.pending.remove(&request) else {
            return Ok(false);
        };
        self.queue.pop_all(&pending.queued);
        log::debug!("Cleared pending {} {}", request, pending.request.mutation.name());
        for instance in pending.request.mutation.instances() {
            if self.subscriptions.contains(&instance) {
                self.link.send(&Frame::RequestSnapshot { instance })?;
            }
        }
        Ok(true)
    }

    /// Handle every frame waiting on the connection. Returns how many frames
    /// were handled.
    pub fn poll(&mut self) -> Result<usize> {
        let frames = self.link.drain()?;
        let handled = frames.len();
        for frame in frames {
            match frame {
                Frame::Confirmation(confirmation) => self.apply_confirmation(confirmation),
                Frame::Snapshot(snapshot) => self.apply_snapshot(snapshot),
                Frame::Unavailable { instance } => {
                    log::warn!("Inventory {} is unavailable", instance);
                    self.subscriptions.remove(&instance);
                    self.instances.remove(instance);
                    self.sequences.remove(&instance);
                }
                other => log::warn!("Unexpected {} frame at mirror {}", other.kind(), self.id),
            }
        }
        Ok(handled)
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if !self.subscriptions.contains(&snapshot.instance) {
            log::debug!("Ignoring snapshot of unsubscribed {}", snapshot.instance);
            return;
        }
        let instance = snapshot.instance;
        match self.instances.get_mut(instance) {
            Some(inventory) => inventory.restore(snapshot.containers, snapshot.tags, snapshot.tag_values),
            None => {
                let mut inventory = Inventory::new(snapshot.kind, self.catalog.clone())
                    .with_id(instance)
                    .with_config(snapshot.config)
                    .with_calculations(self.calculations.clone());
                inventory.restore(snapshot.containers, snapshot.tags, snapshot.tag_values);
                self.instances.insert(inventory);
            }
        }
        self.sequences.insert(instance, snapshot.sequence);
        log::debug!("Mirrored {} at sequence {}", instance, snapshot.sequence);
    }

    fn apply_confirmation(&mut self, confirmation: Confirmation) {
        for patch in &confirmation.patches {
            let seen = self.sequences.get(&patch.instance).copied().unwrap_or(0);
            if confirmation.sequence <= seen {
                continue;
            }
            let Some(inventory) = self.instances.get_mut(patch.instance) else {
                continue;
            };
            apply_patch(inventory, patch);
            self.sequences.insert(patch.instance, confirmation.sequence);
        }

        if confirmation.origin != self.id {
            return;
        }
        let Some(pending) = self.pending.remove(&confirmation.request) else {
            log::debug!("Confirmation for {} is no longer pending", confirmation.request);
            return;
        };
        self.queue.pop_all(&pending.queued);
        let state = match &confirmation.verdict {
            Verdict::Confirmed => MutationState::Confirmed,
            Verdict::Rejected(reason) => {
                log::info!(
                    "{} {} rejected by authority: {}",
                    confirmation.request,
                    confirmation.mutation.name(),
                    reason
                );
                MutationState::Rejected
            }
        };
        if state == MutationState::Rejected && pending.speculated && confirmation.patches.is_empty() {
            for instance in confirmation.mutation.instances() {
                if !self.subscriptions.contains(&instance) {
                    continue;
                }
                if let Err(e) = self.link.send(&Frame::RequestSnapshot { instance }) {
                    log::warn!("Resync of {} failed: {}", instance, e);
                }
            }
        }
        log::trace!("{} {:?} -> {:?}", confirmation.request, pending.state, state);
        self.finished.insert(confirmation.request, state);
        self.settled.push((confirmation.request, confirmation.verdict));
    }
}

impl InventoryPeer for Mirror {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    fn role(&self) -> Role {
        Role::Client
    }

    fn inventory(&self, instance: InstanceId) -> Option<&Inventory> {
        self.instances.get(instance)
    }

    fn submit_seeded(&mut self, mutation: Mutation, seed: Seed) -> Result<RequestId> {
        if mutation.is_authority_only() {
            log::debug!("Refused {} on mirror {}: authority only", mutation.name(), self.id);
            return Err(InventoryError::AuthorityOnly.into());
        }
        if self.pending.len() >= self.config.max_in_flight {
            return Err(SyncError::TooManyInFlight(self.pending.len()));
        }
        let involved = mutation.instances();
        if let Some(missing) = involved.iter().find(|i| !self.instances.contains(**i)) {
            return Err(SyncError::NotSubscribed(*missing));
        }

        let id = RequestId::new();
        let mut state = MutationState::Requested;
        let mut speculative = Vec::new();
        if self.config.speculate {
            for instance in &involved {
                if let Some(inventory) = self.instances.get_mut(*instance) {
                    inventory.take_changes();
                }
            }
            if let Err(e) = mutation.execute(&mut self.instances, seed) {
                log::debug!("Refused {} {} locally: {}", id, mutation.name(), e);
                return Err(e.into());
            }
            for instance in &involved {
                if let Some(inventory) = self.instances.get_mut(*instance) {
                    let changes = inventory.take_changes();
                    speculative.extend(changes.touched);
                    speculative.extend(changes.removed);
                }
            }
            log::trace!("{} {:?} -> {:?}", id, state, MutationState::Speculative);
            state = MutationState::Speculative;
        }

        let speculated = state == MutationState::Speculative;
        let request = MutationRequest {
            id,
            instance: mutation.instance(),
            mutation,
            seed,
            caller: Role::Client,
            speculative,
        };
        if let Err(e) = self.link.send(&Frame::Request(request.clone())) {
            if speculated {
                log::warn!("{} could not be sent after speculating, resyncing: {}", id, e);
                for instance in &involved {
                    if let Err(resync) = self.link.send(&Frame::RequestSnapshot { instance: *instance }) {
                        log::warn!("Resync of {} failed: {}", instance, resync);
                    }
                }
            }
            return Err(e);
        }
        log::trace!("{} {:?} -> {:?}", id, state, MutationState::Pending);

        let queued = request.mutation.subjects();
        self.queue.push_all(&queued);
        self.pending.insert(
            id,
            PendingMutation {
                request,
                state: MutationState::Pending,
                speculated,
                queued,
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::connect_pair;
    use void_inventory::Spawn;

    fn mirror() -> (Mirror, Connection) {
        let (local, remote) = connect_pair(8);
        let mirror = Mirror::new(PeerId::new(), local, Arc::new(ItemCatalog::new()), SyncConfig::default());
        (mirror, remote)
    }

    #[test]
    fn test_spawn_is_refused_locally() {
        let (mut mirror, remote) = mirror();
        let result = mirror.try_add_new_item(InstanceId::from_raw(1), Spawn::new("ore", 1));
        assert!(matches!(
            result,
            Err(SyncError::Mutation(crate::error::MutationError::Inventory(InventoryError::AuthorityOnly)))
        ));
        assert_eq!(remote.pending(), 0);
    }

    #[test]
    fn test_unmirrored_instance_is_not_subscribed() {
        let (mut mirror, remote) = mirror();
        let item = UniqueId::new(void_inventory::Serial::PROVISIONAL, InstanceId::from_raw(2));
        assert!(matches!(mirror.remove_item(item), Err(SyncError::NotSubscribed(_))));
        assert_eq!(remote.pending(), 0);
    }

    #[test]
    fn test_snapshot_of_unsubscribed_instance_is_ignored() {
        let (mut mirror, remote) = mirror();
        remote
            .send(&Frame::Snapshot(Snapshot {
                instance: InstanceId::from_raw(3),
                kind: void_inventory::InventoryKind::Storage,
                config: Default::default(),
                containers: Vec::new(),
                tags: Default::default(),
                tag_values: Default::default(),
                sequence: 1,
            }))
            .unwrap();
        assert_eq!(mirror.poll().unwrap(), 1);
        assert!(!mirror.is_mirrored(InstanceId::from_raw(3)));
    }
}
