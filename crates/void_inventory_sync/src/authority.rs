//! The authoritative peer
//!
//! An [`Authority`] hosts inventory instances and is the only place where
//! their state is decided. Requests from mirrors are re-validated against the
//! authority's own state, never the sender's snapshot, by running the same
//! [`Mutation::execute`] the mirror predicted with. Every request gets a
//! [`Confirmation`] back; confirmed ones are also pushed to every listener of
//! the instances involved.

use crate::config::SyncConfig;
use crate::error::{MutationError, Result, SyncError};
use crate::instances::InstanceSet;
use crate::link::{connect_pair, Connection};
use crate::message::{Confirmation, Frame, InstancePatch, MutationRequest, PeerId, RequestId, Role, Snapshot, Verdict};
use crate::mutation::Mutation;
use crate::patch::build_patch;
use crate::peer::InventoryPeer;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use void_inventory::{InstanceId, Inventory, InventoryError, Seed, UniqueId};

/// Statistics about authority traffic
#[derive(Debug, Clone, Default)]
pub struct AuthorityStats {
    /// Mutations confirmed
    pub confirmed: u64,
    /// Mutations rejected
    pub rejected: u64,
    /// Snapshots sent
    pub snapshots_sent: u64,
    /// Frames that could not be delivered
    pub frames_dropped: u64,
}

struct PeerLink {
    connection: Connection,
    role: Role,
}

/// Source of truth for hosted inventory instances
pub struct Authority {
    id: PeerId,
    config: SyncConfig,
    instances: InstanceSet,
    owners: HashMap<InstanceId, PeerId>,
    listeners: HashMap<InstanceId, BTreeSet<PeerId>>,
    links: BTreeMap<PeerId, PeerLink>,
    sequence: u64,
    stats: AuthorityStats,
}

impl Authority {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            id: PeerId::new(),
            config,
            instances: InstanceSet::new(),
            owners: HashMap::new(),
            listeners: HashMap::new(),
            links: BTreeMap::new(),
            sequence: 0,
            stats: AuthorityStats::default(),
        }
    }

    /// Use a specific peer id
    pub fn with_id(mut self, id: PeerId) -> Self {
        self.id = id;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sequence number of the last confirmation
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn stats(&self) -> AuthorityStats {
        self.stats.clone()
    }

    /// Start hosting an initialized inventory, optionally owned by a peer
    pub fn host(&mut self, mut inventory: Inventory, owner: Option<PeerId>) -> InstanceId {
        inventory.take_changes();
        let id = self.instances.insert(inventory);
        if let Some(owner) = owner {
            self.owners.insert(id, owner);
        }
        log::info!("Hosting inventory {}", id);
        id
    }

    /// Stop hosting an instance. Listeners are told it is gone.
    pub fn unhost(&mut self, instance: InstanceId) -> Option<Inventory> {
        let inventory = self.instances.remove(instance)?;
        self.owners.remove(&instance);
        for peer in self.listeners.remove(&instance).unwrap_or_default() {
            self.send_to(peer, &Frame::Unavailable { instance });
        }
        log::info!("Stopped hosting inventory {}", instance);
        Some(inventory)
    }

    /// Hosted instance ids
    pub fn hosted(&self) -> Vec<InstanceId> {
        self.instances.ids()
    }

    pub fn owner(&self, instance: InstanceId) -> Option<PeerId> {
        self.owners.get(&instance).copied()
    }

    /// Open a connection for a client peer. The returned end belongs to the peer.
    pub fn connect(&mut self, peer: PeerId) -> Connection {
        self.connect_with_role(peer, Role::Client)
    }

    /// Open a connection whose requests may claim `role`
    pub fn connect_with_role(&mut self, peer: PeerId, role: Role) -> Connection {
        let (local, remote) = connect_pair(self.config.channel_capacity);
        self.links.insert(peer, PeerLink { connection: local, role });
        log::debug!("Peer {} connected as {:?}", peer, role);
        remote
    }

    /// Forget a peer and all its subscriptions
    pub fn disconnect(&mut self, peer: PeerId) {
        self.links.remove(&peer);
        for listeners in self.listeners.values_mut() {
            listeners.remove(&peer);
        }
        log::info!("Peer {} disconnected", peer);
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.links.contains_key(&peer)
    }

    /// Add a listener. Returns false if the instance is not hosted.
    pub fn add_listener(&mut self, instance: InstanceId, peer: PeerId) -> bool {
        if !self.instances.contains(instance) {
            return false;
        }
        self.listeners.entry(instance).or_default().insert(peer);
        true
    }

    /// Remove a listener. Returns whether it was listening.
    pub fn remove_listener(&mut self, instance: InstanceId, peer: PeerId) -> bool {
        self.listeners.get_mut(&instance).is_some_and(|l| l.remove(&peer))
    }

    pub fn listeners(&self, instance: InstanceId) -> Vec<PeerId> {
        self.listeners
            .get(&instance)
            .map(|l| l.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_listening(&self, instance: InstanceId, peer: PeerId) -> bool {
        self.listeners.get(&instance).is_some_and(|l| l.contains(&peer))
    }

    /// Full copy of a hosted instance
    pub fn snapshot(&self, instance: InstanceId) -> Option<Snapshot> {
        let inventory = self.instances.get(instance)?;
        Some(Snapshot {
            instance,
            kind: inventory.kind(),
            config: inventory.config().clone(),
            containers: inventory.containers().to_vec(),
            tags: inventory.tags().clone(),
            tag_values: inventory.tag_values().clone(),
            sequence: self.sequence,
        })
    }

    /// Handle every frame waiting on every connection. Returns how many
    /// frames were handled.
    pub fn pump(&mut self) -> usize {
        let peers: Vec<PeerId> = self.links.keys().copied().collect();
        let mut handled = 0;
        for peer in peers {
            let frames = match self.links.get(&peer).map(|link| link.connection.drain()) {
                Some(Ok(frames)) => frames,
                Some(Err(SyncError::Disconnected)) => {
                    self.disconnect(peer);
                    continue;
                }
                Some(Err(e)) => {
                    log::warn!("Failed to read from {}: {}", peer, e);
                    continue;
                }
                None => continue,
            };
            for frame in frames {
                self.handle_frame(peer, frame);
                handled += 1;
            }
        }
        handled
    }

    fn handle_frame(&mut self, peer: PeerId, frame: Frame) {
        match frame {
            Frame::Request(request) => self.handle_request(peer, request),
            Frame::Subscribe { instance } => {
                if self.add_listener(instance, peer) {
                    log::debug!("{} subscribed to {}", peer, instance);
                    self.send_snapshot(peer, instance);
                } else {
                    self.send_to(peer, &Frame::Unavailable { instance });
                }
            }
            Frame::Unsubscribe { instance } => {
                self.remove_listener(instance, peer);
                log::debug!("{} unsubscribed from {}", peer, instance);
            }
            Frame::RequestSnapshot { instance } => {
                if self.may_access(peer, instance) {
                    self.send_snapshot(peer, instance);
                } else {
                    self.send_to(peer, &Frame::Unavailable { instance });
                }
            }
            other => log::warn!("Unexpected {} frame from {}", other.kind(), peer),
        }
    }

    fn handle_request(&mut self, peer: PeerId, request: MutationRequest) {
        let claimed = request.caller;
        let link_role = self.links.get(&peer).map(|l| l.role).unwrap_or(Role::Client);
        let role = if claimed == Role::Authority && link_role != Role::Authority {
            log::warn!("{} claimed authority on a client connection", peer);
            Role::Client
        } else {
            claimed
        };
        self.apply(request.id, peer, role, request.mutation, request.seed, &request.speculative);
    }

    fn may_access(&self, peer: PeerId, instance: InstanceId) -> bool {
        self.instances.contains(instance)
            && (self.is_listening(instance, peer) || self.owners.get(&instance) == Some(&peer))
    }

    fn authorize(&self, peer: PeerId, role: Role, mutation: &Mutation) -> std::result::Result<(), MutationError> {
        for instance in mutation.instances() {
            if !self.instances.contains(instance) {
                return Err(MutationError::UnknownInstance(instance));
            }
            if role == Role::Authority {
                continue;
            }
            if !self.may_access(peer, instance) {
                return Err(MutationError::NotListening { peer, instance });
            }
        }
        if role != Role::Authority && mutation.is_authority_only() {
            return Err(InventoryError::AuthorityOnly.into());
        }
        Ok(())
    }

    /// Validate, execute and fan out one mutation
    fn apply(
        &mut self,
        request: RequestId,
        origin: PeerId,
        role: Role,
        mutation: Mutation,
        seed: Seed,
        speculative: &[UniqueId],
    ) -> Verdict {
        let involved = mutation.instances();
        let mut patches: Vec<InstancePatch> = Vec::new();
        let verdict = match self.authorize(origin, role, &mutation) {
            Err(e) => {
                log::info!("Refused {} {} from {}: {}", request, mutation.name(), origin, e);
                Verdict::Rejected(e)
            }
            Ok(()) => {
                for instance in &involved {
                    if let Some(inventory) = self.instances.get_mut(*instance) {
                        inventory.take_changes();
                    }
                }
                let verdict = match mutation.execute(&mut self.instances, seed) {
                    Ok(created) => {
                        log::debug!("Confirmed {} {} from {} ({} created)", request, mutation.name(), origin, created.len());
                        Verdict::Confirmed
                    }
                    Err(e) => {
                        log::info!("Rejected {} {} from {}: {}", request, mutation.name(), origin, e);
                        Verdict::Rejected(e)
                    }
                };
                let annotations = mutation.touches_instance_annotations();
                for instance in &involved {
                    if let Some(inventory) = self.instances.get_mut(*instance) {
                        let patch =
                            build_patch(inventory, speculative, annotations && *instance == mutation.instance());
                        if !patch.is_empty() {
                            patches.push(patch);
                        }
                    }
                }
                verdict
            }
        };

        self.sequence += 1;
        if verdict.is_confirmed() {
            self.stats.confirmed += 1;
        } else {
            self.stats.rejected += 1;
        }
        let confirmation = Confirmation {
            request,
            origin,
            sequence: self.sequence,
            verdict: verdict.clone(),
            mutation,
            seed,
            patches,
        };
        let frame = Frame::Confirmation(confirmation);

        if origin != self.id {
            self.send_to(origin, &frame);
        }
        if verdict.is_confirmed() {
            let recipients: BTreeSet<PeerId> = involved
                .iter()
                .filter_map(|instance| self.listeners.get(instance))
                .flat_map(|listeners| listeners.iter().copied())
                .filter(|peer| *peer != origin)
                .collect();
            for peer in recipients {
                self.send_to(peer, &frame);
            }
        }
        verdict
    }

    fn send_snapshot(&mut self, peer: PeerId, instance: InstanceId) {
        if let Some(snapshot) = self.snapshot(instance) {
            self.stats.snapshots_sent += 1;
            self.send_to(peer, &Frame::Snapshot(snapshot));
        }
    }

    fn send_to(&mut self, peer: PeerId, frame: &Frame) {
        let Some(link) = self.links.get(&peer) else {
            return;
        };
        if let Err(e) = link.connection.send(frame) {
            self.stats.frames_dropped += 1;
            log::warn!("Dropping {} frame to {}: {}", frame.kind(), peer, e);
        }
    }
}

impl InventoryPeer for Authority {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    fn role(&self) -> Role {
        Role::Authority
    }

    fn inventory(&self, instance: InstanceId) -> Option<&Inventory> {
        self.instances.get(instance)
    }

    fn submit_seeded(&mut self, mutation: Mutation, seed: Seed) -> Result<RequestId> {
        let request = RequestId::new();
        match self.apply(request, self.id, Role::Authority, mutation, seed, &[]) {
            Verdict::Confirmed => Ok(request),
            Verdict::Rejected(e) => Err(SyncError::Mutation(e)),
        }
    }
}
