//! Integration tests for void_inventory_sync

use std::sync::Arc;
use void_inventory::prelude::*;
use void_inventory_sync::prelude::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn catalog() -> Arc<ItemCatalog> {
    Arc::new(
        ItemCatalog::new()
            .with(ItemAsset::new("ore", "Ore").with_max_stack(10))
            .with(ItemAsset::new("plank", "Plank").with_dimensions(2, 1)),
    )
}

struct World {
    authority: Authority,
    alice: Mirror,
    bob: Mirror,
    player: InstanceId,
    chest: InstanceId,
}

impl World {
    /// Alice owns and mirrors `player` and mirrors `chest`; Bob mirrors `chest`
    fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    fn with_config(config: SyncConfig) -> Self {
        init_logging();
        let catalog = catalog();
        let mut authority = Authority::new(config.clone());
        let alice_id = PeerId::new();
        let bob_id = PeerId::new();

        let mut player = Inventory::new(InventoryKind::Player, catalog.clone())
            .with_config(InventoryConfig::debug())
            .with_container(Container::new("Container.Pockets").with_dimensions(4, 2));
        player.initialize(Seed(100));
        let mut chest = Inventory::new(InventoryKind::Interactable, catalog.clone())
            .with_config(InventoryConfig::debug())
            .with_container(Container::new("Container.Chest").with_dimensions(4, 4));
        chest.initialize(Seed(200));

        let player = authority.host(player, Some(alice_id));
        let chest = authority.host(chest, None);

        let mut alice = Mirror::new(alice_id, authority.connect(alice_id), catalog.clone(), config.clone());
        let mut bob = Mirror::new(bob_id, authority.connect(bob_id), catalog, config);
        alice.subscribe(player).unwrap();
        alice.subscribe(chest).unwrap();
        bob.subscribe(chest).unwrap();

        let mut world = Self {
            authority,
            alice,
            bob,
            player,
            chest,
        };
        world.settle();
        world
    }

    fn settle(&mut self) {
        for _ in 0..16 {
            let mut handled = self.authority.pump();
            handled += self.alice.poll().unwrap();
            handled += self.bob.poll().unwrap();
            if handled == 0 {
                return;
            }
        }
        panic!("peers did not settle");
    }

    fn spawn(&mut self, instance: InstanceId, spawn: Spawn) -> UniqueId {
        let before: Vec<UniqueId> = self.authority.inventory(instance).unwrap().items().map(|i| i.id).collect();
        self.authority
            .submit_seeded(Mutation::Spawn { instance, spawn }, Seed(7))
            .unwrap();
        self.authority
            .inventory(instance)
            .unwrap()
            .items()
            .map(|i| i.id)
            .find(|id| !before.contains(id))
            .unwrap()
    }

    fn container_of(&self, instance: InstanceId) -> UniqueId {
        self.authority.inventory(instance).unwrap().containers()[0].id
    }

    fn assert_converged(&self, mirror: &Mirror, instance: InstanceId) {
        let truth = self.authority.inventory(instance).unwrap();
        let copy = mirror.inventory(instance).unwrap();
        assert_eq!(copy.containers(), truth.containers());
        assert_eq!(copy.tags(), truth.tags());
        assert_eq!(copy.tag_values(), truth.tag_values());
        assert!(copy.validate_index().is_consistent());
    }
}

#[test]
fn test_subscription_delivers_snapshot() {
    let world = World::new();
    assert!(world.alice.is_mirrored(world.player));
    assert!(world.alice.is_mirrored(world.chest));
    assert!(world.bob.is_mirrored(world.chest));
    assert!(!world.bob.is_mirrored(world.player));
    world.assert_converged(&world.alice, world.player);
    world.assert_converged(&world.bob, world.chest);
}

#[test]
fn test_prediction_converges_to_authority() {
    let mut world = World::new();
    let ore = world.spawn(world.player, Spawn::new("ore", 5));
    world.settle();

    // The authority fills the chest's first tiles before Alice hears about it
    world.spawn(world.chest, Spawn::new("plank", 1).at_tile(0));
    let chest_container = world.container_of(world.chest);
    let request = world.alice.move_item(ore, chest_container, None, None).unwrap();

    let predicted = world.alice.inventory(world.chest).unwrap();
    let moved = predicted.items().find(|i| i.asset.as_str() == "ore").unwrap();
    assert_eq!(moved.tile, 0);
    assert_eq!(world.alice.state(request), Some(MutationState::Pending));

    world.settle();
    assert_eq!(world.alice.state(request), Some(MutationState::Confirmed));
    world.assert_converged(&world.alice, world.player);
    world.assert_converged(&world.alice, world.chest);
    world.assert_converged(&world.bob, world.chest);

    let confirmed = world.alice.inventory(world.chest).unwrap();
    let ore_tile = confirmed.items().find(|i| i.asset.as_str() == "ore").unwrap().tile;
    assert_eq!(ore_tile, 2);
    assert_eq!(world.alice.inventory(world.player).unwrap().items().count(), 0);
}

#[test]
fn test_rejection_overwrites_prediction() {
    let mut world = World::new();
    let ore = world.spawn(world.player, Spawn::new("ore", 5));
    world.settle();

    world.authority.remove_item(ore).unwrap();
    let request = world.alice.split_item(ore, 2, None, None).unwrap();
    assert_eq!(world.alice.inventory(world.player).unwrap().items().count(), 2);

    world.settle();
    assert_eq!(world.alice.state(request), Some(MutationState::Rejected));
    assert_eq!(world.alice.inventory(world.player).unwrap().items().count(), 0);
    world.assert_converged(&world.alice, world.player);
    assert!(world.alice.network_queue().is_empty());

    let settled = world.alice.drain_settled();
    assert_eq!(
        settled,
        vec![(request, Verdict::Rejected(MutationError::Inventory(InventoryError::UnknownItem(ore))))]
    );
    assert_eq!(world.alice.state(request), None);
}

#[test]
fn test_network_queue_tracks_in_flight_identities() {
    let mut world = World::new();
    let big = world.spawn(world.player, Spawn::new("ore", 5));
    let small = world.spawn(world.player, Spawn::new("ore", 3).skip_stacking());
    world.settle();

    let request = world.alice.stack_items(small, big).unwrap();
    assert!(world.alice.is_queued(small));
    assert!(world.alice.is_queued(big));
    assert_eq!(world.alice.pending_count(), 1);

    world.settle();
    assert!(!world.alice.is_queued(small));
    assert!(!world.alice.is_queued(big));
    assert_eq!(world.alice.state(request), Some(MutationState::Confirmed));
    assert_eq!(world.alice.inventory(world.player).unwrap().item(big).unwrap().count, 8);
    assert!(world.alice.inventory(world.player).unwrap().item(small).is_none());
    world.assert_converged(&world.alice, world.player);
}

#[test]
fn test_same_identity_queued_twice() {
    let mut world = World::new();
    let ore = world.spawn(world.player, Spawn::new("ore", 2));
    world.settle();

    world.alice.increase_count(ore, 1).unwrap();
    world.alice.increase_count(ore, 1).unwrap();
    assert_eq!(world.alice.network_queue().depth(ore), 2);

    world.settle();
    assert!(!world.alice.is_queued(ore));
    assert_eq!(world.authority.inventory(world.player).unwrap().item(ore).unwrap().count, 4);
    world.assert_converged(&world.alice, world.player);
}

#[test]
fn test_clear_pending_resyncs() {
    let mut world = World::new();
    let ore = world.spawn(world.player, Spawn::new("ore", 5));
    world.settle();

    let pockets = world.container_of(world.player);
    let request = world.alice.move_item(ore, pockets, Some(3), None).unwrap();
    assert!(world.alice.clear_pending(request).unwrap());
    assert!(!world.alice.is_queued(ore));
    assert_eq!(world.alice.state(request), None);
    assert!(!world.alice.clear_pending(request).unwrap());

    world.settle();
    assert_eq!(world.alice.state(request), None);
    world.assert_converged(&world.alice, world.player);
}

#[test]
fn test_listeners_receive_confirmed_changes() {
    let mut world = World::new();
    let ore = world.spawn(world.chest, Spawn::new("ore", 4));
    world.settle();
    world.assert_converged(&world.bob, world.chest);

    world.alice.reduce_count(ore, 1, true).unwrap();
    world.settle();
    assert_eq!(world.bob.inventory(world.chest).unwrap().item(ore).unwrap().count, 3);
    world.assert_converged(&world.bob, world.chest);
}

#[test]
fn test_unsubscribed_mirror_stops_receiving() {
    let mut world = World::new();
    world.bob.unsubscribe(world.chest).unwrap();
    world.settle();
    assert!(!world.authority.is_listening(world.chest, world.bob.peer_id()));

    world.spawn(world.chest, Spawn::new("ore", 1));
    world.settle();
    assert!(world.bob.inventory(world.chest).is_none());
    world.assert_converged(&world.alice, world.chest);
}

#[test]
fn test_mirror_cannot_spawn() {
    let mut world = World::new();
    let result = world.alice.try_add_new_item(world.player, Spawn::new("ore", 1));
    assert!(matches!(
        result,
        Err(SyncError::Mutation(MutationError::Inventory(InventoryError::AuthorityOnly)))
    ));
    assert_eq!(world.alice.pending_count(), 0);
}

#[test]
fn test_locally_invalid_mutation_is_not_sent() {
    let mut world = World::new();
    let ore = world.spawn(world.player, Spawn::new("ore", 5));
    world.settle();

    let result = world.alice.split_item(ore, 5, None, None);
    assert!(matches!(
        result,
        Err(SyncError::Mutation(MutationError::Inventory(InventoryError::CannotSplit { .. })))
    ));
    assert_eq!(world.alice.pending_count(), 0);
    assert_eq!(world.authority.pump(), 0);
}

#[test]
fn test_confirmed_only_mirror_waits() {
    let mut world = World::with_config(SyncConfig::confirmed_only());
    let ore = world.spawn(world.chest, Spawn::new("ore", 4));
    world.settle();

    let request = world.bob.increase_count(ore, 2).unwrap();
    assert_eq!(world.bob.inventory(world.chest).unwrap().item(ore).unwrap().count, 4);
    assert!(!world.bob.pending().next().unwrap().speculated);

    world.settle();
    assert_eq!(world.bob.state(request), Some(MutationState::Confirmed));
    assert_eq!(world.bob.inventory(world.chest).unwrap().item(ore).unwrap().count, 6);
    world.assert_converged(&world.alice, world.chest);
}

#[test]
fn test_in_flight_limit() {
    let mut world = World::with_config(SyncConfig::default().with_max_in_flight(1));
    let ore = world.spawn(world.player, Spawn::new("ore", 2));
    world.settle();

    world.alice.increase_count(ore, 1).unwrap();
    assert!(matches!(world.alice.increase_count(ore, 1), Err(SyncError::TooManyInFlight(1))));
    world.settle();
    assert!(world.alice.increase_count(ore, 1).is_ok());
}

#[test]
fn test_instance_tag_values_replicate() {
    let mut world = World::new();
    world
        .alice
        .set_tag_value(world.player, TagOwner::Instance, "Inventory.Gold", 25.0, true, None)
        .unwrap();
    world.settle();
    let gold = Tag::new("Inventory.Gold");
    assert_eq!(
        world.authority.inventory(world.player).unwrap().tag_value_of(TagOwner::Instance, &gold),
        Some(25.0)
    );
    world.assert_converged(&world.alice, world.player);
}

#[test]
fn test_stranger_cannot_touch_owned_inventory() {
    let mut world = World::new();
    world.settle();
    let ore = world.spawn(world.player, Spawn::new("ore", 5));
    world.settle();

    // Bob never subscribed to the player inventory, so he has no copy to predict with
    assert!(matches!(world.bob.remove_item(ore), Err(SyncError::NotSubscribed(_))));
    assert!(world.authority.inventory(world.player).unwrap().item(ore).is_some());
}
