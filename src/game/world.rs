//! In-Memory World
//!
//! [`SimWorld`] implements every collaborator trait over plain maps. The
//! session and the demo binary run on it, and tests use it as a fixture.
//! Physics is a single tile step with wall checks; there is no integrator.

use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::trace;

use crate::core::grid::{Direction, GridVec, Rotation};
use crate::core::notify::{Notifier, SubscriptionId, TopicNotifier};
use crate::game::collab::{
    FacingCollaborator, InteractionCollaborator, InventoryCollaborator, ItemId,
    LifeCollaborator, Momentum, MovementCollaborator, PullingCollaborator, Slot,
};
use crate::game::state::{EntityId, LifeState};

/// Default interaction range in tiles (adjacent, diagonals included).
pub const DEFAULT_INTERACTION_RANGE: i32 = 1;

// =============================================================================
// BODIES AND ITEMS
// =============================================================================

/// Physical side of an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Body {
    /// Current tile
    pub position: GridVec,
    /// Orientation (None = no facing, e.g. a plain stool)
    pub facing: Option<Direction>,
    /// Residual drift
    pub drift: Option<Momentum>,
    /// Consciousness
    pub life: LifeState,
    /// Rotation of the supporting frame (shuttle grid)
    pub frame: Rotation,
    /// What this body tows
    pub pulling: Option<EntityId>,
    /// Who tows this body
    pub pulled_by: Option<EntityId>,
    /// Occupied inventory slots
    pub slots: BTreeMap<Slot, ItemId>,
    /// Selected hand
    pub active_hand: Slot,
    /// Anchor property: occupants lie down (beds) instead of sitting
    pub occupant_lies_down: bool,
}

impl Body {
    /// Fresh body at a tile.
    pub fn new(position: GridVec) -> Self {
        Self {
            position,
            facing: Some(Direction::Down),
            drift: None,
            life: LifeState::Conscious,
            frame: Rotation::IDENTITY,
            pulling: None,
            pulled_by: None,
            slots: BTreeMap::new(),
            active_hand: Slot::RightHand,
            occupant_lies_down: false,
        }
    }
}

/// Where an item currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemLocation {
    /// On the floor
    Loose(GridVec),
    /// In someone's slot
    Held {
        /// Holder
        owner: EntityId,
        /// Slot
        slot: Slot,
    },
}

/// Inventory item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Item {
    /// Cuffs, zipties and the like
    pub restraint: bool,
    /// Current location
    pub location: ItemLocation,
}

// =============================================================================
// SIM WORLD
// =============================================================================

/// In-memory collaborator set.
#[derive(Debug)]
pub struct SimWorld {
    bodies: BTreeMap<EntityId, Body>,
    items: BTreeMap<ItemId, Item>,
    walls: BTreeSet<GridVec>,
    next_item_id: u32,
    interaction_range: i32,
    facing_feed: TopicNotifier<EntityId, Direction>,
    pulling_feed: Notifier<EntityId>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    /// Empty world with the default interaction range.
    pub fn new() -> Self {
        Self::with_range(DEFAULT_INTERACTION_RANGE)
    }

    /// Empty world with a custom interaction range.
    pub fn with_range(interaction_range: i32) -> Self {
        Self {
            bodies: BTreeMap::new(),
            items: BTreeMap::new(),
            walls: BTreeSet::new(),
            next_item_id: 1,
            interaction_range,
            facing_feed: TopicNotifier::new(),
            pulling_feed: Notifier::new(),
        }
    }

    /// Give an entity a body.
    pub fn add_body(&mut self, id: EntityId, position: GridVec) -> &mut Body {
        self.bodies.entry(id).or_insert_with(|| Body::new(position))
    }

    /// Remove a body, its pulls, its held items and its facing subscribers.
    pub fn remove_body(&mut self, id: EntityId) -> Option<Body> {
        self.stop_pulling(id);
        self.release_pulled_by(id);
        let body = self.bodies.remove(&id)?;
        for item in body.slots.values() {
            if let Some(entry) = self.items.get_mut(item) {
                entry.location = ItemLocation::Loose(body.position);
            }
        }
        self.facing_feed.clear_topic(id);
        Some(body)
    }

    /// Borrow a body.
    pub fn body(&self, id: EntityId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    /// Borrow a body mutably.
    pub fn body_mut(&mut self, id: EntityId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    /// Create an item lying on the floor.
    pub fn spawn_item(&mut self, restraint: bool, tile: GridVec) -> ItemId {
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        self.items.insert(id, Item { restraint, location: ItemLocation::Loose(tile) });
        id
    }

    /// Look up an item.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// Mark a tile impassable.
    pub fn add_wall(&mut self, tile: GridVec) {
        self.walls.insert(tile);
    }

    /// Set consciousness.
    pub fn set_life(&mut self, id: EntityId, life: LifeState) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.life = life;
        }
    }

    /// Rotate the supporting frame.
    pub fn set_frame(&mut self, id: EntityId, frame: Rotation) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.frame = frame;
        }
    }

    /// Mark an anchor as a bed (occupants lie down).
    pub fn set_occupant_lies_down(&mut self, id: EntityId, lies_down: bool) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.occupant_lies_down = lies_down;
        }
    }

    /// Remove the facing of a body (anchors without orientation).
    pub fn clear_facing(&mut self, id: EntityId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.facing = None;
        }
    }

    /// `puller` starts towing `pulled`. Existing pulls on either side end.
    pub fn start_pull(&mut self, puller: EntityId, pulled: EntityId) -> bool {
        if puller == pulled || !self.bodies.contains_key(&puller) || !self.bodies.contains_key(&pulled) {
            return false;
        }
        self.stop_pulling(puller);
        self.release_pulled_by(pulled);

        if let Some(body) = self.bodies.get_mut(&puller) {
            body.pulling = Some(pulled);
        }
        if let Some(body) = self.bodies.get_mut(&pulled) {
            body.pulled_by = Some(puller);
        }
        self.pulling_feed.notify(&puller);
        self.pulling_feed.notify(&pulled);
        trace!("{} started pulling {}", puller, pulled);
        true
    }

    /// Subscriber count on an entity's facing feed.
    pub fn facing_subscribers(&self, id: EntityId) -> usize {
        self.facing_feed.subscriber_count(id)
    }

    fn clear_slot_of(&mut self, item: ItemId) {
        if let Some(Item { location: ItemLocation::Held { owner, slot }, .. }) = self.items.get(&item).copied() {
            if let Some(body) = self.bodies.get_mut(&owner) {
                body.slots.remove(&slot);
            }
        }
    }
}

// =============================================================================
// COLLABORATOR IMPLS
// =============================================================================

impl MovementCollaborator for SimWorld {
    fn position(&self, id: EntityId) -> Option<GridVec> {
        self.bodies.get(&id).map(|b| b.position)
    }

    fn frame_rotation(&self, id: EntityId) -> Rotation {
        self.bodies.get(&id).map(|b| b.frame).unwrap_or(Rotation::IDENTITY)
    }

    fn apply_intent(&mut self, id: EntityId, intent: GridVec) -> Option<GridVec> {
        let body = self.bodies.get_mut(&id)?;
        let intent = intent.clamp_unit();
        let target = body.position + intent;
        if !self.walls.contains(&target) {
            body.position = target;
        }
        let position = body.position;

        if let Some(dir) = Direction::from_vec(intent) {
            self.face(id, dir);
        }
        Some(position)
    }

    fn set_position(&mut self, id: EntityId, tile: GridVec) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.position = tile;
        }
    }

    fn drift(&self, id: EntityId) -> Option<Momentum> {
        self.bodies.get(&id).and_then(|b| b.drift)
    }

    fn apply_momentum(&mut self, id: EntityId, momentum: Momentum) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.drift = Some(momentum);
        }
    }

    fn stop(&mut self, id: EntityId) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.drift = None;
        }
    }

    fn remove(&mut self, id: EntityId) {
        self.remove_body(id);
    }
}

impl InventoryCollaborator for SimWorld {
    fn active_hand(&self, owner: EntityId) -> Slot {
        self.bodies.get(&owner).map(|b| b.active_hand).unwrap_or(Slot::RightHand)
    }

    fn item_in(&self, owner: EntityId, slot: Slot) -> Option<ItemId> {
        self.bodies.get(&owner).and_then(|b| b.slots.get(&slot).copied())
    }

    fn is_restraint(&self, item: ItemId) -> bool {
        self.items.get(&item).map(|i| i.restraint).unwrap_or(false)
    }

    fn transfer(&mut self, item: ItemId, owner: EntityId, slot: Slot) -> bool {
        if !self.items.contains_key(&item) {
            return false;
        }
        match self.bodies.get(&owner) {
            Some(body) if !body.slots.contains_key(&slot) => {}
            _ => return false,
        }

        self.clear_slot_of(item);
        if let Some(body) = self.bodies.get_mut(&owner) {
            body.slots.insert(slot, item);
        }
        if let Some(entry) = self.items.get_mut(&item) {
            entry.location = ItemLocation::Held { owner, slot };
        }
        true
    }

    fn drop_slot(&mut self, owner: EntityId, slot: Slot) -> Option<ItemId> {
        let body = self.bodies.get_mut(&owner)?;
        let item = body.slots.remove(&slot)?;
        let tile = body.position;
        if let Some(entry) = self.items.get_mut(&item) {
            entry.location = ItemLocation::Loose(tile);
        }
        Some(item)
    }
}

impl LifeCollaborator for SimWorld {
    fn life_state(&self, id: EntityId) -> LifeState {
        self.bodies.get(&id).map(|b| b.life).unwrap_or(LifeState::Dead)
    }
}

impl FacingCollaborator for SimWorld {
    fn facing(&self, id: EntityId) -> Option<Direction> {
        self.bodies.get(&id).and_then(|b| b.facing)
    }

    fn face(&mut self, id: EntityId, direction: Direction) {
        let Some(body) = self.bodies.get_mut(&id) else {
            return;
        };
        body.facing = Some(direction);
        self.facing_feed.notify(id, &direction);
    }

    fn subscribe_facing(&mut self, target: EntityId) -> (SubscriptionId, UnboundedReceiver<Direction>) {
        self.facing_feed.subscribe(target)
    }

    fn unsubscribe_facing(&mut self, target: EntityId, id: SubscriptionId) -> bool {
        self.facing_feed.unsubscribe(target, id)
    }
}

impl PullingCollaborator for SimWorld {
    fn is_pulling(&self, id: EntityId) -> bool {
        self.bodies.get(&id).map(|b| b.pulling.is_some()).unwrap_or(false)
    }

    fn is_being_pulled(&self, id: EntityId) -> bool {
        self.bodies.get(&id).map(|b| b.pulled_by.is_some()).unwrap_or(false)
    }

    fn stop_pulling(&mut self, id: EntityId) {
        let Some(pulled) = self.bodies.get_mut(&id).and_then(|b| b.pulling.take()) else {
            return;
        };
        if let Some(body) = self.bodies.get_mut(&pulled) {
            body.pulled_by = None;
        }
        self.pulling_feed.notify(&id);
        self.pulling_feed.notify(&pulled);
        trace!("{} stopped pulling {}", id, pulled);
    }

    fn release_pulled_by(&mut self, id: EntityId) {
        if let Some(puller) = self.bodies.get(&id).and_then(|b| b.pulled_by) {
            self.stop_pulling(puller);
        }
    }

    fn subscribe_pulling_changes(&mut self) -> (SubscriptionId, UnboundedReceiver<EntityId>) {
        self.pulling_feed.subscribe()
    }
}

impl InteractionCollaborator for SimWorld {
    fn can_reach(&self, actor: EntityId, target: EntityId) -> bool {
        match (self.bodies.get(&actor), self.bodies.get(&target)) {
            (Some(a), Some(t)) => a.position.chebyshev(t.position) <= self.interaction_range,
            _ => false,
        }
    }

    fn occupant_lies_down(&self, anchor: EntityId) -> bool {
        self.bodies.get(&anchor).map(|b| b.occupant_lies_down).unwrap_or(false)
    }
}

// =============================================================================
// TESTS
// =============================================================================
