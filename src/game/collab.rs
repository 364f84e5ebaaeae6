//! Collaborator Interfaces
//!
//! The state machines never touch physics, inventory or health directly.
//! They call into these traits, and the server plugs in whatever owns those
//! concerns. [`crate::game::world::SimWorld`] is the in-memory implementation.
//!
//! Every query takes an [`EntityId`] and must tolerate unknown ids: lookups
//! return `None`/`false`, commands become no-ops.

use serde::{Serialize, Deserialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::grid::{Direction, GridVec, Rotation};
use crate::core::notify::SubscriptionId;
use crate::game::state::{EntityId, LifeState};

/// Item handle owned by the inventory collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// Named inventory slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Left hand
    LeftHand,
    /// Right hand
    RightHand,
    /// Dedicated restraint (handcuff) slot
    Restraint,
}

impl Slot {
    /// Both hand slots.
    pub const HANDS: [Slot; 2] = [Slot::LeftHand, Slot::RightHand];
}

/// Residual drift of a non-grounded body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Momentum {
    /// Drift direction
    pub direction: Direction,
    /// Speed in thousandths of a tile per tick
    pub speed_milli: u32,
}

/// Physical movement and collision.
pub trait MovementCollaborator {
    /// Current tile.
    fn position(&self, id: EntityId) -> Option<GridVec>;

    /// Rotation of the entity's supporting frame relative to its initial
    /// orientation.
    fn frame_rotation(&self, id: EntityId) -> Rotation;

    /// Attempt a one-tile step. Returns the resulting tile.
    fn apply_intent(&mut self, id: EntityId, intent: GridVec) -> Option<GridVec>;

    /// Teleport to an absolute tile.
    fn set_position(&mut self, id: EntityId, tile: GridVec);

    /// Residual drift, `None` when grounded or at rest.
    fn drift(&self, id: EntityId) -> Option<Momentum>;

    /// Start drifting.
    fn apply_momentum(&mut self, id: EntityId, momentum: Momentum);

    /// Bring to a stop.
    fn stop(&mut self, id: EntityId);

    /// Drop the body along with its pulls and facing subscribers.
    fn remove(&mut self, id: EntityId);
}

/// Named-slot inventory.
pub trait InventoryCollaborator {
    /// Currently selected hand.
    fn active_hand(&self, owner: EntityId) -> Slot;

    /// Item occupying a slot.
    fn item_in(&self, owner: EntityId, slot: Slot) -> Option<ItemId>;

    /// Does this item restrain when applied?
    fn is_restraint(&self, item: ItemId) -> bool;

    /// Move an item into `owner`'s `slot`. Fails if the slot is occupied.
    fn transfer(&mut self, item: ItemId, owner: EntityId, slot: Slot) -> bool;

    /// Drop whatever is in `slot` loose at the owner's feet.
    fn drop_slot(&mut self, owner: EntityId, slot: Slot) -> Option<ItemId>;

    /// Drop everything held in both hands.
    fn drop_hands(&mut self, owner: EntityId) {
        for slot in Slot::HANDS {
            self.drop_slot(owner, slot);
        }
    }
}

/// Health / consciousness.
pub trait LifeCollaborator {
    /// Consciousness state. Unknown entities read as dead.
    fn life_state(&self, id: EntityId) -> LifeState;
}

/// Orientation.
pub trait FacingCollaborator {
    /// Current facing, `None` for things without orientation.
    fn facing(&self, id: EntityId) -> Option<Direction>;

    /// Turn to face a direction.
    fn face(&mut self, id: EntityId, direction: Direction);

    /// Subscribe to facing changes of `target`.
    fn subscribe_facing(&mut self, target: EntityId) -> (SubscriptionId, UnboundedReceiver<Direction>);

    /// Undo `subscribe_facing`.
    fn unsubscribe_facing(&mut self, target: EntityId, id: SubscriptionId) -> bool;
}

/// Pull/push relationships.
pub trait PullingCollaborator {
    /// Is `id` pulling something?
    fn is_pulling(&self, id: EntityId) -> bool;

    /// Is `id` being pulled?
    fn is_being_pulled(&self, id: EntityId) -> bool;

    /// `id` lets go of whatever it pulls.
    fn stop_pulling(&mut self, id: EntityId);

    /// Whoever pulls `id` lets go.
    fn release_pulled_by(&mut self, id: EntityId);

    /// Channel of entities whose pulling state changed (either side).
    fn subscribe_pulling_changes(&mut self) -> (SubscriptionId, UnboundedReceiver<EntityId>);
}

/// Proximity/validity checks and anchor properties.
pub trait InteractionCollaborator {
    /// Can `actor` interact with `target` right now?
    fn can_reach(&self, actor: EntityId, target: EntityId) -> bool;

    /// Does something buckled to `anchor` lie down (beds) or sit (chairs)?
    fn occupant_lies_down(&self, anchor: EntityId) -> bool;
}

/// Everything the state machines need from the outside world.
pub trait World:
    MovementCollaborator
    + InventoryCollaborator
    + LifeCollaborator
    + FacingCollaborator
    + PullingCollaborator
    + InteractionCollaborator
{
}

impl<T> World for T where
    T: MovementCollaborator
        + InventoryCollaborator
        + LifeCollaborator
        + FacingCollaborator
        + PullingCollaborator
        + InteractionCollaborator
{
}
