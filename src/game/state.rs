//! Simulation State
//!
//! Entity identifiers, the per-entity authoritative state and the
//! [`SimState`] container. Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::core::grid::Direction;
use crate::core::notify::SubscriptionId;
use crate::game::attachment;
use crate::game::collab::{LifeCollaborator, PullingCollaborator, World};
use crate::game::events::SyncEvent;
use crate::game::input::ActionQueue;
use crate::game::resolver::{InputGate, MovementMode};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Server-local entity handle.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Network identity (UUID as bytes).
///
/// Only entities with a network identity are replicated and can be targeted
/// by clients or buckled to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct NetId(pub [u8; 16]);

impl NetId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random identity.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// LIFE / STANCE / INTENT
// =============================================================================

/// Consciousness as reported by the life collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    /// Fully conscious
    #[default]
    Conscious,
    /// Crawling / critical
    BarelyConscious,
    /// Knocked out
    Unconscious,
    /// Dead
    Dead,
}

impl LifeState {
    /// Unconscious or dead.
    #[inline]
    pub fn is_incapacitated(self) -> bool {
        matches!(self, LifeState::Unconscious | LifeState::Dead)
    }

    /// Fully conscious.
    #[inline]
    pub fn is_conscious(self) -> bool {
        self == LifeState::Conscious
    }
}

/// Body stance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// Upright (also sitting in a chair)
    #[default]
    Standing,
    /// Lying down or fallen over
    LyingDown,
}

/// Interaction intent selected on the owning client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Helpful (allows swapping places)
    #[default]
    Help,
    /// Disarm
    Disarm,
    /// Grab
    Grab,
    /// Harm
    Harm,
}

// =============================================================================
// STATE MACHINES
// =============================================================================

/// Action run once when an attachment is released.
///
/// Owned by whoever requested the attachment.
pub struct ReleaseCallback(Box<dyn FnOnce(EntityId) + Send>);

impl ReleaseCallback {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(EntityId) + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Run the callback for the released entity.
    pub fn invoke(self, entity: EntityId) {
        (self.0)(entity)
    }
}

impl fmt::Debug for ReleaseCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReleaseCallback(..)")
    }
}

/// Buckled / unbuckled.
#[derive(Debug, Default)]
pub enum AttachmentState {
    /// Free to move
    #[default]
    Unattached,
    /// Buckled to `target`
    AttachedTo {
        /// The anchor
        target: EntityId,
        /// Runs exactly once on release
        on_release: Option<ReleaseCallback>,
    },
}

impl AttachmentState {
    /// Target, if attached.
    #[inline]
    pub fn target(&self) -> Option<EntityId> {
        match self {
            AttachmentState::Unattached => None,
            AttachmentState::AttachedTo { target, .. } => Some(*target),
        }
    }

    /// Attached to anything?
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.target().is_some()
    }
}

/// Cuffed / free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestraintState {
    /// Hands free
    #[default]
    Free,
    /// Cuffed
    Restrained,
}

impl RestraintState {
    /// Cuffed?
    #[inline]
    pub fn is_restrained(self) -> bool {
        self == RestraintState::Restrained
    }
}

/// Live subscription that keeps an attached entity facing with its anchor.
#[derive(Debug)]
pub struct FacingFollow {
    /// Anchor being followed
    pub target: EntityId,
    /// Subscription handle for `unsubscribe_facing`
    pub subscription: SubscriptionId,
    /// Facing changes of the anchor
    pub changes: UnboundedReceiver<Direction>,
}

// =============================================================================
// ENTITY STATE
// =============================================================================

/// Authoritative per-entity state owned by the core.
#[derive(Debug)]
pub struct EntityState {
    /// Entity handle
    pub id: EntityId,

    /// Network identity (None = server-only entity)
    pub net_id: Option<NetId>,

    /// Explicit input switch (replicated)
    pub allow_input: bool,

    /// Buckle state (replicated as target net id)
    pub attachment: AttachmentState,

    /// Cuff state (replicated)
    pub restraint: RestraintState,

    /// Server swappability flag before refinement (replicated)
    pub swappable: bool,

    /// Last intent reported by the owning client
    pub reported_intent: Intent,

    /// Current stance
    pub stance: Stance,

    /// Can be pushed or pulled
    pub pushable: bool,

    /// Disembodied observer
    pub ghost: bool,

    /// Others can walk through it
    pub passable: bool,

    /// Movement preference of the controlling player
    pub mode: MovementMode,

    /// Active directional actions (never replicated)
    pub queue: ActionQueue,

    /// Client tick of the last input folded into `queue`
    pub last_input_tick: u32,

    /// Anchor facing subscription while attached
    pub facing_follow: Option<FacingFollow>,
}

impl EntityState {
    /// Create a new, free, unattached entity.
    pub fn new(id: EntityId, net_id: Option<NetId>) -> Self {
        Self {
            id,
            net_id,
            allow_input: true,
            attachment: AttachmentState::Unattached,
            restraint: RestraintState::Free,
            swappable: true,
            reported_intent: Intent::Help,
            stance: Stance::Standing,
            pushable: true,
            ghost: false,
            passable: false,
            mode: MovementMode::AxisLocked,
            queue: ActionQueue::new(),
            last_input_tick: 0,
            facing_follow: None,
        }
    }

    /// Buckled to anything?
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attachment.is_attached()
    }

    /// Cuffed?
    #[inline]
    pub fn is_restrained(&self) -> bool {
        self.restraint.is_restrained()
    }
}

// =============================================================================
// SIM STATE
// =============================================================================

/// Errors from entity bookkeeping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// Another entity already owns this network identity.
    #[error("network identity {0:?} already registered")]
    DuplicateNetId(NetId),
}

/// Complete authoritative state of the simulation.
///
/// Generic over the collaborator implementation `W`.
#[derive(Debug)]
pub struct SimState<W> {
    /// Current tick
    pub tick: u32,

    /// All entities (BTreeMap for deterministic iteration)
    pub entities: BTreeMap<EntityId, EntityState>,

    /// Network identity index
    net_index: BTreeMap<NetId, EntityId>,

    /// External collaborators
    pub world: W,

    /// Next entity id (monotonic counter)
    next_entity_id: u32,

    /// Events generated this tick (cleared each tick)
    pending_events: Vec<SyncEvent>,

    /// Pulling-changed channel from the pulling collaborator
    pub(crate) pulling_changes: UnboundedReceiver<EntityId>,
}

impl<W: PullingCollaborator> SimState<W> {
    /// Create a new simulation around a collaborator set.
    pub fn new(mut world: W) -> Self {
        let (_subscription, pulling_changes) = world.subscribe_pulling_changes();
        Self {
            tick: 0,
            entities: BTreeMap::new(),
            net_index: BTreeMap::new(),
            world,
            next_entity_id: 1,
            pending_events: Vec::new(),
            pulling_changes,
        }
    }
}

impl<W> SimState<W> {
    /// Register a new entity.
    pub fn spawn(&mut self, net_id: Option<NetId>) -> Result<EntityId, StateError> {
        if let Some(net) = net_id {
            if self.net_index.contains_key(&net) {
                return Err(StateError::DuplicateNetId(net));
            }
        }

        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;

        if let Some(net) = net_id {
            self.net_index.insert(net, id);
        }
        self.entities.insert(id, EntityState::new(id, net_id));
        debug!("Spawned entity {} (net {:?})", id, net_id.map(|n| n.short()));
        Ok(id)
    }

    /// Remove an entity's bookkeeping without touching attachments.
    pub(crate) fn remove_entity(&mut self, id: EntityId) -> Option<EntityState> {
        let state = self.entities.remove(&id)?;
        if let Some(net) = state.net_id {
            self.net_index.remove(&net);
        }
        Some(state)
    }

    /// Get an entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    /// Get an entity mutably by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut EntityState> {
        self.entities.get_mut(&id)
    }

    /// Resolve a network identity. Unknown or destroyed entities resolve to
    /// `None`.
    pub fn resolve_net(&self, net_id: &NetId) -> Option<EntityId> {
        self.net_index.get(net_id).copied()
    }

    /// Network identity of an entity.
    pub fn net_id_of(&self, id: EntityId) -> Option<NetId> {
        self.entities.get(&id).and_then(|e| e.net_id)
    }

    /// Entities currently attached to `target`.
    pub fn attached_to(&self, target: EntityId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.attachment.target() == Some(target))
            .map(|e| e.id)
            .collect()
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a sync event.
    pub fn push_event(&mut self, event: SyncEvent) {
        self.pending_events.push(event);
    }
}

impl<W: LifeCollaborator + PullingCollaborator> SimState<W> {
    /// Build the input gate for an entity from authoritative state.
    pub fn input_gate(&self, id: EntityId) -> Option<InputGate> {
        let entity = self.entities.get(&id)?;
        Some(InputGate {
            allow_input: entity.allow_input,
            attached: entity.is_attached(),
            restrained: entity.is_restrained(),
            being_pulled: self.world.is_being_pulled(id),
            life: self.world.life_state(id),
        })
    }
}

impl<W: World> SimState<W> {
    /// Destroy an entity. Everything attached to it is released first, and
    /// the entity itself is released if it was attached. Pulls on either
    /// side end and the body leaves the world.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.entities.contains_key(&id) {
            return false;
        }
        for rider in self.attached_to(id) {
            attachment::release(self, rider);
        }
        attachment::release(self, id);

        self.world.stop_pulling(id);
        self.world.release_pulled_by(id);
        self.world.remove(id);

        self.remove_entity(id);
        let tick = self.tick;
        self.push_event(SyncEvent::despawned(tick, id));
        debug!("Despawned entity {}", id);
        true
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::SimWorld;

    #[test]
    fn test_entity_id_ordering() {
        assert!(EntityId(1) < EntityId(2));
        assert!(NetId::new([0; 16]) < NetId::new([1; 16]));
    }

    #[test]
    fn test_net_id_uuid_roundtrip() {
        let id = NetId::new([0xab; 16]);
        let parsed = NetId::from_uuid_str(&id.to_uuid_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short(), "abababab");
        assert!(NetId::from_uuid_str("not-a-uuid").is_none());
    }

    #[test]
    fn test_spawn_and_resolve() {
        let mut state = SimState::new(SimWorld::new());
        let net = NetId::new([1; 16]);
        let a = state.spawn(Some(net)).unwrap();
        let b = state.spawn(None).unwrap();

        assert_ne!(a, b);
        assert_eq!(state.resolve_net(&net), Some(a));
        assert_eq!(state.net_id_of(b), None);
        assert_eq!(state.spawn(Some(net)), Err(StateError::DuplicateNetId(net)));
    }

    #[test]
    fn test_removed_entity_resolves_to_none() {
        let mut state = SimState::new(SimWorld::new());
        let net = NetId::new([2; 16]);
        let a = state.spawn(Some(net)).unwrap();
        assert!(state.remove_entity(a).is_some());
        assert_eq!(state.resolve_net(&net), None);
        assert!(state.entity(a).is_none());
    }

    #[test]
    fn test_despawn_releases_riders() {
        let mut state = SimState::new(SimWorld::new());
        let rider = state.spawn(None).unwrap();
        let chair = state.spawn(Some(NetId::new([3; 16]))).unwrap();
        state.world.add_body(rider, crate::core::grid::GridVec::ZERO);
        state.world.add_body(chair, crate::core::grid::GridVec::RIGHT);

        let released = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&released);
        attachment::attach(&mut state, rider, chair, ReleaseCallback::new(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }))
        .unwrap();

        assert!(state.despawn(chair));
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!state.entity(rider).unwrap().is_attached());
        assert!(!state.despawn(chair));
    }

    #[test]
    fn test_despawned_puller_frees_restrained() {
        use crate::core::grid::GridVec;
        use crate::game::resolver::Resolution;
        use crate::game::collab::{MovementCollaborator, PullingCollaborator};

        let mut state = SimState::new(SimWorld::new());
        let prisoner = state.spawn(None).unwrap();
        let guard = state.spawn(None).unwrap();
        state.world.add_body(prisoner, GridVec::ZERO);
        state.world.add_body(guard, GridVec::RIGHT);
        state.entity_mut(prisoner).unwrap().restraint = RestraintState::Restrained;
        assert!(state.world.start_pull(guard, prisoner));

        assert!(state.despawn(guard));
        assert!(!state.world.is_being_pulled(prisoner));
        assert!(state.world.position(guard).is_none());

        let mut inputs = BTreeMap::new();
        inputs.insert(prisoner, crate::game::tick::EntityInput {
            tick: 1,
            keys: crate::game::input::HeldKeys::from_bits(crate::game::input::HeldKeys::KEY_LEFT),
            mode: MovementMode::AxisLocked,
        });
        let result = crate::game::tick::tick(&mut state, &inputs, &Default::default());
        assert_eq!(result.resolutions.get(&prisoner), Some(&Resolution::Move(GridVec::LEFT)));
    }

    #[test]
    fn test_despawn_clears_facing_subscribers() {
        use crate::core::grid::GridVec;
        use crate::game::collab::FacingCollaborator;

        let mut state = SimState::new(SimWorld::new());
        let anchor = state.spawn(None).unwrap();
        state.world.add_body(anchor, GridVec::ZERO);
        let (_sub, _rx) = state.world.subscribe_facing(anchor);
        assert_eq!(state.world.facing_subscribers(anchor), 1);

        state.despawn(anchor);
        assert_eq!(state.world.facing_subscribers(anchor), 0);
    }

    #[test]
    fn test_release_callback_debug() {
        let cb = ReleaseCallback::new(|_| {});
        assert_eq!(format!("{:?}", cb), "ReleaseCallback(..)");
    }

    #[test]
    fn test_fresh_entity_defaults() {
        let entity = EntityState::new(EntityId(1), None);
        assert!(entity.allow_input);
        assert!(!entity.is_attached());
        assert!(!entity.is_restrained());
        assert!(entity.pushable);
        assert_eq!(entity.stance, Stance::Standing);
    }
}
