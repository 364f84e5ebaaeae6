//! Client Mirror
//!
//! Client-side copy of replicated state plus local prediction.
//!
//! Every predicted value sits next to its authoritative value in a
//! [`Synced`]. Authoritative updates overwrite both; nothing is merged.
//! Field updates are applied idempotently: re-delivering a value that is
//! already held fires no events and touches no subscriptions.

use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::core::grid::{Direction, GridVec, Rotation};
use crate::core::notify::{SubscriptionId, TopicNotifier};
use crate::game::input::{ActionQueue, HeldKeys, InputSampler};
use crate::game::menu::{restraint_entries, MenuEntry};
use crate::game::resolver::{resolve, InputGate, MovementMode, Resolution};
use crate::game::state::{Intent, LifeState, NetId};
use crate::game::swap::{refine, server_swappable};
use crate::network::protocol::{
    ClientMessage, EntitySnapshot, FieldUpdate, FieldValue, GameInput, ServerMessage, SnapshotInfo,
};
use crate::network::replication::{hash_entities, ReplicatedFields};

// =============================================================================
// SYNCED VALUE
// =============================================================================

/// Authoritative value and local prediction, kept as two explicit copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Synced<T> {
    authoritative: T,
    predicted: T,
}

impl<T: Clone + PartialEq> Synced<T> {
    /// Both copies start at `value`.
    pub fn new(value: T) -> Self {
        Self {
            authoritative: value.clone(),
            predicted: value,
        }
    }

    /// Last value from the server.
    pub fn authoritative(&self) -> &T {
        &self.authoritative
    }

    /// Local prediction.
    pub fn predicted(&self) -> &T {
        &self.predicted
    }

    /// Change the prediction only.
    pub fn predict(&mut self, value: T) {
        self.predicted = value;
    }

    /// Overwrite both copies. Returns true if the authoritative value changed.
    pub fn reconcile(&mut self, value: T) -> bool {
        let changed = self.authoritative != value;
        self.authoritative = value.clone();
        self.predicted = value;
        changed
    }

    /// Throw the prediction away.
    pub fn reset_prediction(&mut self) {
        self.predicted = self.authoritative.clone();
    }

    /// Does the prediction disagree with the server?
    pub fn is_diverged(&self) -> bool {
        self.authoritative != self.predicted
    }
}

// =============================================================================
// FACING FEED
// =============================================================================

/// Client-side facing-changed channels, keyed by network identity.
pub trait FacingFeed {
    /// Listen to facing changes of `target`.
    fn subscribe(&mut self, target: NetId) -> (SubscriptionId, UnboundedReceiver<Direction>);

    /// Stop listening.
    fn unsubscribe(&mut self, target: NetId, id: SubscriptionId) -> bool;
}

/// In-memory facing feed.
#[derive(Debug, Default)]
pub struct FacingHub {
    notifier: TopicNotifier<NetId, Direction>,
}

impl FacingHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a facing change.
    pub fn publish(&mut self, entity: NetId, facing: Direction) -> usize {
        self.notifier.notify(entity, &facing)
    }

    /// Listener count for one entity.
    pub fn listeners(&self, entity: NetId) -> usize {
        self.notifier.subscriber_count(entity)
    }
}

impl FacingFeed for FacingHub {
    fn subscribe(&mut self, target: NetId) -> (SubscriptionId, UnboundedReceiver<Direction>) {
        self.notifier.subscribe(target)
    }

    fn unsubscribe(&mut self, target: NetId, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(target, id)
    }
}

// =============================================================================
// MIRROR
// =============================================================================

/// Something the client UI or input layer should react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirrorEvent {
    /// Replicated restraint flipped
    RestraintChanged { entity: NetId, old: bool, new: bool },
    /// Replicated attachment target changed
    AttachmentChanged { entity: NetId, old: Option<NetId>, new: Option<NetId> },
    /// Show or hide the unbuckle quick action (local entity only)
    UnbuckleAffordance { visible: bool },
    /// Local movement prediction was discarded
    PredictionReset,
    /// Show or hide the cuff UI
    CuffUi { visible: bool },
    /// Server overrode a facing
    FacingForced { entity: NetId, facing: Direction },
    /// Local entity handed over to a ghost
    GhostRequested,
    /// Entity left replication
    Removed { entity: NetId },
    /// Snapshot hash mismatch; a resync was queued
    DesyncDetected,
}

struct FacingListener {
    target: NetId,
    subscription: SubscriptionId,
    changes: UnboundedReceiver<Direction>,
}

/// Client copy of one replicated entity.
pub struct MirroredEntity {
    /// Authoritative replicated fields
    fields: ReplicatedFields,
    /// Server flag plus owner prediction
    swappable: Synced<bool>,
    /// Tile, predicted for the local entity
    pub position: Synced<Option<GridVec>>,
    /// Last known facing
    pub facing: Option<Direction>,
    listener: Option<FacingListener>,
}

impl MirroredEntity {
    fn new() -> Self {
        Self {
            fields: ReplicatedFields::default(),
            swappable: Synced::new(false),
            position: Synced::new(None),
            facing: None,
            listener: None,
        }
    }

    /// Replicated input switch.
    pub fn allow_input(&self) -> bool {
        self.fields.allow_input
    }

    /// Replicated attachment target.
    pub fn attached_target(&self) -> Option<NetId> {
        self.fields.attached_target
    }

    /// Replicated restraint flag.
    pub fn restrained(&self) -> bool {
        self.fields.restrained
    }

    /// Swappability flag pair.
    pub fn swappable(&self) -> &Synced<bool> {
        &self.swappable
    }

    /// Replicated ghost flag.
    pub fn ghost(&self) -> bool {
        self.fields.ghost
    }

    /// Replicated walk-through flag.
    pub fn passable(&self) -> bool {
        self.fields.passable
    }
}

/// Client-side mirror of the replicated world.
pub struct ClientMirror<F: FacingFeed> {
    local: Option<NetId>,
    entities: BTreeMap<NetId, MirroredEntity>,
    feed: F,

    // Local-only state of the controlling client
    queue: ActionQueue,
    mode: MovementMode,
    intent: Intent,
    pulling: bool,
    being_pulled: bool,
    frame: Rotation,
    input_tick: u32,

    cuff_ui: bool,
    unbuckle_affordance: bool,
    outbox: Vec<ClientMessage>,
}

impl<F: FacingFeed> ClientMirror<F> {
    /// Create an empty mirror.
    pub fn new(feed: F) -> Self {
        Self {
            local: None,
            entities: BTreeMap::new(),
            feed,
            queue: ActionQueue::new(),
            mode: MovementMode::AxisLocked,
            intent: Intent::Help,
            pulling: false,
            being_pulled: false,
            frame: Rotation::IDENTITY,
            input_tick: 0,
            cuff_ui: false,
            unbuckle_affordance: false,
            outbox: Vec::new(),
        }
    }

    /// Locally controlled entity.
    pub fn local(&self) -> Option<NetId> {
        self.local
    }

    /// Mirrored entity.
    pub fn entity(&self, id: NetId) -> Option<&MirroredEntity> {
        self.entities.get(&id)
    }

    /// Number of mirrored entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// No entities mirrored?
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Facing feed (the client's facing collaborator).
    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Facing feed, mutably.
    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    /// Is the cuff UI showing?
    pub fn cuff_ui_visible(&self) -> bool {
        self.cuff_ui
    }

    /// Is the unbuckle quick action showing?
    pub fn unbuckle_visible(&self) -> bool {
        self.unbuckle_affordance
    }

    /// Messages the mirror wants sent to the server.
    pub fn take_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    // -------------------------------------------------------------------------
    // Server messages
    // -------------------------------------------------------------------------

    /// Apply one server message.
    pub fn apply(&mut self, msg: &ServerMessage) -> Vec<MirrorEvent> {
        let mut events = Vec::new();
        match msg {
            ServerMessage::Welcome(info) => {
                self.local = info.entity;
            }
            ServerMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot, &mut events),
            ServerMessage::FieldChanged(update) => self.apply_field(update, &mut events),
            ServerMessage::Removed { entity } => self.remove(*entity, &mut events),
            ServerMessage::CuffUi { visible } => {
                if self.cuff_ui != *visible {
                    self.cuff_ui = *visible;
                    events.push(MirrorEvent::CuffUi { visible: *visible });
                }
            }
            ServerMessage::ForceFacing { entity, facing } => {
                if let Some(e) = self.entities.get_mut(entity) {
                    e.facing = Some(*facing);
                }
                events.push(MirrorEvent::FacingForced { entity: *entity, facing: *facing });
            }
            ServerMessage::Moved { entity, position } => {
                if let Some(e) = self.entities.get_mut(entity) {
                    e.position.reconcile(Some(*position));
                }
            }
            ServerMessage::GhostRequested { entity } => {
                if Some(*entity) == self.local {
                    events.push(MirrorEvent::GhostRequested);
                }
            }
            ServerMessage::InputAck { .. }
            | ServerMessage::Pong { .. }
            | ServerMessage::Error(_)
            | ServerMessage::Shutdown { .. } => {}
        }
        events
    }

    fn apply_snapshot(&mut self, snapshot: &SnapshotInfo, events: &mut Vec<MirrorEvent>) {
        if hash_entities(&snapshot.entities) != snapshot.state_hash {
            warn!("Snapshot hash mismatch at tick {}, requesting resync", snapshot.tick);
            self.outbox.push(ClientMessage::SyncRequest);
            events.push(MirrorEvent::DesyncDetected);
            return;
        }

        let present: Vec<NetId> = snapshot.entities.iter().map(|e| e.entity).collect();
        let stale: Vec<NetId> = self
            .entities
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.remove(id, events);
        }

        for e in &snapshot.entities {
            self.apply_entity_snapshot(snapshot.tick, e, events);
        }
    }

    fn apply_entity_snapshot(&mut self, tick: u32, snap: &EntitySnapshot, events: &mut Vec<MirrorEvent>) {
        let fields = ReplicatedFields {
            allow_input: snap.allow_input,
            attached_target: snap.attached_target,
            restrained: snap.restrained,
            swappable: snap.swappable,
            ghost: snap.ghost,
            passable: snap.passable,
        };
        for value in fields.values() {
            self.apply_field(&FieldUpdate { tick, entity: snap.entity, value }, events);
        }
        if let Some(e) = self.entities.get_mut(&snap.entity) {
            e.position.reconcile(snap.position);
        }
    }

    fn apply_field(&mut self, update: &FieldUpdate, events: &mut Vec<MirrorEvent>) {
        let id = update.entity;
        let is_local = self.local == Some(id);
        let entity = self.entities.entry(id).or_insert_with(MirroredEntity::new);

        match update.value {
            FieldValue::AllowInput(v) => entity.fields.allow_input = v,
            FieldValue::Ghost(v) => entity.fields.ghost = v,
            FieldValue::Passable(v) => entity.fields.passable = v,
            FieldValue::Swappable(v) => {
                entity.swappable.reconcile(v);
                entity.fields.swappable = v;
            }
            FieldValue::Restrained(new) => {
                let old = entity.fields.restrained;
                if old != new {
                    entity.fields.restrained = new;
                    events.push(MirrorEvent::RestraintChanged { entity: id, old, new });
                }
            }
            FieldValue::AttachedTarget(new) => {
                let old = entity.fields.attached_target;
                if old == new {
                    return;
                }
                entity.fields.attached_target = new;

                // Unsubscribe the old anchor before subscribing to the new one
                if let Some(listener) = entity.listener.take() {
                    self.feed.unsubscribe(listener.target, listener.subscription);
                }
                if let Some(target) = new {
                    let (subscription, changes) = self.feed.subscribe(target);
                    entity.listener = Some(FacingListener { target, subscription, changes });
                }
                events.push(MirrorEvent::AttachmentChanged { entity: id, old, new });

                if is_local {
                    entity.position.reset_prediction();
                    self.queue = ActionQueue::new();
                    self.unbuckle_affordance = new.is_some();
                    events.push(MirrorEvent::UnbuckleAffordance { visible: new.is_some() });
                    events.push(MirrorEvent::PredictionReset);
                }
            }
        }
    }

    fn remove(&mut self, id: NetId, events: &mut Vec<MirrorEvent>) {
        let Some(mut entity) = self.entities.remove(&id) else {
            return;
        };
        if let Some(listener) = entity.listener.take() {
            self.feed.unsubscribe(listener.target, listener.subscription);
        }
        debug!("Mirror dropped {}", id.short());
        events.push(MirrorEvent::Removed { entity: id });
    }

    /// Copy anchor facing changes onto attached entities.
    pub fn drain_facing(&mut self) {
        for entity in self.entities.values_mut() {
            let Some(listener) = entity.listener.as_mut() else {
                continue;
            };
            while let Ok(direction) = listener.changes.try_recv() {
                entity.facing = Some(direction);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Local prediction
    // -------------------------------------------------------------------------

    /// Set the movement mode preference.
    pub fn set_mode(&mut self, mode: MovementMode) {
        self.mode = mode;
    }

    /// Rotation of the frame the local entity stands on.
    pub fn set_frame(&mut self, frame: Rotation) {
        self.frame = frame;
    }

    /// Local pulling observations (feed swappability prediction and gating).
    pub fn set_pulling(&mut self, pulling: bool, being_pulled: bool) {
        self.pulling = pulling;
        self.being_pulled = being_pulled;
        self.predict_swappable();
    }

    /// Switch intent locally and tell the server.
    pub fn set_intent(&mut self, intent: Intent) {
        if self.intent == intent {
            return;
        }
        self.intent = intent;
        self.predict_swappable();
        self.outbox.push(ClientMessage::IntentChanged { intent });
    }

    fn predict_swappable(&mut self) {
        let predicted = server_swappable(self.intent, self.pulling);
        if let Some(entity) = self.local.and_then(|id| self.entities.get_mut(&id)) {
            entity.swappable.predict(predicted);
        }
    }

    /// Sample keys, predict one step and queue the input for the server.
    pub fn step_input(&mut self, raw: HeldKeys) -> Resolution {
        let keys = InputSampler.sample(&raw);
        self.queue.update(keys);
        self.input_tick += 1;
        self.outbox.push(ClientMessage::Input(GameInput {
            tick: self.input_tick,
            keys: keys.bits,
            diagonal: self.mode == MovementMode::Diagonal,
        }));

        let Some(entity) = self.local.and_then(|id| self.entities.get_mut(&id)) else {
            return Resolution::Blocked;
        };
        let gate = InputGate {
            allow_input: entity.fields.allow_input,
            attached: entity.fields.attached_target.is_some(),
            restrained: entity.fields.restrained,
            being_pulled: self.being_pulled,
            // The client has no authority over consciousness
            life: LifeState::Conscious,
        };
        let resolution = resolve(&self.queue, self.mode, self.frame, &gate);
        if let Resolution::Move(step) = resolution {
            if let Some(tile) = *entity.position.predicted() {
                if !step.is_zero() {
                    entity.position.predict(Some(tile + step));
                }
            }
        }
        resolution
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Can `id` be swapped with right now, as far as this client knows?
    ///
    /// The local entity uses its prediction; everyone else the server flag.
    pub fn is_swappable(&self, id: NetId) -> bool {
        let Some(entity) = self.entities.get(&id) else {
            return false;
        };
        let base = if self.local == Some(id) {
            *entity.swappable.predicted()
        } else {
            *entity.swappable.authoritative()
        };
        let fields = &entity.fields;
        refine(base, fields.ghost, fields.passable, fields.attached_target.is_some())
    }

    /// Context menu entries for `target`.
    pub fn menu_entries(&self, target: NetId) -> Vec<MenuEntry> {
        let restrained = self.entities.get(&target).map(|e| e.fields.restrained).unwrap_or(false);
        restraint_entries(self.local, target, restrained)
    }

    /// Pick a menu entry.
    pub fn choose(&mut self, entry: MenuEntry) {
        match entry {
            MenuEntry::Uncuff { target } => {
                self.outbox.push(ClientMessage::RequestUncuff { target });
            }
        }
    }

    /// Press the unbuckle quick action.
    pub fn press_unbuckle(&mut self) -> bool {
        match self.local {
            Some(local) if self.unbuckle_affordance => {
                self.outbox.push(ClientMessage::RequestUnbuckle { target: local });
                true
            }
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
