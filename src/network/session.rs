//! Sync Session
//!
//! One shared simulation and everyone observing it. Routes client messages
//! into the state machines, runs ticks, broadcasts replication and delivers
//! owner-only messages (cuff UI, forced facing, ghost hand-over).
//!
//! Observers may join at any time; a join is answered with a full snapshot
//! so late joiners see current state, not just future deltas.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::grid::GridVec;
use crate::game::attachment::request_unbuckle;
use crate::game::collab::World;
use crate::game::events::{SyncEvent, SyncEventData};
use crate::game::input::HeldKeys;
use crate::game::restraint::request_uncuff;
use crate::game::state::{EntityId, NetId, SimState, StateError};
use crate::game::swap::on_intent_changed;
use crate::game::tick::{tick, EntityInput, SimConfig, TickResult};
use crate::network::protocol::{
    ClientMessage, ErrorCode, JoinRequest, ServerMessage, WelcomeInfo,
};
use crate::network::replication::{snapshot, Replicator};

/// Unique observer identifier.
pub type ObserverId = [u8; 16];

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum simultaneous observers.
    pub max_observers: usize,
    /// Ticks per second (reported to clients).
    pub tick_rate: u32,
    /// Server version string.
    pub server_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_observers: 64,
            tick_rate: 20,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A connected client.
#[derive(Debug)]
pub struct Observer {
    /// Observer identifier.
    pub id: ObserverId,
    /// Entity this observer controls, if any.
    pub controlled: Option<EntityId>,
    /// Last input tick received.
    pub last_input_tick: u32,
    /// Message channel to this observer.
    pub sender: mpsc::Sender<ServerMessage>,
}

/// Session errors. These are reported back to the client; authorization
/// failures of uncuff/unbuckle requests are not errors and never get here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Observer limit reached.
    #[error("Session is full")]
    SessionFull,

    /// Observer already joined.
    #[error("Already joined")]
    AlreadyJoined,

    /// Observer unknown.
    #[error("Not joined")]
    NotJoined,

    /// Requested entity does not exist.
    #[error("Unknown entity")]
    UnknownEntity,

    /// Requested entity is controlled by someone else.
    #[error("Entity already controlled")]
    EntityTaken,

    /// Entity bookkeeping failed.
    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl SessionError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::SessionFull => ErrorCode::ServerFull,
            SessionError::AlreadyJoined => ErrorCode::AlreadyJoined,
            SessionError::NotJoined => ErrorCode::NotJoined,
            SessionError::UnknownEntity => ErrorCode::UnknownEntity,
            SessionError::EntityTaken => ErrorCode::EntityTaken,
            SessionError::State(_) => ErrorCode::InternalError,
        }
    }
}

/// The shared session.
pub struct SyncSession<W> {
    /// Session configuration.
    pub config: SessionConfig,
    /// Simulation configuration.
    sim_config: SimConfig,
    /// Authoritative state.
    state: SimState<W>,
    /// Replication bookkeeping.
    replicator: Replicator,
    /// Connected observers.
    observers: BTreeMap<ObserverId, Observer>,
    /// Inputs received since the last tick.
    pending_inputs: BTreeMap<EntityId, EntityInput>,
}

impl<W: World> SyncSession<W> {
    /// Create a session around a collaborator set.
    pub fn new(world: W, config: SessionConfig, sim_config: SimConfig) -> Self {
        Self {
            config,
            sim_config,
            state: SimState::new(world),
            replicator: Replicator::new(),
            observers: BTreeMap::new(),
            pending_inputs: BTreeMap::new(),
        }
    }

    /// Authoritative state.
    pub fn state(&self) -> &SimState<W> {
        &self.state
    }

    /// Authoritative state, for server-side operations (cuff, attach, ...).
    pub fn state_mut(&mut self) -> &mut SimState<W> {
        &mut self.state
    }

    /// Get current tick.
    pub fn current_tick(&self) -> u32 {
        self.state.tick
    }

    /// Get observer count.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Register a networked entity with a fresh identity.
    pub fn spawn_networked(&mut self) -> Result<(EntityId, NetId), SessionError> {
        let net = NetId::generate();
        let id = self.state.spawn(Some(net))?;
        Ok((id, net))
    }

    /// Observer controlling an entity.
    pub fn owner_of(&self, entity: EntityId) -> Option<ObserverId> {
        self.observers
            .values()
            .find(|o| o.controlled == Some(entity))
            .map(|o| o.id)
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Add an observer, optionally taking control of an entity.
    ///
    /// Sends `Welcome` followed by a full snapshot.
    pub fn join(
        &mut self,
        observer: ObserverId,
        sender: mpsc::Sender<ServerMessage>,
        request: &JoinRequest,
    ) -> Result<WelcomeInfo, SessionError> {
        if self.observers.contains_key(&observer) {
            return Err(SessionError::AlreadyJoined);
        }
        if self.observers.len() >= self.config.max_observers {
            return Err(SessionError::SessionFull);
        }

        let controlled = match request.entity {
            Some(net) => {
                let id = self.state.resolve_net(&net).ok_or(SessionError::UnknownEntity)?;
                if self.owner_of(id).is_some() {
                    return Err(SessionError::EntityTaken);
                }
                if let Some(entity) = self.state.entity_mut(id) {
                    entity.mode = self.sim_config.default_mode;
                }
                Some(id)
            }
            None => None,
        };

        self.observers.insert(observer, Observer {
            id: observer,
            controlled,
            last_input_tick: 0,
            sender,
        });

        let welcome = WelcomeInfo {
            observer_id: uuid::Uuid::from_bytes(observer).to_string(),
            entity: request.entity,
            server_tick: self.state.tick,
            tick_rate: self.config.tick_rate,
            server_version: self.config.server_version.clone(),
        };
        self.send_to(&observer, ServerMessage::Welcome(welcome.clone()));
        self.send_to(&observer, ServerMessage::Snapshot(snapshot(&self.state)));

        info!(
            "Observer {} joined (controls {:?})",
            hex::encode(&observer[..4]),
            request.entity.map(|n| n.short())
        );
        Ok(welcome)
    }

    /// Remove an observer. Its entity stops moving.
    pub fn leave(&mut self, observer: &ObserverId) -> bool {
        let Some(removed) = self.observers.remove(observer) else {
            return false;
        };
        if let Some(entity) = removed.controlled {
            let tick = self.state.entity(entity).map(|e| e.last_input_tick).unwrap_or(0);
            self.pending_inputs.insert(entity, EntityInput {
                tick,
                keys: HeldKeys::NONE,
                mode: self.sim_config.default_mode,
            });
        }
        info!("Observer {} left", hex::encode(&observer[..4]));
        true
    }

    // -------------------------------------------------------------------------
    // Client messages
    // -------------------------------------------------------------------------

    /// Handle a message from a joined observer.
    pub fn handle_message(&mut self, observer: &ObserverId, msg: ClientMessage) -> Result<(), SessionError> {
        let controlled = self
            .observers
            .get(observer)
            .ok_or(SessionError::NotJoined)?
            .controlled;

        match msg {
            ClientMessage::Join(_) => return Err(SessionError::AlreadyJoined),

            ClientMessage::Input(input) => {
                let Some(entity) = controlled else {
                    debug!("Input from spectator dropped");
                    return Ok(());
                };
                // Never let an older input replace a newer one, queued or applied
                let applied = self.state.entity(entity).map(|e| e.last_input_tick).unwrap_or(0);
                let queued = self.pending_inputs.get(&entity).map(|i| i.tick).unwrap_or(0);
                if input.tick < applied.max(queued) {
                    debug!("Stale input {} for {} dropped", input.tick, entity);
                    return Ok(());
                }
                self.pending_inputs.insert(entity, input.to_entity_input());
                if let Some(o) = self.observers.get_mut(observer) {
                    o.last_input_tick = input.tick;
                }
                let ack = ServerMessage::InputAck {
                    tick: input.tick,
                    server_tick: self.state.tick,
                };
                self.send_to(observer, ack);
            }

            ClientMessage::RequestUncuff { target } => {
                // Unknown targets resolve to nothing and the request is dropped
                if let Some(target) = self.state.resolve_net(&target) {
                    request_uncuff(&mut self.state, controlled, target);
                } else {
                    debug!("Uncuff request for unknown target dropped");
                }
            }

            ClientMessage::RequestUnbuckle { target } => {
                if let Some(target) = self.state.resolve_net(&target) {
                    request_unbuckle(&mut self.state, controlled, target);
                } else {
                    debug!("Unbuckle request for unknown target dropped");
                }
            }

            ClientMessage::IntentChanged { intent } => {
                if let Some(entity) = controlled {
                    on_intent_changed(&mut self.state, entity, intent);
                }
            }

            ClientMessage::SyncRequest => {
                let snap = snapshot(&self.state);
                self.send_to(observer, ServerMessage::Snapshot(snap));
            }

            ClientMessage::Ping { timestamp } => {
                let server_time = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                self.send_to(observer, ServerMessage::Pong { timestamp, server_time });
            }

            ClientMessage::Leave => {
                self.leave(observer);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run a single tick and push everything it produced to observers.
    pub fn run_tick(&mut self) -> TickResult {
        let inputs = std::mem::take(&mut self.pending_inputs);
        let result = tick(&mut self.state, &inputs, &self.sim_config);

        let batch = self.replicator.collect(&self.state);
        for update in batch.updates {
            self.broadcast(ServerMessage::FieldChanged(update));
        }
        for entity in batch.removed {
            self.broadcast(ServerMessage::Removed { entity });
        }

        for event in &result.events {
            self.dispatch_event(event);
        }

        result
    }

    fn dispatch_event(&mut self, event: &SyncEvent) {
        match &event.data {
            SyncEventData::CuffUiToggled { entity, visible } => {
                self.send_to_owner(*entity, ServerMessage::CuffUi { visible: *visible });
            }
            SyncEventData::FacingForced { entity, facing } => {
                if let Some(net) = self.state.net_id_of(*entity) {
                    self.send_to_owner(*entity, ServerMessage::ForceFacing { entity: net, facing: *facing });
                }
            }
            SyncEventData::GhostRequested { entity } => {
                if let Some(net) = self.state.net_id_of(*entity) {
                    self.send_to_owner(*entity, ServerMessage::GhostRequested { entity: net });
                }
            }
            SyncEventData::Moved { entity, to, .. } => {
                self.broadcast_position(*entity, *to);
            }
            SyncEventData::Despawned { entity } => {
                for observer in self.observers.values_mut() {
                    if observer.controlled == Some(*entity) {
                        observer.controlled = None;
                    }
                }
            }
            SyncEventData::RestraintChanged { .. }
            | SyncEventData::AttachmentChanged { .. }
            | SyncEventData::StanceChanged { .. }
            | SyncEventData::SwappableChanged { .. } => {
                debug!("Tick {}: {:?}", event.tick, event.data);
            }
        }
    }

    fn broadcast_position(&self, entity: EntityId, position: GridVec) {
        if let Some(net) = self.state.net_id_of(entity) {
            self.broadcast(ServerMessage::Moved { entity: net, position });
        }
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Send to one observer. A full or closed channel drops the message.
    pub fn send_to(&self, observer: &ObserverId, message: ServerMessage) {
        if let Some(o) = self.observers.get(observer) {
            if let Err(e) = o.sender.try_send(message) {
                warn!("Dropping message to {}: {}", hex::encode(&observer[..4]), e);
            }
        }
    }

    fn send_to_owner(&self, entity: EntityId, message: ServerMessage) {
        if let Some(owner) = self.owner_of(entity) {
            self.send_to(&owner, message);
        }
    }

    /// Broadcast a message to all observers.
    pub fn broadcast(&self, message: ServerMessage) {
        for id in self.observers.keys() {
            self.send_to(id, message.clone());
        }
    }
}
