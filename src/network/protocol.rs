//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with binary (bincode) for flat payloads such as [`GameInput`].

use serde::{Serialize, Deserialize};
use crate::core::grid::{Direction, GridVec};
use crate::game::input::HeldKeys;
use crate::game::resolver::MovementMode;
use crate::game::state::{Intent, NetId};
use crate::game::tick::EntityInput;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start observing, optionally taking control of an entity.
    Join(JoinRequest),

    /// Held movement keys for a client tick.
    Input(GameInput),

    /// Ask the server to uncuff someone.
    RequestUncuff { target: NetId },

    /// Ask the server to unbuckle someone (possibly oneself).
    RequestUnbuckle { target: NetId },

    /// Owner switched interaction intent.
    IntentChanged { intent: Intent },

    /// Request a full snapshot (desync or reconnect).
    SyncRequest,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },

    /// Observer is leaving.
    Leave,
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Entity to control (None = spectate only).
    pub entity: Option<NetId>,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// Held keys for one client tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInput {
    /// Client tick number.
    pub tick: u32,
    /// Packed held keys (see [`HeldKeys`]).
    pub keys: u8,
    /// Diagonal movement preference.
    pub diagonal: bool,
}

impl GameInput {
    /// Convert for the simulation.
    pub fn to_entity_input(&self) -> EntityInput {
        EntityInput {
            tick: self.tick,
            keys: HeldKeys::from_bits(self.keys),
            mode: MovementMode::from_diagonal(self.diagonal),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Welcome(WelcomeInfo),

    /// Full replicated state (late join, resync).
    Snapshot(SnapshotInfo),

    /// One replicated field changed.
    FieldChanged(FieldUpdate),

    /// Entity no longer exists.
    Removed { entity: NetId },

    /// Show or hide the cuff UI (restrained entity's owner only).
    CuffUi { visible: bool },

    /// Authoritative facing overriding the owner's prediction.
    ForceFacing { entity: NetId, facing: Direction },

    /// Entity position after an authoritative step.
    Moved { entity: NetId, position: GridVec },

    /// Controlled entity is incapacitated; control moves to a ghost.
    GhostRequested { entity: NetId },

    /// Input acknowledgment.
    InputAck { tick: u32, server_tick: u32 },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Join result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Observer identifier (UUID string).
    pub observer_id: String,
    /// Controlled entity, if any.
    pub entity: Option<NetId>,
    /// Current server tick.
    pub server_tick: u32,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Server version.
    pub server_version: String,
}

/// Replicated state of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Network identity.
    pub entity: NetId,
    /// Input switch.
    pub allow_input: bool,
    /// Attachment target (None = unattached).
    pub attached_target: Option<NetId>,
    /// Cuffed.
    pub restrained: bool,
    /// Server swappability flag.
    pub swappable: bool,
    /// Ghost entity.
    pub ghost: bool,
    /// Walk-through entity.
    pub passable: bool,
    /// Current tile, if it has a body.
    pub position: Option<GridVec>,
}

/// Full snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Server tick the snapshot was taken at.
    pub tick: u32,
    /// All replicated entities, ordered by network identity.
    pub entities: Vec<EntitySnapshot>,
    /// SHA-256 over the replicated fields.
    pub state_hash: [u8; 32],
}

/// One replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// `allow_input`
    AllowInput(bool),
    /// `attached_target`
    AttachedTarget(Option<NetId>),
    /// `restrained`
    Restrained(bool),
    /// `swappable`
    Swappable(bool),
    /// `ghost`
    Ghost(bool),
    /// `passable`
    Passable(bool),
}

/// Field delta addressed to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Server tick of the change.
    pub tick: u32,
    /// Entity whose field changed.
    pub entity: NetId,
    /// New value.
    pub value: FieldValue,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
///
/// Authorization failures of uncuff/unbuckle requests never produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unparseable message.
    InvalidMessage,
    /// Message requires a prior Join.
    NotJoined,
    /// Join sent twice.
    AlreadyJoined,
    /// Requested entity does not exist.
    UnknownEntity,
    /// Requested entity already has a controller.
    EntityTaken,
    /// Observer limit reached.
    ServerFull,
    /// Version mismatch.
    VersionMismatch,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

impl GameInput {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
