//! Network Layer
//!
//! Wire protocol, replication, the client-side mirror and the WebSocket
//! server. This layer is **non-deterministic**; all simulation runs through
//! `game/`.

pub mod protocol;
pub mod replication;
pub mod mirror;
pub mod session;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, GameInput, JoinRequest, EntitySnapshot, SnapshotInfo,
    FieldUpdate, FieldValue, ErrorCode,
};
pub use replication::{Replicator, ReplicatedFields, snapshot};
pub use mirror::{ClientMirror, FacingFeed, FacingHub, MirrorEvent, MirroredEntity, Synced};
pub use session::{ObserverId, SessionConfig, SessionError, SyncSession};
pub use server::{GameServer, ServerConfig, GameServerError, SharedSession};
