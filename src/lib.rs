//! # Holdfast Server
//!
//! Server-authoritative movement, buckling and restraint synchronization for
//! tile-based multiplayer games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HOLDFAST SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  ├── grid.rs      - Grid vectors, directions, rotations      │
//! │  ├── notify.rs    - Subscription channels                    │
//! │  └── hash.rs      - Snapshot hashing                         │
//! │                                                              │
//! │  game/            - Simulation (deterministic)               │
//! │  ├── input.rs     - Key sampling, action queue               │
//! │  ├── resolver.rs  - Direction resolution, gating             │
//! │  ├── state.rs     - Entity state and identities              │
//! │  ├── collab.rs    - Collaborator traits                      │
//! │  ├── world.rs     - In-memory collaborators                  │
//! │  ├── restraint.rs - Cuff / uncuff                            │
//! │  ├── attachment.rs- Buckle / unbuckle                        │
//! │  ├── swap.rs      - Swap eligibility                         │
//! │  ├── menu.rs      - Context menu entries                     │
//! │  └── tick.rs      - Authoritative simulation step            │
//! │                                                              │
//! │  network/         - Networking (non-deterministic)           │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── replication.rs - Field deltas, snapshots                │
//! │  ├── mirror.rs    - Client mirror and prediction             │
//! │  ├── session.rs   - Observers and routing                    │
//! │  └── server.rs    - WebSocket server                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Every replicated field is written by the server only. Clients predict
//! movement and swappability locally and reconcile whenever an
//! authoritative value arrives.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::grid::{Direction, GridVec, Rotation};
pub use game::state::{EntityId, NetId, SimState};
pub use game::world::SimWorld;
pub use network::session::SyncSession;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default simulation tick rate (Hz)
pub const TICK_RATE: u32 = 20;
