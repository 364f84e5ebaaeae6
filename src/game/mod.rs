//! Game Logic Module
//!
//! The authoritative simulation. Deterministic given the same inputs and
//! collaborator behaviour.
//!
//! ## Module Structure
//!
//! - `input`: Key sampling and the per-entity action queue
//! - `resolver`: Direction resolution and input gating
//! - `state`: Identifiers, entity state, `SimState`
//! - `collab`: Collaborator traits (movement, inventory, life, ...)
//! - `world`: In-memory collaborator implementation
//! - `restraint`: Cuff / uncuff state machine
//! - `attachment`: Buckle / unbuckle state machine
//! - `swap`: Swap eligibility
//! - `menu`: Context menu contributions
//! - `tick`: Authoritative simulation step
//! - `events`: Sync events consumed by the network layer

pub mod input;
pub mod resolver;
pub mod state;
pub mod collab;
pub mod world;
pub mod restraint;
pub mod attachment;
pub mod swap;
pub mod menu;
pub mod tick;
pub mod events;

// Re-export key types
pub use input::{ActionQueue, HeldKeys, InputSampler, MovementAction};
pub use resolver::{resolve, InputGate, MovementMode, Resolution};
pub use state::{EntityId, EntityState, Intent, LifeState, NetId, ReleaseCallback, SimState, Stance};
pub use collab::World;
pub use world::SimWorld;
pub use attachment::AttachError;
pub use tick::{EntityInput, SimConfig, TickResult};
pub use events::{SyncEvent, SyncEventData};
