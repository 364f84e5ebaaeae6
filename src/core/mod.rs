//! Core deterministic primitives.
//!
//! Integer grid math, frame rotations, typed notification channels and
//! replicated-state hashing. Nothing in here knows about entities.

pub mod grid;
pub mod notify;
pub mod hash;

// Re-export core types
pub use grid::{GridVec, Direction, Rotation};
pub use notify::{Notifier, TopicNotifier, SubscriptionId};
pub use hash::{StateHash, StateHasher, compute_snapshot_hash};
