//! Direction Resolution
//!
//! Pure mapping from an [`ActionQueue`], a [`MovementMode`], the supporting
//! frame's rotation and an [`InputGate`] to a single [`Resolution`].
//!
//! Gating is checked before the queue is looked at. A blocked entity gets
//! [`Resolution::Blocked`] (or [`Resolution::GhostRequested`]), never a zero
//! move, so callers can tell "chose not to move" from "not allowed to move".

use serde::{Serialize, Deserialize};
use crate::core::grid::{GridVec, Rotation};
use crate::game::input::ActionQueue;
use crate::game::state::LifeState;

/// How simultaneously held directions combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementMode {
    /// Only the most recently pressed direction counts.
    #[default]
    AxisLocked,
    /// All held directions are summed and clamped per axis.
    Diagonal,
}

impl MovementMode {
    /// Mode from the wire's diagonal flag.
    #[inline]
    pub fn from_diagonal(diagonal: bool) -> Self {
        if diagonal {
            MovementMode::Diagonal
        } else {
            MovementMode::AxisLocked
        }
    }
}

/// Everything that can stop an entity from acting on its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputGate {
    /// Explicit per-entity input switch
    pub allow_input: bool,
    /// Buckled to something
    pub attached: bool,
    /// Cuffed
    pub restrained: bool,
    /// Currently towed by a puller
    pub being_pulled: bool,
    /// Consciousness
    pub life: LifeState,
}

impl InputGate {
    /// A gate that lets everything through.
    pub const OPEN: Self = Self {
        allow_input: true,
        attached: false,
        restrained: false,
        being_pulled: false,
        life: LifeState::Conscious,
    };

    /// Is queued input ignored entirely?
    #[inline]
    pub fn blocks_input(&self) -> bool {
        !self.allow_input || self.attached || (self.restrained && self.being_pulled)
    }
}

/// Outcome of one resolution pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// Displacement in the support's local frame, each axis in [-1, 1].
    /// May be zero when nothing is queued.
    Move(GridVec),
    /// Input is gated; the queue was not consulted.
    Blocked,
    /// Input is gated and the entity is incapacitated: hand control to a ghost.
    GhostRequested,
}

impl Resolution {
    /// Displacement if this is a move.
    #[inline]
    pub fn displacement(self) -> Option<GridVec> {
        match self {
            Resolution::Move(v) => Some(v),
            _ => None,
        }
    }

    /// True for `Blocked` and `GhostRequested`.
    #[inline]
    pub fn is_blocked(self) -> bool {
        !matches!(self, Resolution::Move(_))
    }
}

/// Combine queued actions into a world displacement (pre-rotation).
pub fn world_displacement(queue: &ActionQueue, mode: MovementMode) -> GridVec {
    match mode {
        MovementMode::Diagonal => queue
            .actions()
            .iter()
            .fold(GridVec::ZERO, |acc, action| acc + action.unit())
            .clamp_unit(),
        MovementMode::AxisLocked => queue
            .last()
            .map(|action| action.unit())
            .unwrap_or(GridVec::ZERO),
    }
}

/// Resolve one entity's input for this tick.
pub fn resolve(
    queue: &ActionQueue,
    mode: MovementMode,
    frame: Rotation,
    gate: &InputGate,
) -> Resolution {
    if gate.blocks_input() {
        return if gate.life.is_incapacitated() {
            Resolution::GhostRequested
        } else {
            Resolution::Blocked
        };
    }

    let world = world_displacement(queue, mode);
    Resolution::Move(frame.to_local(world).clamp_unit())
}

// =============================================================================
// TESTS
// =============================================================================
