//! Input Sampling and the Action Queue
//!
//! Raw key state is captured as a packed bit set ([`HeldKeys`]), cleaned by
//! the [`InputSampler`] and folded into a per-entity [`ActionQueue`].
//!
//! The queue is order-preserving: an action keeps its position for as long
//! as it stays held. Axis-locked resolution relies on this to pick the most
//! recently pressed direction.

use serde::{Serialize, Deserialize};
use crate::core::grid::{Direction, GridVec};

// =============================================================================
// MOVEMENT ACTIONS
// =============================================================================

/// Directional movement action. Closed vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MovementAction {
    /// Move up (+Y)
    Up = 0,
    /// Move down (-Y)
    Down = 1,
    /// Move left (-X)
    Left = 2,
    /// Move right (+X)
    Right = 3,
}

impl MovementAction {
    /// All actions, in the fixed order the queue scans them.
    pub const ALL: [MovementAction; 4] = [
        MovementAction::Up,
        MovementAction::Down,
        MovementAction::Left,
        MovementAction::Right,
    ];

    /// Unit displacement for this action (world grid units).
    #[inline]
    pub fn unit(self) -> GridVec {
        self.direction().to_vec()
    }

    /// Facing direction matching this action.
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            MovementAction::Up => Direction::Up,
            MovementAction::Down => Direction::Down,
            MovementAction::Left => Direction::Left,
            MovementAction::Right => Direction::Right,
        }
    }

    /// Opposing action on the same axis.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            MovementAction::Up => MovementAction::Down,
            MovementAction::Down => MovementAction::Up,
            MovementAction::Left => MovementAction::Right,
            MovementAction::Right => MovementAction::Left,
        }
    }

    #[inline]
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

// =============================================================================
// HELD KEYS
// =============================================================================

/// Raw held-key state for a single tick.
///
/// Packed bits, one per [`MovementAction`]:
/// - Bit 0: Up
/// - Bit 1: Down
/// - Bit 2: Left
/// - Bit 3: Right
/// - Bit 4-7: Reserved
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeldKeys {
    /// Packed key bits
    pub bits: u8,
}

impl HeldKeys {
    /// Nothing held
    pub const NONE: Self = Self { bits: 0 };

    /// Up bit
    pub const KEY_UP: u8 = 0x01;

    /// Down bit
    pub const KEY_DOWN: u8 = 0x02;

    /// Left bit
    pub const KEY_LEFT: u8 = 0x04;

    /// Right bit
    pub const KEY_RIGHT: u8 = 0x08;

    const MOVEMENT_MASK: u8 = 0x0F;

    /// Create from raw bits. Reserved bits are discarded.
    pub const fn from_bits(bits: u8) -> Self {
        Self { bits: bits & Self::MOVEMENT_MASK }
    }

    /// Create from a list of held actions.
    pub fn from_actions<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = MovementAction>,
    {
        let mut keys = Self::NONE;
        for action in actions {
            keys.set_held(action, true);
        }
        keys
    }

    /// Check if an action's key is held.
    #[inline]
    pub fn is_held(&self, action: MovementAction) -> bool {
        self.bits & action.bit() != 0
    }

    /// Set or clear an action's key.
    #[inline]
    pub fn set_held(&mut self, action: MovementAction, held: bool) {
        if held {
            self.bits |= action.bit();
        } else {
            self.bits &= !action.bit();
        }
    }

    /// Check if nothing is held.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.bits & Self::MOVEMENT_MASK == 0
    }

    /// Drop both keys of any axis whose opposing keys are held together.
    pub fn cancel_opposing(self) -> Self {
        let mut out = self;
        for (a, b) in [
            (MovementAction::Up, MovementAction::Down),
            (MovementAction::Left, MovementAction::Right),
        ] {
            if self.is_held(a) && self.is_held(b) {
                out.set_held(a, false);
                out.set_held(b, false);
            }
        }
        out
    }

    /// Iterate held actions in vocabulary order.
    pub fn actions(self) -> impl Iterator<Item = MovementAction> {
        MovementAction::ALL.into_iter().filter(move |a| self.is_held(*a))
    }
}

// =============================================================================
// SAMPLER
// =============================================================================

/// Anything that can report whether a movement key is currently down.
pub trait KeySource {
    /// Is the key bound to `action` held right now?
    fn is_down(&self, action: MovementAction) -> bool;
}

impl KeySource for HeldKeys {
    fn is_down(&self, action: MovementAction) -> bool {
        self.is_held(action)
    }
}

/// Reads held movement keys once per tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputSampler;

impl InputSampler {
    /// Sample the key source, cancelling same-axis opposites.
    pub fn sample<S: KeySource + ?Sized>(&self, source: &S) -> HeldKeys {
        let mut keys = HeldKeys::NONE;
        for action in MovementAction::ALL {
            keys.set_held(action, source.is_down(action));
        }
        keys.cancel_opposing()
    }
}

// =============================================================================
// ACTION QUEUE
// =============================================================================

/// Ordered set of currently active movement actions.
///
/// Never holds duplicates. Updated incrementally: newly held actions are
/// appended, released actions are removed, and everything else keeps its
/// position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionQueue {
    actions: Vec<MovementAction>,
}

impl ActionQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            actions: Vec::with_capacity(MovementAction::ALL.len()),
        }
    }

    /// Fold this tick's held keys into the queue.
    pub fn update(&mut self, held: HeldKeys) {
        for action in MovementAction::ALL {
            let queued = self.actions.contains(&action);
            if held.is_held(action) {
                if !queued {
                    self.actions.push(action);
                }
            } else if queued {
                self.actions.retain(|a| *a != action);
            }
        }
    }

    /// Most recently added action.
    #[inline]
    pub fn last(&self) -> Option<MovementAction> {
        self.actions.last().copied()
    }

    /// Queued actions in insertion order.
    #[inline]
    pub fn actions(&self) -> &[MovementAction] {
        &self.actions
    }

    /// Check membership.
    #[inline]
    pub fn contains(&self, action: MovementAction) -> bool {
        self.actions.contains(&action)
    }

    /// Number of queued actions.
    #[inline]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
