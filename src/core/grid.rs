//! Grid Vectors and Frame Rotation
//!
//! Integer tile-space primitives shared by input resolution and the
//! movement collaborator.
//!
//! ## Conventions
//!
//! - `+x` is right, `+y` is up (screen space, world grid units).
//! - Rotations are counter-clockwise quarter turns.
//! - A supporting frame rotated by `r` converts a world displacement into
//!   its local frame with `r.inverse().apply(v)`.

use std::fmt;
use std::ops::{Add, Neg, Sub};
use serde::{Serialize, Deserialize};

// =============================================================================
// GRID VECTOR
// =============================================================================

/// 2D integer vector in world grid units.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct GridVec {
    /// X component (right is positive)
    pub x: i32,
    /// Y component (up is positive)
    pub y: i32,
}

impl GridVec {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Unit vector pointing up (+Y)
    pub const UP: Self = Self { x: 0, y: 1 };

    /// Unit vector pointing down (-Y)
    pub const DOWN: Self = Self { x: 0, y: -1 };

    /// Unit vector pointing left (-X)
    pub const LEFT: Self = Self { x: -1, y: 0 };

    /// Unit vector pointing right (+X)
    pub const RIGHT: Self = Self { x: 1, y: 0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Clamp each axis independently to [-1, 1].
    #[inline]
    pub fn clamp_unit(self) -> Self {
        Self {
            x: self.x.clamp(-1, 1),
            y: self.y.clamp(-1, 1),
        }
    }

    /// Check for the zero vector.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }

    /// Chebyshev (king-move) distance to another tile.
    #[inline]
    pub fn chebyshev(self, other: Self) -> i32 {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        dx.max(dy)
    }
}

impl Add for GridVec {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x.wrapping_add(rhs.x), self.y.wrapping_add(rhs.y))
    }
}

impl Sub for GridVec {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x.wrapping_sub(rhs.x), self.y.wrapping_sub(rhs.y))
    }
}

impl Neg for GridVec {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(self.x.wrapping_neg(), self.y.wrapping_neg())
    }
}

impl fmt::Debug for GridVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grid({}, {})", self.x, self.y)
    }
}

impl fmt::Display for GridVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// =============================================================================
// DIRECTION (facing)
// =============================================================================

/// Cardinal facing direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Facing up (+Y)
    Up = 0,
    /// Facing left (-X)
    Left = 1,
    /// Facing down (-Y)
    Down = 2,
    /// Facing right (+X)
    Right = 3,
}

impl Direction {
    /// Unit vector for this direction.
    #[inline]
    pub fn to_vec(self) -> GridVec {
        match self {
            Direction::Up => GridVec::UP,
            Direction::Left => GridVec::LEFT,
            Direction::Down => GridVec::DOWN,
            Direction::Right => GridVec::RIGHT,
        }
    }

    /// Direction of a cardinal unit vector, `None` for anything else.
    pub fn from_vec(v: GridVec) -> Option<Self> {
        match (v.x, v.y) {
            (0, 1) => Some(Direction::Up),
            (-1, 0) => Some(Direction::Left),
            (0, -1) => Some(Direction::Down),
            (1, 0) => Some(Direction::Right),
            _ => None,
        }
    }
}

// =============================================================================
// ROTATION
// =============================================================================

/// Counter-clockwise rotation in whole quarter turns.
///
/// Rotating reference frames (shuttles, moving platforms) only ever settle on
/// quarter-turn orientations, so every rotated grid vector stays integral and
/// the nearest-grid rounding step is exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rotation(u8);

impl Rotation {
    /// No rotation
    pub const IDENTITY: Self = Self(0);

    /// 90 degrees counter-clockwise
    pub const CCW_90: Self = Self(1);

    /// 180 degrees
    pub const HALF: Self = Self(2);

    /// 90 degrees clockwise (270 counter-clockwise)
    pub const CW_90: Self = Self(3);

    /// Create from a (possibly negative) number of quarter turns.
    #[inline]
    pub const fn from_quarter_turns(turns: i32) -> Self {
        Self(turns.rem_euclid(4) as u8)
    }

    /// Angle in degrees, 0..360.
    #[inline]
    pub const fn degrees(self) -> i32 {
        self.0 as i32 * 90
    }

    /// Compose: apply `self`, then `next`.
    #[inline]
    pub const fn then(self, next: Self) -> Self {
        Self((self.0 + next.0) % 4)
    }

    /// Inverse rotation.
    #[inline]
    pub const fn inverse(self) -> Self {
        Self((4 - self.0) % 4)
    }

    /// Rotate a grid vector.
    #[inline]
    pub fn apply(self, v: GridVec) -> GridVec {
        match self.0 {
            0 => v,
            1 => GridVec::new(-v.y, v.x),
            2 => GridVec::new(-v.x, -v.y),
            _ => GridVec::new(v.y, -v.x),
        }
    }

    /// Convert a world displacement into the local frame of a support
    /// rotated by `self` relative to its initial orientation.
    #[inline]
    pub fn to_local(self, world: GridVec) -> GridVec {
        self.inverse().apply(world)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_grid_constants() {
        assert_eq!(GridVec::UP + GridVec::DOWN, GridVec::ZERO);
        assert_eq!(GridVec::LEFT + GridVec::RIGHT, GridVec::ZERO);
        assert_eq!(-GridVec::UP, GridVec::DOWN);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(GridVec::new(2, -3).clamp_unit(), GridVec::new(1, -1));
        assert_eq!(GridVec::new(0, 1).clamp_unit(), GridVec::new(0, 1));
    }

    #[test]
    fn test_rotation_ccw_convention() {
        // +x rotated a quarter turn counter-clockwise points up
        assert_eq!(Rotation::CCW_90.apply(GridVec::RIGHT), GridVec::UP);
        assert_eq!(Rotation::CW_90.apply(GridVec::RIGHT), GridVec::DOWN);
    }

    #[test]
    fn test_world_to_local() {
        // Platform turned a quarter counter-clockwise: pressing right on screen
        // is "down" in the platform's own frame.
        assert_eq!(Rotation::CCW_90.to_local(GridVec::RIGHT), GridVec::DOWN);
        assert_eq!(Rotation::CW_90.to_local(GridVec::RIGHT), GridVec::UP);
        assert_eq!(Rotation::IDENTITY.to_local(GridVec::new(1, 1)), GridVec::new(1, 1));
    }

    #[test]
    fn test_two_quarters_equal_half() {
        let twice = Rotation::CCW_90.then(Rotation::CCW_90);
        assert_eq!(twice, Rotation::HALF);
        assert_eq!(twice.apply(GridVec::RIGHT), GridVec::LEFT);
    }

    #[test]
    fn test_degrees() {
        assert_eq!(Rotation::from_quarter_turns(-1), Rotation::CW_90);
        assert_eq!(Rotation::from_quarter_turns(8), Rotation::IDENTITY);
        assert_eq!(Rotation::CW_90.degrees(), 270);
    }

    #[test]
    fn test_direction_rotation() {
        for dir in [Direction::Up, Direction::Left, Direction::Down, Direction::Right] {
            assert_eq!(Direction::from_vec(dir.to_vec()), Some(dir));
        }
        assert_eq!(
            Direction::from_vec(Rotation::CCW_90.apply(Direction::Right.to_vec())),
            Some(Direction::Up)
        );
        assert_eq!(Direction::from_vec(GridVec::new(1, 1)), None);
    }

    fn arb_rotation() -> impl Strategy<Value = Rotation> {
        (-8i32..8).prop_map(Rotation::from_quarter_turns)
    }

    fn arb_vec() -> impl Strategy<Value = GridVec> {
        (-50i32..50, -50i32..50).prop_map(|(x, y)| GridVec::new(x, y))
    }

    proptest! {
        #[test]
        fn rotation_composes(a in arb_rotation(), b in arb_rotation(), v in arb_vec()) {
            prop_assert_eq!(a.then(b).apply(v), b.apply(a.apply(v)));
        }

        #[test]
        fn rotation_is_associative(
            a in arb_rotation(),
            b in arb_rotation(),
            c in arb_rotation(),
        ) {
            prop_assert_eq!(a.then(b).then(c), a.then(b.then(c)));
        }

        #[test]
        fn rotation_is_invertible(r in arb_rotation(), v in arb_vec()) {
            prop_assert_eq!(r.inverse().apply(r.apply(v)), v);
            prop_assert_eq!(r.then(r.inverse()), Rotation::IDENTITY);
        }

        #[test]
        fn rotation_preserves_unit_range(r in arb_rotation(), x in -1i32..=1, y in -1i32..=1) {
            let v = r.apply(GridVec::new(x, y));
            prop_assert_eq!(v.clamp_unit(), v);
        }
    }
}
