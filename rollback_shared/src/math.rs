//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Only what the sample simulations need.

use serde::{Deserialize, Serialize};

/// 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }

    pub fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y
    }

    pub fn len_sq(self) -> f64 {
        self.dot(self)
    }

    /// Snaps each component to -1, 0 or 1.
    pub fn sign(self) -> Self {
        fn s(v: f64) -> f64 {
            if v < 0.0 {
                -1.0
            } else if v > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        Self::new(s(self.x), s(self.y))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_scale_add() {
        let a = Vec2::new(1.0, -2.0);
        let b = a.scale(2.0).add(Vec2::new(0.5, 0.5));
        assert_eq!(b, Vec2::new(2.5, -3.5));
    }

    #[test]
    fn vec2_sign_clamps_to_unit_steps() {
        assert_eq!(Vec2::new(-0.3, 7.0).sign(), Vec2::new(-1.0, 1.0));
        assert_eq!(Vec2::ZERO.sign(), Vec2::ZERO);
    }
}
