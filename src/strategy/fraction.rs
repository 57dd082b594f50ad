//! Fractions in the half-open interval `(0, 1]`.

use std::fmt;

use serde::{Serialize, Serializer};

/// A fraction of a sequence length, strictly positive and at most 1.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Fraction(f64);

impl Fraction {
    /// Human-readable constraint, used in error messages.
    pub const CONSTRAINT: &'static str = "must lie in (0, 1]";

    pub const ONE: Fraction = Fraction(1.0);

    /// Returns `None` for NaN, values ≤ 0 and values > 1.
    pub fn new(value: f64) -> Option<Self> {
        if value > 0.0 && value <= 1.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }

    /// Number of tokens this fraction of `len` covers, rounded down.
    pub fn of(self, len: usize) -> usize {
        (self.0 * len as f64).floor() as usize
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Fraction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert!(Fraction::new(1.0).is_some());
        assert!(Fraction::new(1e-9).is_some());
        assert!(Fraction::new(0.0).is_none());
        assert!(Fraction::new(-0.1).is_none());
        assert!(Fraction::new(1.5).is_none());
        assert!(Fraction::new(f64::NAN).is_none());
    }

    #[test]
    fn test_of_rounds_down() {
        let frac = Fraction::new(0.3).unwrap();
        assert_eq!(frac.of(100), 30);
        assert_eq!(frac.of(7), 2);
        assert_eq!(Fraction::ONE.of(4096), 4096);
    }
}
