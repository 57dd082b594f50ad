//! Hybrid compression strategies.
//!
//! - [`fraction`]: the `(0, 1]` newtype every fractional knob uses
//! - [`sub`]: [`sub::SubStrategy`], one variant per strategy tag
//! - [`chain`]: ordered fallback walk over the configured strategies

pub mod chain;
pub mod fraction;
pub mod sub;
