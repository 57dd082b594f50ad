//! Ordered fallback over the configured hybrid strategies.
//!
//! The chain is walked front to back; the first strategy whose recovery
//! fraction reaches the threshold wins. Recovery numbers come from the
//! caller (typically measured on the prompt's attention), never from here.

use crate::strategy::fraction::Fraction;
use crate::strategy::sub::SubStrategy;

/// Supplies the fraction of full-attention output a strategy would recover.
pub trait RecoveryEstimator {
    fn recovery(&self, strategy: &SubStrategy) -> f64;
}

impl<F> RecoveryEstimator for F
where
    F: Fn(&SubStrategy) -> f64,
{
    fn recovery(&self, strategy: &SubStrategy) -> f64 {
        self(strategy)
    }
}

/// Result of walking the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    /// Position of the chosen strategy in the chain.
    pub index: usize,
    pub strategy: &'a SubStrategy,
    /// Recovery the estimator reported for the chosen strategy.
    pub recovery: f64,
    /// False when nothing reached the threshold and the last entry was taken.
    pub met_threshold: bool,
}

/// A non-empty, ordered view over hybrid strategies.
#[derive(Debug, Clone, Copy)]
pub struct HybridChain<'a> {
    strategies: &'a [SubStrategy],
}

impl<'a> HybridChain<'a> {
    /// Returns `None` for an empty slice.
    pub fn new(strategies: &'a [SubStrategy]) -> Option<Self> {
        if strategies.is_empty() {
            None
        } else {
            Some(Self { strategies })
        }
    }

    pub(crate) fn from_non_empty(strategies: &'a [SubStrategy]) -> Self {
        debug_assert!(!strategies.is_empty());
        Self { strategies }
    }

    pub fn strategies(&self) -> &'a [SubStrategy] {
        self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn last(&self) -> &'a SubStrategy {
        // Non-empty by construction.
        &self.strategies[self.strategies.len() - 1]
    }

    /// Whether the final entry keeps the whole cache.
    pub fn has_fallback(&self) -> bool {
        self.last().is_no_eviction()
    }

    /// Walk the chain and pick the first strategy recovering at least
    /// `threshold` of full attention.
    ///
    /// The estimator is consulted lazily, in chain order, and not at all for
    /// entries after the winner. NaN recoveries never meet the threshold.
    pub fn select<E>(&self, threshold: Fraction, estimator: &E) -> Selection<'a>
    where
        E: RecoveryEstimator + ?Sized,
    {
        let threshold = threshold.get();
        let mut last_recovery = f64::NAN;

        for (index, strategy) in self.strategies.iter().enumerate() {
            let recovery = estimator.recovery(strategy);
            if recovery >= threshold {
                return Selection {
                    index,
                    strategy,
                    recovery,
                    met_threshold: true,
                };
            }
            last_recovery = recovery;
        }

        Selection {
            index: self.strategies.len() - 1,
            strategy: self.last(),
            recovery: last_recovery,
            met_threshold: false,
        }
    }
}
