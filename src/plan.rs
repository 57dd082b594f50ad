//! Per-layer cache plan.
//!
//! Layerwise config fields are either a single entry shared by all layers or
//! one entry per layer. The plan resolves them against a model's layer count
//! and turns the cache-length fractions into token budgets.

use serde::Serialize;

use crate::config::HybridCacheConfig;
use crate::error::{ConfigError, FieldPath, Result};
use crate::model::ModelPreset;
use crate::strategy::chain::HybridChain;
use crate::strategy::fraction::Fraction;

/// Cache settings for one transformer layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerCachePlan {
    pub layer_idx: usize,
    pub cache_strategy: String,
    pub prompt_compression_strategy: String,
    pub max_cache_frac: Fraction,
    /// `max_cache_frac` of the model's max length, at least one token.
    pub max_cache_tokens: usize,
}

impl LayerCachePlan {
    pub fn is_hybrid(&self) -> bool {
        self.cache_strategy == HybridCacheConfig::HYBRID
    }
}

/// A config resolved against a model.
#[derive(Debug, Clone)]
pub struct CachePlan<'a> {
    config: &'a HybridCacheConfig,
    model: ModelPreset,
    layers: Vec<LayerCachePlan>,
}

impl<'a> CachePlan<'a> {
    pub fn build(config: &'a HybridCacheConfig, model: &ModelPreset) -> Result<Self> {
        let n_layer = model.n_layer;
        let root = FieldPath::root();

        let cache_strategy = per_layer(&root.key("cache_strategy"), config.cache_strategy(), n_layer)?;
        let prompt_compression = per_layer(
            &root.key("prompt_compression_strategy"),
            config.prompt_compression_strategy(),
            n_layer,
        )?;
        let max_cache_length = per_layer(&root.key("max_cache_length"), config.max_cache_length(), n_layer)?;

        let layers = (0..n_layer)
            .map(|layer_idx| {
                let max_cache_frac = *max_cache_length[layer_idx];
                LayerCachePlan {
                    layer_idx,
                    cache_strategy: cache_strategy[layer_idx].clone(),
                    prompt_compression_strategy: prompt_compression[layer_idx].clone(),
                    max_cache_frac,
                    max_cache_tokens: max_cache_frac.of(model.max_length).max(1),
                }
            })
            .collect();

        Ok(Self {
            config,
            model: model.clone(),
            layers,
        })
    }

    pub fn model(&self) -> &ModelPreset {
        &self.model
    }

    pub fn layers(&self) -> &[LayerCachePlan] {
        &self.layers
    }

    /// The hybrid chain for `layer_idx`, if that layer uses it.
    pub fn chain_for(&self, layer_idx: usize) -> Option<HybridChain<'a>> {
        self.layers
            .get(layer_idx)
            .filter(|layer| layer.is_hybrid())
            .map(|_| self.config.chain())
    }

    /// For each layer, whether a prompt of `prompt_len` tokens exceeds its
    /// cache and therefore has to go through prompt compression.
    pub fn prompt_cache_overflow(&self, prompt_len: usize) -> Vec<bool> {
        self.layers
            .iter()
            .map(|layer| prompt_len > layer.max_cache_tokens)
            .collect()
    }

    /// Smallest per-layer cache budget, in tokens.
    pub fn min_cache_length(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.max_cache_tokens)
            .min()
            .unwrap_or(0)
    }

    /// KV heads per layer, i.e. how many independent strategy choices a
    /// hybrid layer makes.
    pub fn kv_heads(&self) -> usize {
        self.model.n_local_heads
    }
}

/// Broadcast a length-1 field, or accept exactly one entry per layer.
fn per_layer<'v, T>(path: &FieldPath, values: &'v [T], n_layer: usize) -> Result<Vec<&'v T>> {
    match values.len() {
        1 => Ok(vec![&values[0]; n_layer]),
        len if len == n_layer => Ok(values.iter().collect()),
        found => Err(ConfigError::LayerCountMismatch {
            path: path.clone(),
            expected: n_layer,
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(n_layer: usize, max_length: usize) -> ModelPreset {
        ModelPreset {
            name: "test".to_string(),
            n_layer,
            n_head: 8,
            n_local_heads: 2,
            max_length,
        }
    }

    fn config(cache_strategy: &[&str], max_cache_length: &[f64]) -> HybridCacheConfig {
        HybridCacheConfig::new(
            cache_strategy.iter().map(|s| s.to_string()).collect(),
            vec!["full".to_string()],
            max_cache_length
                .iter()
                .map(|f| Fraction::new(*f).unwrap())
                .collect(),
            4,
            None,
            vec![crate::strategy::sub::SubStrategy::Full],
        )
        .unwrap()
    }

    #[test]
    fn test_broadcast_single_entry() {
        let cfg = config(&["hybrid"], &[0.5]);
        let plan = CachePlan::build(&cfg, &model(3, 1000)).unwrap();
        assert_eq!(plan.layers().len(), 3);
        assert!(plan.layers().iter().all(|l| l.max_cache_tokens == 500));
        assert!(plan.layers().iter().all(LayerCachePlan::is_hybrid));
        assert!(plan.chain_for(2).is_some());
        assert!(plan.chain_for(3).is_none());
    }

    #[test]
    fn test_per_layer_entries() {
        let cfg = config(&["full", "hybrid"], &[1.0, 0.25]);
        let plan = CachePlan::build(&cfg, &model(2, 1000)).unwrap();
        assert_eq!(plan.layers()[0].max_cache_tokens, 1000);
        assert_eq!(plan.layers()[1].max_cache_tokens, 250);
        assert!(plan.chain_for(0).is_none());
        assert!(plan.chain_for(1).is_some());
        assert_eq!(plan.min_cache_length(), 250);
        assert_eq!(plan.prompt_cache_overflow(500), vec![false, true]);
    }

    #[test]
    fn test_layer_count_mismatch() {
        let cfg = config(&["hybrid"], &[1.0, 0.5]);
        let err = CachePlan::build(&cfg, &model(3, 1000)).unwrap_err();
        match err {
            ConfigError::LayerCountMismatch {
                path,
                expected,
                found,
            } => {
                assert_eq!(path.to_string(), "max_cache_length");
                assert_eq!(expected, 3);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_budget_at_least_one_token() {
        let cfg = config(&["hybrid"], &[0.001]);
        let plan = CachePlan::build(&cfg, &model(1, 100)).unwrap();
        assert_eq!(plan.min_cache_length(), 1);
        assert_eq!(plan.kv_heads(), 2);
    }
}
