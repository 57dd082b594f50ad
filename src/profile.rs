//! Per-head strategy profiling.
//!
//! Every KV head of every hybrid layer walks the chain on its own, so one
//! config yields a different strategy mix per layer. The profile records each
//! choice and summarises how many heads picked which strategy.

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;
use tracing::debug;

use crate::plan::CachePlan;
use crate::strategy::chain::RecoveryEstimator;
use crate::strategy::fraction::Fraction;
use crate::strategy::sub::SubStrategy;

/// Recovery fraction of `strategy` for one head of one layer.
pub trait HeadRecoveryEstimator {
    fn recovery(&self, layer: usize, head: usize, strategy: &SubStrategy) -> f64;
}

impl<F> HeadRecoveryEstimator for F
where
    F: Fn(usize, usize, &SubStrategy) -> f64,
{
    fn recovery(&self, layer: usize, head: usize, strategy: &SubStrategy) -> f64 {
        self(layer, head, strategy)
    }
}

/// Binds a head estimator to one (layer, head) so the chain can consult it.
struct HeadView<'e, E: ?Sized> {
    estimator: &'e E,
    layer: usize,
    head: usize,
}

impl<E: HeadRecoveryEstimator + ?Sized> RecoveryEstimator for HeadView<'_, E> {
    fn recovery(&self, strategy: &SubStrategy) -> f64 {
        self.estimator.recovery(self.layer, self.head, strategy)
    }
}

/// The strategy one head settled on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadChoice {
    pub layer: usize,
    pub head: usize,
    pub strategy: String,
    pub recovery: f64,
    pub met_threshold: bool,
}

/// Strategy choices for all heads of all hybrid layers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyProfile {
    choices: Vec<HeadChoice>,
}

impl StrategyProfile {
    /// Walk the chain for every KV head of every hybrid layer in `plan`.
    /// Layers with a non-hybrid cache strategy are skipped.
    pub fn profile<E>(plan: &CachePlan<'_>, threshold: Fraction, estimator: &E) -> Self
    where
        E: HeadRecoveryEstimator + ?Sized,
    {
        let heads = plan.kv_heads();
        let mut choices = Vec::new();

        for layer in plan.layers() {
            let Some(chain) = plan.chain_for(layer.layer_idx) else {
                continue;
            };
            for head in 0..heads {
                let view = HeadView {
                    estimator,
                    layer: layer.layer_idx,
                    head,
                };
                let selection = chain.select(threshold, &view);
                choices.push(HeadChoice {
                    layer: layer.layer_idx,
                    head,
                    strategy: selection.strategy.name().to_string(),
                    recovery: selection.recovery,
                    met_threshold: selection.met_threshold,
                });
            }
        }

        debug!(
            heads = choices.len(),
            threshold = threshold.get(),
            "Strategy profile complete"
        );
        Self { choices }
    }

    pub fn choices(&self) -> &[HeadChoice] {
        &self.choices
    }

    /// Layers that appear in the profile, ascending.
    pub fn layers(&self) -> Vec<usize> {
        let mut layers: Vec<usize> = self.choices.iter().map(|c| c.layer).collect();
        layers.dedup();
        layers
    }

    /// Number of heads in `layer` that chose each strategy.
    pub fn distribution(&self, layer: usize) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for choice in self.choices.iter().filter(|c| c.layer == layer) {
            *counts.entry(choice.strategy.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Heads that fell through to the last entry without meeting the threshold.
    pub fn unmet(&self) -> impl Iterator<Item = &HeadChoice> {
        self.choices.iter().filter(|c| !c.met_threshold)
    }

    /// CSV with a `layerID,headID,strategy,recovery` header.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "layerID,headID,strategy,recovery")?;
        for choice in &self.choices {
            writeln!(
                writer,
                "{},{},{},{}",
                choice.layer, choice.head, choice.strategy, choice.recovery
            )?;
        }
        writer.flush()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HybridCacheConfig;
    use crate::model::ModelPreset;

    fn frac(v: f64) -> Fraction {
        Fraction::new(v).unwrap()
    }

    fn config(cache_strategy: Vec<&str>) -> HybridCacheConfig {
        HybridCacheConfig::new(
            cache_strategy.into_iter().map(str::to_string).collect(),
            vec!["full".to_string()],
            vec![Fraction::ONE],
            4,
            Some(frac(0.9)),
            vec![
                SubStrategy::Special,
                SubStrategy::SpecialPunc,
                SubStrategy::Full,
            ],
        )
        .unwrap()
    }

    fn model(n_layer: usize) -> ModelPreset {
        ModelPreset {
            name: "test".to_string(),
            n_layer,
            n_head: 4,
            n_local_heads: 2,
            max_length: 1024,
        }
    }

    // Head 0 is satisfied by `special`, head 1 needs `special_punc`, except in
    // layer 1 where nothing short of `full` works.
    fn estimator(layer: usize, head: usize, strategy: &SubStrategy) -> f64 {
        match (layer, head, strategy.name()) {
            (_, _, "full") => 1.0,
            (1, _, _) => 0.5,
            (_, 0, _) => 0.95,
            (_, _, "special_punc") => 0.92,
            _ => 0.6,
        }
    }

    #[test]
    fn test_profile_and_distribution() {
        let cfg = config(vec!["hybrid"]);
        let plan = CachePlan::build(&cfg, &model(2)).unwrap();
        let profile = StrategyProfile::profile(&plan, cfg.recovery_threshold(), &estimator);

        assert_eq!(profile.choices().len(), 4);
        assert_eq!(profile.layers(), vec![0, 1]);

        let layer0 = profile.distribution(0);
        assert_eq!(layer0.get("special"), Some(&1));
        assert_eq!(layer0.get("special_punc"), Some(&1));

        let layer1 = profile.distribution(1);
        assert_eq!(layer1.get("full"), Some(&2));
        assert_eq!(profile.unmet().count(), 0);
    }

    #[test]
    fn test_non_hybrid_layers_skipped() {
        let cfg = config(vec!["full", "hybrid"]);
        let plan = CachePlan::build(&cfg, &model(2)).unwrap();
        let profile = StrategyProfile::profile(&plan, cfg.recovery_threshold(), &estimator);
        assert_eq!(profile.layers(), vec![1]);
    }

    #[test]
    fn test_csv_output() {
        let cfg = config(vec!["hybrid"]);
        let plan = CachePlan::build(&cfg, &model(1)).unwrap();
        let profile = StrategyProfile::profile(&plan, cfg.recovery_threshold(), &estimator);

        let mut out = Vec::new();
        profile.write_csv(&mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();
        assert_eq!(
            csv,
            "layerID,headID,strategy,recovery\n0,0,special,0.95\n0,1,special_punc,0.92\n"
        );
    }

    #[test]
    fn test_json_output() {
        let cfg = config(vec!["hybrid"]);
        let plan = CachePlan::build(&cfg, &model(1)).unwrap();
        let profile = StrategyProfile::profile(&plan, cfg.recovery_threshold(), &estimator);
        let json: serde_json::Value = serde_json::from_str(&profile.to_json().unwrap()).unwrap();
        assert_eq!(json["choices"][1]["strategy"], "special_punc");
    }
}
