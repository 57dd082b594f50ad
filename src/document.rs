//! YAML document → [`HybridCacheConfig`].
//!
//! The document is parsed into a `serde_yaml::Value` tree and walked by hand
//! so every problem maps to a specific [`ConfigError`] variant with the path
//! of the offending value, instead of a generic deserializer message.

use serde_yaml::{Mapping, Value};

use crate::config::{Advisory, HybridCacheConfig, LoadOptions, LoadReport, UnknownStrategyPolicy};
use crate::error::{ConfigError, FieldPath, Result};
use crate::strategy::fraction::Fraction;
use crate::strategy::sub::{CustomStrategy, StrategyTag, SubStrategy};

const CACHE_STRATEGY: &str = "cache_strategy";
const PROMPT_COMPRESSION_STRATEGY: &str = "prompt_compression_strategy";
const MAX_CACHE_LENGTH: &str = "max_cache_length";
const GLOBAL_TOKENS: &str = "global_tokens";
const MIN_RECOVERY_FRAC: &str = "min_recovery_frac";
const HYBRID_STRATEGIES: &str = "hybrid_strategies";

const TOP_LEVEL_FIELDS: [&str; 6] = [
    CACHE_STRATEGY,
    PROMPT_COMPRESSION_STRATEGY,
    MAX_CACHE_LENGTH,
    GLOBAL_TOKENS,
    MIN_RECOVERY_FRAC,
    HYBRID_STRATEGIES,
];

const STRATEGY: &str = "strategy";
const HEAVY_HITTER_FRAC: &str = "heavy_hitter_frac";
const RECENT_WINDOW: &str = "recent_window";

const STRATEGY_FIELDS: [&str; 3] = [STRATEGY, HEAVY_HITTER_FRAC, RECENT_WINDOW];

/// Parse and validate a config document.
pub(crate) fn parse(source: &str, options: &LoadOptions) -> Result<LoadReport> {
    let doc: Value = serde_yaml::from_str(source).map_err(|err| ConfigError::MalformedDocument {
        message: err.to_string(),
        location: err.location().map(|loc| (loc.line(), loc.column())),
    })?;

    let map = match &doc {
        Value::Mapping(map) => map,
        other => {
            return Err(ConfigError::MalformedDocument {
                message: format!("top level must be a mapping, found {}", describe(other)),
                location: None,
            })
        }
    };

    let root = FieldPath::root();
    check_keys(&root, map, &TOP_LEVEL_FIELDS)?;

    let cache_strategy = names(&root.key(CACHE_STRATEGY), required(&root, map, CACHE_STRATEGY)?)?;
    let prompt_compression_strategy = names(
        &root.key(PROMPT_COMPRESSION_STRATEGY),
        required(&root, map, PROMPT_COMPRESSION_STRATEGY)?,
    )?;
    let max_cache_length = fractions(
        &root.key(MAX_CACHE_LENGTH),
        required(&root, map, MAX_CACHE_LENGTH)?,
    )?;
    let global_tokens = token_count(&root.key(GLOBAL_TOKENS), required(&root, map, GLOBAL_TOKENS)?)?;
    let min_recovery_frac = match present(map, MIN_RECOVERY_FRAC) {
        Some(value) => Some(fraction(&root.key(MIN_RECOVERY_FRAC), value)?),
        None => None,
    };

    let mut advisories = Vec::new();
    let hybrid_strategies = chain(
        &root.key(HYBRID_STRATEGIES),
        required(&root, map, HYBRID_STRATEGIES)?,
        options,
        &mut advisories,
    )?;

    let config = HybridCacheConfig::new(
        cache_strategy,
        prompt_compression_strategy,
        max_cache_length,
        global_tokens,
        min_recovery_frac,
        hybrid_strategies,
    )?;
    advisories.extend(config.advisories());

    Ok(LoadReport { config, advisories })
}

/// Strategy names must be non-empty identifiers (`[A-Za-z0-9_-]+`).
pub(crate) fn check_names(path: &FieldPath, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(ConfigError::InvalidValue {
            path: path.clone(),
            value: "[]".to_string(),
            reason: "needs at least one entry",
        });
    }
    for (idx, name) in names.iter().enumerate() {
        check_name(&path.index(idx), name)?;
    }
    Ok(())
}

fn check_name(path: &FieldPath, name: &str) -> Result<()> {
    let well_formed = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            path: path.clone(),
            value: format!("{name:?}"),
            reason: "strategy names are non-empty identifiers",
        })
    }
}

fn check_keys(path: &FieldPath, map: &Mapping, allowed: &[&str]) -> Result<()> {
    for key in map.keys() {
        match key.as_str() {
            Some(name) if allowed.contains(&name) => {}
            Some(name) => {
                return Err(ConfigError::UnknownField {
                    path: path.key(name),
                })
            }
            None => {
                return Err(ConfigError::InvalidType {
                    path: path.clone(),
                    expected: "a mapping with string keys",
                    found: describe(key),
                })
            }
        }
    }
    Ok(())
}

/// Value of `key`, treating an explicit `null` as absent.
fn present<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|value| !value.is_null())
}

fn required<'a>(path: &FieldPath, map: &'a Mapping, key: &str) -> Result<&'a Value> {
    map.get(key).ok_or_else(|| ConfigError::MissingRequiredField {
        path: path.key(key),
    })
}

/// Layerwise fields accept a bare scalar as a one-element sequence.
fn layerwise<'a>(path: &FieldPath, value: &'a Value) -> Result<Vec<(FieldPath, &'a Value)>> {
    match value {
        Value::Sequence(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(idx, item)| (path.index(idx), item))
            .collect()),
        Value::Mapping(_) | Value::Null | Value::Tagged(_) => Err(ConfigError::InvalidType {
            path: path.clone(),
            expected: "a sequence (one entry, or one per layer)",
            found: describe(value),
        }),
        scalar => Ok(vec![(path.clone(), scalar)]),
    }
}

fn names(path: &FieldPath, value: &Value) -> Result<Vec<String>> {
    let names = layerwise(path, value)?
        .into_iter()
        .map(|(item_path, item)| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::InvalidType {
                    path: item_path,
                    expected: "a strategy name",
                    found: describe(item),
                })
        })
        .collect::<Result<Vec<_>>>()?;
    check_names(path, &names)?;
    Ok(names)
}

fn fractions(path: &FieldPath, value: &Value) -> Result<Vec<Fraction>> {
    let fractions = layerwise(path, value)?
        .into_iter()
        .map(|(item_path, item)| fraction(&item_path, item))
        .collect::<Result<Vec<_>>>()?;
    if fractions.is_empty() {
        return Err(ConfigError::InvalidValue {
            path: path.clone(),
            value: "[]".to_string(),
            reason: "needs at least one entry",
        });
    }
    Ok(fractions)
}

fn fraction(path: &FieldPath, value: &Value) -> Result<Fraction> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
    .ok_or_else(|| ConfigError::InvalidType {
        path: path.clone(),
        expected: "a number",
        found: describe(value),
    })?;

    Fraction::new(raw).ok_or_else(|| ConfigError::OutOfRangeValue {
        path: path.clone(),
        value: describe(value),
        constraint: Fraction::CONSTRAINT,
    })
}

/// Non-negative integer. Integral floats such as `4.0` are accepted.
fn token_count(path: &FieldPath, value: &Value) -> Result<usize> {
    let invalid = || ConfigError::InvalidType {
        path: path.clone(),
        expected: "a non-negative integer",
        found: describe(value),
    };
    let negative = || ConfigError::OutOfRangeValue {
        path: path.clone(),
        value: describe(value),
        constraint: "must be >= 0",
    };

    let Value::Number(n) = value else {
        return Err(invalid());
    };
    if let Some(count) = n.as_u64() {
        return usize::try_from(count).map_err(|_| invalid());
    }
    if n.as_i64().is_some() {
        return Err(negative());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => {
            if f < 0.0 {
                Err(negative())
            } else if f < usize::MAX as f64 {
                Ok(f as usize)
            } else {
                Err(invalid())
            }
        }
        _ => Err(invalid()),
    }
}

fn chain(
    path: &FieldPath,
    value: &Value,
    options: &LoadOptions,
    advisories: &mut Vec<Advisory>,
) -> Result<Vec<SubStrategy>> {
    let entries: &[Value] = match value {
        Value::Sequence(entries) => entries.as_slice(),
        Value::Null => &[],
        other => {
            return Err(ConfigError::InvalidType {
                path: path.clone(),
                expected: "a sequence of strategy mappings",
                found: describe(other),
            })
        }
    };
    if entries.is_empty() {
        return Err(ConfigError::EmptyStrategyChain { path: path.clone() });
    }

    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| sub_strategy(&path.index(idx), entry, options, advisories))
        .collect()
}

fn sub_strategy(
    path: &FieldPath,
    value: &Value,
    options: &LoadOptions,
    advisories: &mut Vec<Advisory>,
) -> Result<SubStrategy> {
    let Value::Mapping(map) = value else {
        return Err(ConfigError::InvalidType {
            path: path.clone(),
            expected: "a mapping with a `strategy` key",
            found: describe(value),
        });
    };
    check_keys(path, map, &STRATEGY_FIELDS)?;

    let tag_value = required(path, map, STRATEGY)?;
    let name = tag_value.as_str().ok_or_else(|| ConfigError::InvalidType {
        path: path.key(STRATEGY),
        expected: "a strategy name",
        found: describe(tag_value),
    })?;
    check_name(&path.key(STRATEGY), name)?;

    let heavy_hitter_frac = match present(map, HEAVY_HITTER_FRAC) {
        Some(v) => Some(fraction(&path.key(HEAVY_HITTER_FRAC), v)?),
        None => None,
    };
    let recent_window = match present(map, RECENT_WINDOW) {
        Some(v) => Some(fraction(&path.key(RECENT_WINDOW), v)?),
        None => None,
    };

    let Some(tag) = StrategyTag::from_name(name) else {
        return match options.unknown_strategies {
            UnknownStrategyPolicy::Reject => Err(ConfigError::UnknownStrategy {
                path: path.key(STRATEGY),
                name: name.to_string(),
            }),
            UnknownStrategyPolicy::Flag => Ok(SubStrategy::Custom(CustomStrategy {
                name: name.to_string(),
                heavy_hitter_frac,
                recent_window,
            })),
        };
    };

    if !tag.uses_heavy_hitter_frac() && map.contains_key(HEAVY_HITTER_FRAC) {
        return Err(ConfigError::UnknownField {
            path: path.key(HEAVY_HITTER_FRAC),
        });
    }
    if !tag.uses_recent_window() && map.contains_key(RECENT_WINDOW) {
        return Err(ConfigError::UnknownField {
            path: path.key(RECENT_WINDOW),
        });
    }

    let heavy_hitter_frac = if tag.uses_heavy_hitter_frac() {
        Some(param_or_placeholder(
            path.key(HEAVY_HITTER_FRAC),
            heavy_hitter_frac,
            options.fill_placeholders.map(|p| p.heavy_hitter_frac),
            advisories,
        )?)
    } else {
        None
    };
    let recent_window = if tag.uses_recent_window() {
        Some(param_or_placeholder(
            path.key(RECENT_WINDOW),
            recent_window,
            options.fill_placeholders.map(|p| p.recent_window),
            advisories,
        )?)
    } else {
        None
    };

    SubStrategy::from_tag(tag, heavy_hitter_frac, recent_window).ok_or_else(|| {
        ConfigError::MissingRequiredField {
            path: path.clone(),
        }
    })
}

fn param_or_placeholder(
    path: FieldPath,
    value: Option<Fraction>,
    placeholder: Option<Fraction>,
    advisories: &mut Vec<Advisory>,
) -> Result<Fraction> {
    match (value, placeholder) {
        (Some(value), _) => Ok(value),
        (None, Some(placeholder)) => {
            advisories.push(Advisory::PlaceholderApplied {
                path,
                value: placeholder,
            });
            Ok(placeholder)
        }
        (None, None) => Err(ConfigError::MissingRequiredField { path }),
    }
}

/// Short rendering of a YAML value for error messages.
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Sequence(items) => format!("a sequence of {} entries", items.len()),
        Value::Mapping(map) => format!("a mapping of {} keys", map.len()),
        Value::Tagged(tagged) => format!("a value tagged {}", tagged.tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaceholderParams;

    fn strict(source: &str) -> Result<LoadReport> {
        parse(source, &LoadOptions::default())
    }

    const BASE: &str = "cache_strategy: [hybrid]\n\
                        prompt_compression_strategy: [full]\n\
                        max_cache_length: [1.0]\n\
                        global_tokens: 4\n";

    fn with_chain(chain: &str) -> String {
        format!("{BASE}hybrid_strategies:\n{chain}")
    }

    #[test]
    fn test_scalar_coerced_to_sequence() {
        let src = "cache_strategy: hybrid\n\
                   prompt_compression_strategy: full\n\
                   max_cache_length: 0.5\n\
                   global_tokens: 4\n\
                   hybrid_strategies:\n  - strategy: full\n";
        let report = strict(src).unwrap();
        assert_eq!(report.config.cache_strategy(), ["hybrid".to_string()]);
        assert_eq!(report.config.max_cache_length()[0].get(), 0.5);
    }

    #[test]
    fn test_integral_float_global_tokens() {
        let src = BASE.replace("global_tokens: 4", "global_tokens: 4.0")
            + "hybrid_strategies:\n  - strategy: full\n";
        assert_eq!(strict(&src).unwrap().config.global_tokens(), 4);

        let src = BASE.replace("global_tokens: 4", "global_tokens: 4.5")
            + "hybrid_strategies:\n  - strategy: full\n";
        assert!(matches!(
            strict(&src).unwrap_err(),
            ConfigError::InvalidType { .. }
        ));
    }

    #[test]
    fn test_negative_global_tokens() {
        let src = BASE.replace("global_tokens: 4", "global_tokens: -1")
            + "hybrid_strategies:\n  - strategy: full\n";
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRangeValue { .. }));
        assert_eq!(err.path().unwrap().to_string(), "global_tokens");
    }

    #[test]
    fn test_parameter_not_used_by_strategy() {
        let src = with_chain("  - strategy: full\n    recent_window: 0.3\n");
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));
        assert_eq!(
            err.path().unwrap().to_string(),
            "hybrid_strategies[0].recent_window"
        );
    }

    #[test]
    fn test_missing_parameter_is_error_when_strict() {
        let src = with_chain("  - strategy: window\n  - strategy: full\n");
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredField { .. }));
        assert_eq!(
            err.path().unwrap().to_string(),
            "hybrid_strategies[0].recent_window"
        );
    }

    #[test]
    fn test_missing_parameter_filled_from_placeholder() {
        let src = with_chain("  - strategy: window_heavy_hitter\n    recent_window: 0.1\n  - strategy: full\n");
        let options = LoadOptions {
            fill_placeholders: Some(PlaceholderParams::new(0.25, 0.5).unwrap()),
            ..Default::default()
        };
        let report = parse(&src, &options).unwrap();
        let first = &report.config.hybrid_strategies()[0];
        assert_eq!(first.heavy_hitter_frac().unwrap().get(), 0.25);
        assert_eq!(first.recent_window().unwrap().get(), 0.1);
        assert_eq!(report.advisories.len(), 1);
        assert!(matches!(
            &report.advisories[0],
            Advisory::PlaceholderApplied { path, .. }
                if path.to_string() == "hybrid_strategies[0].heavy_hitter_frac"
        ));
    }

    #[test]
    fn test_unknown_strategy_policy() {
        let src = with_chain("  - strategy: l2_norm\n    heavy_hitter_frac: 0.2\n  - strategy: full\n");

        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStrategy { ref name, .. } if name == "l2_norm"));

        let options = LoadOptions {
            unknown_strategies: UnknownStrategyPolicy::Flag,
            ..Default::default()
        };
        let report = parse(&src, &options).unwrap();
        assert_eq!(report.config.hybrid_strategies()[0].name(), "l2_norm");
        assert!(matches!(
            &report.advisories[..],
            [Advisory::UnknownStrategyKept { name, .. }] if name == "l2_norm"
        ));
    }

    #[test]
    fn test_null_min_recovery_frac_is_unset() {
        let src = BASE.to_string() + "min_recovery_frac: ~\nhybrid_strategies:\n  - strategy: full\n";
        assert_eq!(strict(&src).unwrap().config.min_recovery_frac(), None);
    }

    #[test]
    fn test_string_where_number_expected() {
        let src = BASE.replace("[1.0]", "[\"1.0\"]") + "hybrid_strategies:\n  - strategy: full\n";
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
        assert_eq!(err.path().unwrap().to_string(), "max_cache_length[0]");
    }

    #[test]
    fn test_non_mapping_top_level() {
        let err = strict("- hybrid\n- full\n").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedDocument { .. }));
    }

    #[test]
    fn test_null_chain_is_empty() {
        let err = strict(&with_chain("")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyStrategyChain { .. }));
        assert_eq!(err.path().unwrap().to_string(), "hybrid_strategies");
    }

    #[test]
    fn test_chain_entry_must_be_mapping() {
        let err = strict(&with_chain("  - full\n")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
        assert_eq!(err.path().unwrap().to_string(), "hybrid_strategies[0]");
    }

    #[test]
    fn test_chain_entry_without_strategy_key() {
        let src = with_chain("  - strategy: full\n  - heavy_hitter_frac: 0.3\n");
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredField { .. }));
        assert_eq!(
            err.path().unwrap().to_string(),
            "hybrid_strategies[1].strategy"
        );
    }

    #[test]
    fn test_non_string_key_in_chain_entry() {
        let src = with_chain("  - strategy: full\n    1: 0.3\n");
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
        assert_eq!(err.path().unwrap().to_string(), "hybrid_strategies[0]");
    }

    #[test]
    fn test_unknown_key_in_chain_entry() {
        let src = with_chain("  - strategy: special\n    foo: 1\n  - strategy: full\n");
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { .. }));
        assert_eq!(err.path().unwrap().to_string(), "hybrid_strategies[0].foo");
    }

    #[test]
    fn test_ill_formed_chain_tag_rejected_when_flagging() {
        let options = LoadOptions {
            unknown_strategies: UnknownStrategyPolicy::Flag,
            ..Default::default()
        };
        for tag in [r#""""#, r#""a,b""#, r#""x\ny""#] {
            let src = with_chain(&format!("  - strategy: {tag}\n  - strategy: full\n"));
            let err = parse(&src, &options).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { .. }),
                "{tag}: expected InvalidValue, got {err}"
            );
            assert_eq!(
                err.path().unwrap().to_string(),
                "hybrid_strategies[0].strategy"
            );
        }
    }

    #[test]
    fn test_global_tokens_beyond_usize_range() {
        let src = BASE.replace("global_tokens: 4", "global_tokens: 18446744073709551616.0")
            + "hybrid_strategies:\n  - strategy: full\n";
        let err = strict(&src).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
        assert_eq!(err.path().unwrap().to_string(), "global_tokens");
    }

    #[test]
    fn test_ill_formed_strategy_name() {
        let src = BASE.replace("[hybrid]", "[\"\"]") + "hybrid_strategies:\n  - strategy: full\n";
        let err = strict(&src).unwrap_err();
        assert_eq!(err.path().unwrap().to_string(), "cache_strategy[0]");
    }
}
