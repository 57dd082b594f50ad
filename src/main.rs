//! kv-cache-hybrid: validate and inspect hybrid KV-cache compression configs.

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use kv_cache_hybrid::config::{Advisory, Cli, Command, LoadArgs};
use kv_cache_hybrid::model::ModelPreset;
use kv_cache_hybrid::plan::CachePlan;
use kv_cache_hybrid::{HybridCacheConfig, LoadReport};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "kv_cache_hybrid=debug"
    } else {
        "kv_cache_hybrid=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Validate { load } => {
            let report = load_config(&load)?;
            write_advisories(&mut std::io::stdout().lock(), &report.advisories)?;
            if report.advisories.is_empty() {
                info!("Config is valid");
            } else {
                info!(
                    advisories = report.advisories.len(),
                    "Config is valid, with advisories"
                );
            }
        }
        Command::Normalize { load, output } => {
            let report = load_config(&load)?;
            match output {
                Some(path) => {
                    report.config.save(&path)?;
                    info!(path = %path.display(), "Normalized config written");
                }
                None => {
                    let yaml = report.config.to_yaml_string()?;
                    std::io::stdout().write_all(yaml.as_bytes())?;
                }
            }
        }
        Command::Plan {
            load,
            model,
            prompt_len,
        } => {
            let report = load_config(&load)?;
            let model = ModelPreset::from_name(&model)?;
            let plan = CachePlan::build(&report.config, &model)?;

            info!(
                model = %model.name,
                n_layer = model.n_layer,
                kv_heads = plan.kv_heads(),
                max_length = model.max_length,
                min_cache_length = plan.min_cache_length(),
                "Cache plan"
            );

            let overflow = prompt_len.map(|len| plan.prompt_cache_overflow(len));
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "layer\tcache_strategy\tprompt_compression\tmax_cache_tokens\toverflow")?;
            for layer in plan.layers() {
                let overflows = overflow
                    .as_ref()
                    .map(|o| o[layer.layer_idx].to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    stdout,
                    "{}\t{}\t{}\t{}\t{}",
                    layer.layer_idx,
                    layer.cache_strategy,
                    layer.prompt_compression_strategy,
                    layer.max_cache_tokens,
                    overflows
                )?;
            }

            if report.config.uses_hybrid() {
                let chain: Vec<String> = report
                    .config
                    .hybrid_strategies()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                writeln!(stdout, "hybrid chain: {}", chain.join(" --> "))?;
            }
        }
    }

    Ok(())
}

fn load_config(args: &LoadArgs) -> anyhow::Result<LoadReport> {
    let options = args.load_options()?;
    let report = HybridCacheConfig::load_with(&args.config, &options)
        .with_context(|| format!("invalid config {}", args.config.display()))?;

    info!(
        path = %args.config.display(),
        chain = report.config.hybrid_strategies().len(),
        global_tokens = report.config.global_tokens(),
        "Configuration loaded"
    );
    Ok(report)
}

/// One `advisory: ...` line per advisory, independent of the log filter.
fn write_advisories<W: Write>(out: &mut W, advisories: &[Advisory]) -> std::io::Result<()> {
    for advisory in advisories {
        writeln!(out, "advisory: {advisory}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prints_each_advisory() {
        let source = "cache_strategy: [hybrid]\n\
                      prompt_compression_strategy: [full]\n\
                      max_cache_length: [1.0]\n\
                      global_tokens: 4\n\
                      hybrid_strategies:\n  - strategy: special\n";
        let report = HybridCacheConfig::parse_with(source, &Default::default()).unwrap();
        assert_eq!(report.advisories.len(), 1);

        let mut out = Vec::new();
        write_advisories(&mut out, &report.advisories).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.lines().count(), 1);
        assert!(printed.starts_with("advisory: "));
        assert!(printed.contains("special"));
    }
}
