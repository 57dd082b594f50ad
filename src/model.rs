//! Model shape presets.
//!
//! Only the dimensions a cache plan needs are kept: layer count, attention
//! and KV head counts, and the maximum context length.

use serde::Serialize;

use crate::error::{ConfigError, Result};

/// Shape of a transformer model, as far as the KV cache is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelPreset {
    pub name: String,
    pub n_layer: usize,
    pub n_head: usize,
    /// KV heads (grouped-query attention). Equal to `n_head` for MHA.
    pub n_local_heads: usize,
    /// Maximum sequence length the cache must cover.
    pub max_length: usize,
}

struct PresetRow {
    name: &'static str,
    n_layer: usize,
    n_head: usize,
    n_local_heads: Option<usize>,
    max_length: usize,
}

const DEFAULT_MAX_LENGTH: usize = 4096;

const fn row(
    name: &'static str,
    n_layer: usize,
    n_head: usize,
    n_local_heads: Option<usize>,
    max_length: usize,
) -> PresetRow {
    PresetRow {
        name,
        n_layer,
        n_head,
        n_local_heads,
        max_length,
    }
}

const PRESETS: &[PresetRow] = &[
    row("CodeLlama-7b-Python-hf", 32, 32, None, DEFAULT_MAX_LENGTH),
    row("LLaMA-2-7B-32K", 32, 32, None, DEFAULT_MAX_LENGTH),
    row("7B", 32, 32, None, DEFAULT_MAX_LENGTH),
    row("13B", 40, 40, None, DEFAULT_MAX_LENGTH),
    row("30B", 60, 52, None, DEFAULT_MAX_LENGTH),
    row("34B", 48, 64, Some(8), DEFAULT_MAX_LENGTH),
    row("70B", 80, 64, Some(8), DEFAULT_MAX_LENGTH),
    row("Mistral-7B", 32, 32, Some(8), DEFAULT_MAX_LENGTH),
    row("stories15M", 6, 6, None, DEFAULT_MAX_LENGTH),
    row("stories110M", 12, 12, None, DEFAULT_MAX_LENGTH),
    row("Meta-Llama-3-8B-Instruct", 32, 32, Some(8), 8192),
    row("Meta-Llama-3.1-8B-Instruct", 32, 32, Some(8), 131_072),
    row("Qwen2-0.5B-Instruct", 24, 14, Some(2), 32_768),
    row("Qwen2-1.5B-Instruct", 28, 12, Some(2), 32_768),
    row("Qwen2-7B-Instruct", 28, 28, Some(4), 32_768),
];

impl ModelPreset {
    /// Names of all built-in presets.
    pub fn names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|row| row.name)
    }

    /// Look up a preset by name.
    ///
    /// An exact match wins. Otherwise every preset whose name occurs in
    /// `name` (or in its upper-cased form) is a candidate and the longest one
    /// is chosen, so "Mistral-7B-Instruct" resolves to "Mistral-7B" rather
    /// than "7B".
    pub fn from_name(name: &str) -> Result<Self> {
        if let Some(row) = PRESETS.iter().find(|row| row.name == name) {
            return Ok(Self::from_row(row));
        }

        let upper = name.to_uppercase();
        let mut candidates: Vec<&PresetRow> = PRESETS
            .iter()
            .filter(|row| upper.contains(row.name) || name.contains(row.name))
            .collect();
        candidates.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

        match candidates.as_slice() {
            [] => Err(ConfigError::UnknownModel(name.to_string())),
            [best, second, ..] if best.name.len() == second.name.len() => {
                Err(ConfigError::AmbiguousModel {
                    name: name.to_string(),
                    candidates: candidates
                        .iter()
                        .take_while(|row| row.name.len() == best.name.len())
                        .map(|row| row.name.to_string())
                        .collect(),
                })
            }
            [best, ..] => Ok(Self::from_row(best)),
        }
    }

    /// Query heads sharing each KV head.
    pub fn group_size(&self) -> usize {
        self.n_head / self.n_local_heads.max(1)
    }

    fn from_row(row: &PresetRow) -> Self {
        Self {
            name: row.name.to_string(),
            n_layer: row.n_layer,
            n_head: row.n_head,
            n_local_heads: row.n_local_heads.unwrap_or(row.n_head),
            max_length: row.max_length,
        }
    }
}
