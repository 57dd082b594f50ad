//! Sub-strategies of the hybrid chain.
//!
//! Each variant carries exactly the parameters its tag uses, so a `full`
//! strategy with a `recent_window`, or a `window` strategy without one, cannot
//! be constructed.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::strategy::fraction::Fraction;

/// Known strategy identifiers, as spelled in config documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyTag {
    Special,
    Punc,
    SpecialPunc,
    HeavyHitter,
    SpecialPuncHeavyHitter,
    Window,
    WindowHeavyHitter,
    SpecialPunchWindowHeavyHitter,
    Full,
}

impl StrategyTag {
    pub const ALL: [StrategyTag; 9] = [
        StrategyTag::Special,
        StrategyTag::Punc,
        StrategyTag::SpecialPunc,
        StrategyTag::HeavyHitter,
        StrategyTag::SpecialPuncHeavyHitter,
        StrategyTag::Window,
        StrategyTag::WindowHeavyHitter,
        StrategyTag::SpecialPunchWindowHeavyHitter,
        StrategyTag::Full,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyTag::Special => "special",
            StrategyTag::Punc => "punc",
            StrategyTag::SpecialPunc => "special_punc",
            StrategyTag::HeavyHitter => "heavy_hitter",
            StrategyTag::SpecialPuncHeavyHitter => "special_punc_heavy_hitter",
            StrategyTag::Window => "window",
            StrategyTag::WindowHeavyHitter => "window_heavy_hitter",
            // The consuming engine matches on this exact spelling.
            StrategyTag::SpecialPunchWindowHeavyHitter => "special_punch_window_heavy_hitter",
            StrategyTag::Full => "full",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    /// Whether strategies with this tag take a `heavy_hitter_frac`.
    pub fn uses_heavy_hitter_frac(self) -> bool {
        matches!(
            self,
            StrategyTag::HeavyHitter
                | StrategyTag::SpecialPuncHeavyHitter
                | StrategyTag::WindowHeavyHitter
                | StrategyTag::SpecialPunchWindowHeavyHitter
        )
    }

    /// Whether strategies with this tag take a `recent_window`.
    pub fn uses_recent_window(self) -> bool {
        matches!(
            self,
            StrategyTag::Window
                | StrategyTag::WindowHeavyHitter
                | StrategyTag::SpecialPunchWindowHeavyHitter
        )
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy whose tag the loader did not recognise, kept verbatim when the
/// caller asked for unknown tags to be flagged instead of rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomStrategy {
    pub name: String,
    pub heavy_hitter_frac: Option<Fraction>,
    pub recent_window: Option<Fraction>,
}

/// One entry of the hybrid fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub enum SubStrategy {
    Special,
    Punc,
    SpecialPunc,
    HeavyHitter {
        heavy_hitter_frac: Fraction,
    },
    SpecialPuncHeavyHitter {
        heavy_hitter_frac: Fraction,
    },
    Window {
        recent_window: Fraction,
    },
    WindowHeavyHitter {
        heavy_hitter_frac: Fraction,
        recent_window: Fraction,
    },
    SpecialPunchWindowHeavyHitter {
        heavy_hitter_frac: Fraction,
        recent_window: Fraction,
    },
    Full,
    Custom(CustomStrategy),
}

impl SubStrategy {
    /// Build a known strategy from its tag and parameters.
    ///
    /// Returns `None` when a parameter the tag needs is missing. Parameters
    /// the tag does not use are ignored; the loader rejects them earlier.
    pub fn from_tag(
        tag: StrategyTag,
        heavy_hitter_frac: Option<Fraction>,
        recent_window: Option<Fraction>,
    ) -> Option<Self> {
        let strategy = match tag {
            StrategyTag::Special => SubStrategy::Special,
            StrategyTag::Punc => SubStrategy::Punc,
            StrategyTag::SpecialPunc => SubStrategy::SpecialPunc,
            StrategyTag::HeavyHitter => SubStrategy::HeavyHitter {
                heavy_hitter_frac: heavy_hitter_frac?,
            },
            StrategyTag::SpecialPuncHeavyHitter => SubStrategy::SpecialPuncHeavyHitter {
                heavy_hitter_frac: heavy_hitter_frac?,
            },
            StrategyTag::Window => SubStrategy::Window {
                recent_window: recent_window?,
            },
            StrategyTag::WindowHeavyHitter => SubStrategy::WindowHeavyHitter {
                heavy_hitter_frac: heavy_hitter_frac?,
                recent_window: recent_window?,
            },
            StrategyTag::SpecialPunchWindowHeavyHitter => {
                SubStrategy::SpecialPunchWindowHeavyHitter {
                    heavy_hitter_frac: heavy_hitter_frac?,
                    recent_window: recent_window?,
                }
            }
            StrategyTag::Full => SubStrategy::Full,
        };
        Some(strategy)
    }

    /// The known tag, or `None` for custom strategies.
    pub fn tag(&self) -> Option<StrategyTag> {
        let tag = match self {
            SubStrategy::Special => StrategyTag::Special,
            SubStrategy::Punc => StrategyTag::Punc,
            SubStrategy::SpecialPunc => StrategyTag::SpecialPunc,
            SubStrategy::HeavyHitter { .. } => StrategyTag::HeavyHitter,
            SubStrategy::SpecialPuncHeavyHitter { .. } => StrategyTag::SpecialPuncHeavyHitter,
            SubStrategy::Window { .. } => StrategyTag::Window,
            SubStrategy::WindowHeavyHitter { .. } => StrategyTag::WindowHeavyHitter,
            SubStrategy::SpecialPunchWindowHeavyHitter { .. } => {
                StrategyTag::SpecialPunchWindowHeavyHitter
            }
            SubStrategy::Full => StrategyTag::Full,
            SubStrategy::Custom(_) => return None,
        };
        Some(tag)
    }

    /// Identifier as written in the document.
    pub fn name(&self) -> &str {
        match self {
            SubStrategy::Custom(custom) => &custom.name,
            known => known.tag().map(StrategyTag::as_str).unwrap_or_default(),
        }
    }

    pub fn heavy_hitter_frac(&self) -> Option<Fraction> {
        match self {
            SubStrategy::HeavyHitter { heavy_hitter_frac }
            | SubStrategy::SpecialPuncHeavyHitter { heavy_hitter_frac }
            | SubStrategy::WindowHeavyHitter {
                heavy_hitter_frac, ..
            }
            | SubStrategy::SpecialPunchWindowHeavyHitter {
                heavy_hitter_frac, ..
            } => Some(*heavy_hitter_frac),
            SubStrategy::Custom(custom) => custom.heavy_hitter_frac,
            _ => None,
        }
    }

    pub fn recent_window(&self) -> Option<Fraction> {
        match self {
            SubStrategy::Window { recent_window }
            | SubStrategy::WindowHeavyHitter { recent_window, .. }
            | SubStrategy::SpecialPunchWindowHeavyHitter { recent_window, .. } => {
                Some(*recent_window)
            }
            SubStrategy::Custom(custom) => custom.recent_window,
            _ => None,
        }
    }

    /// Whether special tokens (BOS, EOS, separators) survive this strategy.
    pub fn keeps_special_tokens(&self) -> bool {
        matches!(
            self,
            SubStrategy::Special
                | SubStrategy::SpecialPunc
                | SubStrategy::SpecialPuncHeavyHitter { .. }
                | SubStrategy::SpecialPunchWindowHeavyHitter { .. }
                | SubStrategy::Full
        )
    }

    /// Whether punctuation tokens survive this strategy.
    pub fn keeps_punctuation(&self) -> bool {
        matches!(
            self,
            SubStrategy::Punc
                | SubStrategy::SpecialPunc
                | SubStrategy::SpecialPuncHeavyHitter { .. }
                | SubStrategy::SpecialPunchWindowHeavyHitter { .. }
                | SubStrategy::Full
        )
    }

    /// `full` keeps every entry; a chain ending here always has a fallback.
    pub fn is_no_eviction(&self) -> bool {
        matches!(self, SubStrategy::Full)
    }
}

impl fmt::Display for SubStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let Some(frac) = self.heavy_hitter_frac() {
            write!(f, " heavy_hitter_frac={frac}")?;
        }
        if let Some(frac) = self.recent_window() {
            write!(f, " recent_window={frac}")?;
        }
        Ok(())
    }
}

impl Serialize for SubStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let heavy_hitter_frac = self.heavy_hitter_frac();
        let recent_window = self.recent_window();
        let len = 1 + heavy_hitter_frac.is_some() as usize + recent_window.is_some() as usize;

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("strategy", self.name())?;
        if let Some(frac) = heavy_hitter_frac {
            map.serialize_entry("heavy_hitter_frac", &frac)?;
        }
        if let Some(frac) = recent_window {
            map.serialize_entry("recent_window", &frac)?;
        }
        map.end()
    }
}
