use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Confidence lost for every field that needed a fallback column or a
/// best-effort pattern.
pub const FALLBACK_PENALTY: f64 = 0.05;

/// Extraction strategies, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Read the document's own text layer.
    Direct,
    /// Render in a headless browser, then read what it shows.
    Rendered,
    /// Run a jurisdiction-specific extraction routine.
    CustomProfile,
    /// Ask a vision-capable model to read the page.
    Assisted,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::Rendered,
        Strategy::CustomProfile,
        Strategy::Assisted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Rendered => "rendered",
            Strategy::CustomProfile => "custom_profile",
            Strategy::Assisted => "assisted",
        }
    }

    /// Baseline confidence for a row with every field found in its primary column.
    pub fn baseline_confidence(&self) -> f64 {
        match self {
            Strategy::Direct => 0.95,
            Strategy::Rendered => 0.85,
            Strategy::CustomProfile => 0.80,
            Strategy::Assisted => 0.60,
        }
    }

    /// The strategy to escalate to after this one fails.
    pub fn next(&self) -> Option<Strategy> {
        match self {
            Strategy::Direct => Some(Strategy::Rendered),
            Strategy::Rendered => Some(Strategy::CustomProfile),
            Strategy::CustomProfile => Some(Strategy::Assisted),
            Strategy::Assisted => None,
        }
    }

    /// Confidence for a record produced by this strategy after `fallbacks`
    /// degraded fields. Always within `[0.0, 1.0]`.
    pub fn record_confidence(&self, fallbacks: u32) -> f64 {
        (self.baseline_confidence() - FALLBACK_PENALTY * f64::from(fallbacks)).clamp(0.0, 1.0)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Strategy::Direct),
            "rendered" => Ok(Strategy::Rendered),
            "custom_profile" => Ok(Strategy::CustomProfile),
            "assisted" => Ok(Strategy::Assisted),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// Per-document extraction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    New,
    Attempting(Strategy),
    Succeeded,
    /// Every strategy was tried; the document is recorded as NO_EXTRACTABLE_CONTENT.
    Failed,
}

/// What a single attempt produced, as far as the state machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// At least one record with non-zero confidence came out.
    Extracted,
    /// Error, timeout, or zero usable records.
    Blocked,
}

impl ExtractionState {
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            ExtractionState::Attempting(strategy) => Some(*strategy),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionState::Succeeded | ExtractionState::Failed)
    }

    /// Leaves `New` for the first attempt.
    pub fn start(self) -> ExtractionState {
        match self {
            ExtractionState::New => ExtractionState::Attempting(Strategy::Direct),
            other => other,
        }
    }

    /// Applies an attempt verdict. Terminal states absorb every verdict.
    pub fn advance(self, verdict: AttemptVerdict) -> ExtractionState {
        match (self, verdict) {
            (ExtractionState::New, _) => self.start(),
            (ExtractionState::Attempting(_), AttemptVerdict::Extracted) => {
                ExtractionState::Succeeded
            }
            (ExtractionState::Attempting(strategy), AttemptVerdict::Blocked) => match strategy
                .next()
            {
                Some(next) => ExtractionState::Attempting(next),
                None => ExtractionState::Failed,
            },
            (terminal, _) => terminal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionState::New => "NEW",
            ExtractionState::Attempting(Strategy::Direct) => "ATTEMPT_DIRECT",
            ExtractionState::Attempting(Strategy::Rendered) => "ATTEMPT_RENDERED",
            ExtractionState::Attempting(Strategy::CustomProfile) => "ATTEMPT_CUSTOM_PROFILE",
            ExtractionState::Attempting(Strategy::Assisted) => "ATTEMPT_ASSISTED",
            ExtractionState::Succeeded => "SUCCEEDED",
            ExtractionState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
