//! The four execution modes and their configuration record.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::phase::AgentType;

/// A switchable execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Speed,
    Quality,
    Autonomy,
    Cost,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Speed, Mode::Quality, Mode::Autonomy, Mode::Cost];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Speed => "SPEED",
            Mode::Quality => "QUALITY",
            Mode::Autonomy => "AUTONOMY",
            Mode::Cost => "COST",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::errors::ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SPEED" => Ok(Mode::Speed),
            "QUALITY" => Ok(Mode::Quality),
            "AUTONOMY" => Ok(Mode::Autonomy),
            "COST" => Ok(Mode::Cost),
            other => Err(crate::errors::ModeError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionDepth {
    Shallow,
    Standard,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelizationLevel {
    Aggressive,
    Balanced,
    Conservative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationDepth {
    Minimal,
    Standard,
    Comprehensive,
}

/// A provider/model pairing a mode strategy resolves a complexity class to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelDescriptor {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

/// The validation profile a mode strategy demands before a task may
/// complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub typecheck: bool,
    pub lint: bool,
    pub build: bool,
    pub tests: bool,
    pub require_review: bool,
    pub require_security_scan: bool,
    #[serde(default)]
    pub min_coverage: Option<f32>,
}

/// Per-mode configuration record (SPEC_FULL.md 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub mode: Mode,
    pub decomposition_depth: DecompositionDepth,
    pub parallelization: ParallelizationLevel,
    pub validation_depth: ValidationDepth,
    pub human_approval: bool,
    pub primary_model: ModelDescriptor,
    pub fallback_model: ModelDescriptor,
    pub use_local_models: bool,
    pub required_agents: Vec<AgentType>,
    pub optional_agents: Vec<AgentType>,
    #[serde(with = "duration_secs")]
    pub task_timeout: Duration,
    pub max_retries: u32,
    #[serde(default)]
    pub cost_limit: Option<Decimal>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn mode_round_trips_through_str() {
        for m in Mode::ALL {
            assert_eq!(Mode::from_str(m.as_str()).unwrap(), m);
        }
    }

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(Mode::from_str("speed").unwrap(), Mode::Speed);
        assert_eq!(Mode::from_str("Quality").unwrap(), Mode::Quality);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Mode::from_str("TURBO").is_err());
    }
}
