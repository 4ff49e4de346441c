//! Outcome of a single agent execution.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage for one provider call (or the sum of several, for an agent
/// that makes more than one call while executing a subtask).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// The result of `Agent::execute`.
///
/// `success = false` requires a non-empty `error`; `success = true` never
/// carries an `error`. Constructors enforce the invariant so callers cannot
/// build an inconsistent value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub output: HashMap<String, Value>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub cost: Decimal,
    /// Set when the provider truncated output at `maxTokens` and the agent
    /// chose to surface the partial result rather than retry (see
    /// `finishReason=length`, DESIGN.md).
    #[serde(default)]
    pub truncated: bool,
    /// Whether the orchestrator's retry loop may resubmit this subtask
    /// (SPEC_FULL.md 7): set by the producing agent from the provider
    /// error's `ErrorKind`, never guessed from the message text.
    #[serde(default)]
    pub retryable: bool,
}

impl AgentResult {
    pub fn success(output: HashMap<String, Value>, files_modified: Vec<String>) -> Self {
        Self {
            success: true,
            error: None,
            suggestions: Vec::new(),
            output,
            files_modified,
            duration: Duration::ZERO,
            tokens: TokenUsage::default(),
            cost: Decimal::ZERO,
            truncated: false,
            retryable: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty(), "AgentResult::failure requires a message");
        Self {
            success: false,
            error: Some(error),
            suggestions: Vec::new(),
            output: HashMap::new(),
            files_modified: Vec::new(),
            duration: Duration::ZERO,
            tokens: TokenUsage::default(),
            cost: Decimal::ZERO,
            truncated: false,
            retryable: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Minimum validation rule every agent's result must satisfy.
    pub fn is_well_formed(&self) -> bool {
        if self.success {
            self.error.is_none()
        } else {
            self.error.as_deref().is_some_and(|e| !e.is_empty())
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let r = AgentResult::success(HashMap::new(), Vec::new());
        assert!(r.is_well_formed());
        assert!(r.error.is_none());
    }

    #[test]
    fn failure_requires_message() {
        let r = AgentResult::failure("boom");
        assert!(r.is_well_formed());
        assert_eq!(r.error.as_deref(), Some("boom"));
    }

    #[test]
    fn token_usage_accumulates() {
        let mut u = TokenUsage { input: 10, output: 20 };
        u.add(TokenUsage { input: 5, output: 5 });
        assert_eq!(u.total(), 40);
    }
}
