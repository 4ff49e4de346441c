//! Typed error hierarchy for the orchestrator core.
//!
//! Every subsystem gets its own `thiserror` enum, but all of them classify
//! into the same closed taxonomy (`ErrorKind`) so callers can match on
//! *kind* without caring which subsystem raised the error — this is what
//! drives retry/propagation policy in the orchestrator's phase loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error-kind taxonomy every subsystem error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unresolvable,
    Transient,
    Timeout,
    Cancelled,
    CostExceeded,
    Provider,
    Internal,
}

impl ErrorKind {
    /// Whether the retry loop should absorb an error of this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Provider)
    }
}

/// Errors raised by the orchestrator's task pipeline.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task description must not be empty")]
    EmptyDescription,

    #[error("priority {0} is outside the valid range [0, 100]")]
    InvalidPriority(u8),

    #[error("task {0} not found")]
    TaskNotFound(uuid::Uuid),

    #[error("project {0} not found")]
    ProjectNotFound(uuid::Uuid),

    #[error("task {0} is in terminal state and cannot be retried")]
    NotRetryable(uuid::Uuid),

    #[error("task {0} is not awaiting approval")]
    NotPaused(uuid::Uuid),

    #[error("decomposition produced an invalid plan: {0}")]
    InvalidPlan(String),

    #[error("cost cap exceeded: spent {spent} against cap {cap}")]
    CostExceeded {
        spent: rust_decimal::Decimal,
        cap: rust_decimal::Decimal,
    },

    #[error("task {0} was cancelled")]
    Cancelled(uuid::Uuid),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Mode(#[from] ModeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::EmptyDescription | OrchestratorError::InvalidPriority(_) => {
                ErrorKind::Validation
            }
            OrchestratorError::TaskNotFound(_) | OrchestratorError::ProjectNotFound(_) => {
                ErrorKind::NotFound
            }
            OrchestratorError::NotRetryable(_) => ErrorKind::Conflict,
            OrchestratorError::NotPaused(_) => ErrorKind::Conflict,
            OrchestratorError::InvalidPlan(_) => ErrorKind::Validation,
            OrchestratorError::CostExceeded { .. } => ErrorKind::CostExceeded,
            OrchestratorError::Cancelled(_) => ErrorKind::Cancelled,
            OrchestratorError::Agent(e) => e.kind(),
            OrchestratorError::Mode(e) => e.kind(),
            OrchestratorError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Errors raised by an agent's execution or the registry dispatching it.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent type {0:?} is already registered")]
    DuplicateRegistration(crate::domain::AgentType),

    #[error("agent type {0:?} cannot be unregistered while active")]
    UnregisterWhileActive(crate::domain::AgentType),

    #[error("agent dependency graph is unresolvable: {0}")]
    Unresolvable(String),

    #[error("agent concurrency cap reached ({cap})")]
    CapacityReached { cap: usize },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("agent {agent:?} timed out after {elapsed_ms}ms")]
    Timeout {
        agent: crate::domain::AgentType,
        elapsed_ms: u64,
    },

    #[error("agent {agent:?} was cancelled")]
    Cancelled { agent: crate::domain::AgentType },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::DuplicateRegistration(_) => ErrorKind::Conflict,
            AgentError::UnregisterWhileActive(_) => ErrorKind::Conflict,
            AgentError::Unresolvable(_) => ErrorKind::Unresolvable,
            AgentError::CapacityReached { .. } => ErrorKind::Conflict,
            AgentError::ValidationFailed(_) => ErrorKind::Validation,
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::Cancelled { .. } => ErrorKind::Cancelled,
            AgentError::Provider(e) => e.kind(),
        }
    }
}

/// Errors raised by an AI provider implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("provider network error: {0}")]
    Network(String),

    #[error("provider returned an error finish reason: {0}")]
    ErrorFinish(String),

    #[error("model {0} is unknown to this provider")]
    UnknownModel(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RateLimited(_) | ProviderError::Network(_) => ErrorKind::Transient,
            ProviderError::ErrorFinish(_) => ErrorKind::Provider,
            ProviderError::UnknownModel(_) => ErrorKind::Validation,
        }
    }

    /// Whether this is explicitly transient per the spec's retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Network(_)
        )
    }
}

/// Errors raised by the Mode Manager.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("mode switch already in progress")]
    SwitchInProgress,

    #[error("unknown mode {0}")]
    UnknownMode(String),
}

impl ModeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModeError::SwitchInProgress => ErrorKind::Conflict,
            ModeError::UnknownMode(_) => ErrorKind::Validation,
        }
    }
}

/// Errors raised by the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("version conflict for aggregate {aggregate_id}: expected > {expected}, got {got}")]
    VersionConflict {
        aggregate_id: uuid::Uuid,
        expected: u64,
        got: u64,
    },

    #[error("no snapshot found for aggregate {0}")]
    SnapshotNotFound(uuid::Uuid),
}

impl EventStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::VersionConflict { .. } => ErrorKind::Conflict,
            EventStoreError::SnapshotNotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Errors raised by the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("maxListeners ({max}) reached for {event_type}")]
    MaxListenersReached { event_type: String, max: usize },
}

impl EventBusError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to write config file at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::ReadFailed { .. } | ConfigError::WriteFailed { .. } => {
                ErrorKind::Internal
            }
            ConfigError::ParseFailed(_) | ConfigError::InvalidValue(_) => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_error_empty_description_is_validation() {
        let err = OrchestratorError::EmptyDescription;
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn orchestrator_error_invalid_priority_carries_value() {
        let err = OrchestratorError::InvalidPriority(150);
        assert!(err.to_string().contains("150"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn cost_exceeded_kind_maps_correctly() {
        use rust_decimal::Decimal;
        let err = OrchestratorError::CostExceeded {
            spent: Decimal::new(36, 3),
            cap: Decimal::new(10, 3),
        };
        assert_eq!(err.kind(), ErrorKind::CostExceeded);
    }

    #[test]
    fn provider_error_transient_classification() {
        assert!(ProviderError::RateLimited("x".into()).is_transient());
        assert!(ProviderError::Network("x".into()).is_transient());
        assert!(!ProviderError::ErrorFinish("x".into()).is_transient());
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Provider.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
    }

    #[test]
    fn agent_error_converts_from_provider_error() {
        let inner = ProviderError::RateLimited("slow down".to_string());
        let agent_err: AgentError = inner.into();
        assert_eq!(agent_err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&OrchestratorError::EmptyDescription);
        assert_std_error(&AgentError::CapacityReached { cap: 4 });
        assert_std_error(&ProviderError::UnknownModel("gpt-5".into()));
        assert_std_error(&ModeError::SwitchInProgress);
        assert_std_error(&EventStoreError::SnapshotNotFound(uuid::Uuid::nil()));
        assert_std_error(&EventBusError::MaxListenersReached {
            event_type: "task.created".into(),
            max: 10,
        });
    }
}
