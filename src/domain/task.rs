//! The Task aggregate: the central object the orchestrator owns end to end.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent_result::{AgentResult, TokenUsage};
use super::mode_config::Mode;
use super::phase::{AgentType, Phase};

/// The task status state machine (SPEC_FULL.md 3):
///
/// ```text
/// pending -> analyzing -> [paused -> running] | running -> completed
///                                              \-> failed
///                                              \-> cancelled
/// pending -> cancelled
/// analyzing -> cancelled
/// paused -> cancelled
/// running -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Analyzing,
    Paused,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Paused => "paused",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge in the state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Analyzing) => true,
            (Analyzing, Paused) => true,
            (Analyzing, Running) => true,
            (Paused, Running) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (_, Cancelled) => !matches!(self, Completed | Failed | Cancelled),
            (Analyzing, Failed) => true,
            _ => false,
        }
    }
}

/// One terminal-failure entry, preserved for user-visible diagnosis
/// (SPEC_FULL.md 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: crate::errors::ErrorKind,
    pub message: String,
    #[serde(default)]
    pub phase: Option<u32>,
    #[serde(default)]
    pub agent: Option<AgentType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub project_id: Option<Uuid>,
    pub status: TaskStatus,
    pub priority: u8,
    pub mode: Mode,
    pub phases: Vec<Phase>,
    pub current_phase: usize,
    /// Results keyed by phase number; keys always form a prefix of
    /// `[1..current_phase]`.
    pub results: HashMap<u32, Vec<AgentResult>>,
    pub files_modified: Vec<String>,
    pub tokens_used: TokenUsage,
    pub cost: Decimal,
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        project_id: Option<Uuid>,
        mode: Mode,
        priority: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            project_id,
            status: TaskStatus::Pending,
            priority,
            mode,
            phases: Vec::new(),
            current_phase: 0,
            results: HashMap::new(),
            files_modified: Vec::new(),
            tokens_used: TokenUsage::default(),
            cost: Decimal::ZERO,
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition validation mirroring `TaskStatus::can_transition_to`,
    /// stamping `started_at`/`completed_at` as the relevant edges are
    /// crossed.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), crate::errors::OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::errors::OrchestratorError::Other(anyhow::anyhow!(
                "illegal task transition {:?} -> {:?}",
                self.status,
                next
            )));
        }
        if next == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    pub fn record_result(&mut self, phase_number: u32, result: AgentResult) {
        self.tokens_used.add(result.tokens);
        self.cost += result.cost;
        if result.success {
            self.files_modified
                .extend(result.files_modified.iter().cloned());
        }
        self.results.entry(phase_number).or_default().push(result);
    }

    /// Invariant check used by tests: `results` keys are a prefix of
    /// `[1..current_phase]`.
    pub fn results_keys_are_prefix(&self) -> bool {
        let mut keys: Vec<u32> = self.results.keys().copied().collect();
        keys.sort_unstable();
        keys.iter()
            .enumerate()
            .all(|(i, &k)| k == (i as u32) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_analyzing_is_legal() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Analyzing));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn cancellation_reachable_from_every_nonterminal_state() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Analyzing.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn transition_stamps_started_at() {
        let mut t = Task::new("fix typo", None, Mode::Speed, 50);
        t.transition(TaskStatus::Analyzing).unwrap();
        t.transition(TaskStatus::Running).unwrap();
        assert!(t.started_at.is_some());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut t = Task::new("fix typo", None, Mode::Speed, 50);
        assert!(t.transition(TaskStatus::Completed).is_err());
    }

    #[test]
    fn results_prefix_invariant() {
        let mut t = Task::new("x", None, Mode::Speed, 50);
        assert!(t.results_keys_are_prefix());
        t.record_result(1, AgentResult::success(Default::default(), Vec::new()));
        assert!(t.results_keys_are_prefix());
        t.record_result(3, AgentResult::success(Default::default(), Vec::new()));
        assert!(!t.results_keys_are_prefix());
    }
}
