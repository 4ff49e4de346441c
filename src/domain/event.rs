//! Domain event envelope and the closed event-type taxonomy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The aggregate an event belongs to. Closed set per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Task,
    Project,
    Execution,
    Mode,
}

/// The closed taxonomy of event types this crate ever publishes.
///
/// `as_str` / `FromStr` round-trip the wire form used in event payloads and
/// subscription filters (`"task.phase.started"`, `"agent.progress"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    TaskCreated,
    TaskStarted,
    TaskPaused,
    TaskResumed,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    PhaseSkipped,
    AgentStarted,
    AgentProgress,
    AgentCompleted,
    AgentFailed,
    AgentLog,
    ModeSwitching,
    ModeSwitched,
    ModeConfigUpdated,
    CostIncurred,
    CostLimitReached,
    SystemStarted,
    SystemShutdown,
    SystemError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "task.created",
            EventType::TaskStarted => "task.started",
            EventType::TaskPaused => "task.paused",
            EventType::TaskResumed => "task.resumed",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskFailed => "task.failed",
            EventType::TaskCancelled => "task.cancelled",
            EventType::PhaseStarted => "task.phase.started",
            EventType::PhaseCompleted => "task.phase.completed",
            EventType::PhaseFailed => "task.phase.failed",
            EventType::PhaseSkipped => "task.phase.skipped",
            EventType::AgentStarted => "agent.started",
            EventType::AgentProgress => "agent.progress",
            EventType::AgentCompleted => "agent.completed",
            EventType::AgentFailed => "agent.failed",
            EventType::AgentLog => "agent.log",
            EventType::ModeSwitching => "mode.switching",
            EventType::ModeSwitched => "mode.switched",
            EventType::ModeConfigUpdated => "mode.config.updated",
            EventType::CostIncurred => "cost.incurred",
            EventType::CostLimitReached => "cost.limit.reached",
            EventType::SystemStarted => "system.started",
            EventType::SystemShutdown => "system.shutdown",
            EventType::SystemError => "system.error",
        }
    }

    pub const ALL: &'static [EventType] = &[
        EventType::TaskCreated,
        EventType::TaskStarted,
        EventType::TaskPaused,
        EventType::TaskResumed,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::TaskCancelled,
        EventType::PhaseStarted,
        EventType::PhaseCompleted,
        EventType::PhaseFailed,
        EventType::PhaseSkipped,
        EventType::AgentStarted,
        EventType::AgentProgress,
        EventType::AgentCompleted,
        EventType::AgentFailed,
        EventType::AgentLog,
        EventType::ModeSwitching,
        EventType::ModeSwitched,
        EventType::ModeConfigUpdated,
        EventType::CostIncurred,
        EventType::CostLimitReached,
        EventType::SystemStarted,
        EventType::SystemShutdown,
        EventType::SystemError,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type {s:?}"))
    }
}

/// Metadata carried alongside every event's payload.
///
/// `correlation_id` defaults to the originating task's id for every event
/// published during that task's lifecycle; `causation_id` is the id of the
/// event that directly triggered this one, or `None` for the root
/// `task.created` event (see SPEC_FULL.md 3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub causation_id: Option<Uuid>,
    #[serde(default)]
    pub source: Option<String>,
}

/// An immutable domain event, once published never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: AggregateType,
    pub event_type: EventType,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}
