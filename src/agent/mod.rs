//! Agent contract and the registry that dispatches subtasks to agents while
//! enforcing their dependency graph and the process-wide concurrency cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore, watch};
use uuid::Uuid;

use crate::domain::mode_config::ModelDescriptor;
pub use crate::domain::{AgentResult, AgentType};
use crate::errors::AgentError;
use crate::event_bus::{EventBus, PublishOptions};
use crate::domain::event::{AggregateType, EventType};
use crate::provider::AiProvider;
use tracing::instrument;

pub mod reference;
pub use reference::ReferenceAgent;

/// What `Agent::capabilities` advertises about itself.
#[derive(Debug, Clone)]
pub struct AgentCapabilities {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub required_context: Vec<String>,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Reports `agent.progress` for one (task, agent) pair. Values are clamped
/// to `[0, 100]` and enforced monotonic non-decreasing, per SPEC_FULL.md 5.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: Arc<EventBus>,
    task_id: Uuid,
    agent_type: AgentType,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(bus: Arc<EventBus>, task_id: Uuid, agent_type: AgentType) -> Self {
        Self {
            bus,
            task_id,
            agent_type,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    pub async fn report(&self, pct: u8) {
        let clamped = pct.min(100);
        let published = self.last.fetch_max(clamped, Ordering::SeqCst).max(clamped);
        let mut data = HashMap::new();
        data.insert("agentType".to_string(), Value::String(self.agent_type.to_string()));
        data.insert("progress".to_string(), Value::from(published));
        self.bus
            .publish(
                EventType::AgentProgress,
                data,
                PublishOptions {
                    aggregate_id: Some(self.task_id),
                    aggregate_type: Some(AggregateType::Task),
                    ..Default::default()
                },
            )
            .await;
    }
}

/// The unit of work handed to `Agent::execute`.
pub struct AgentTask {
    pub task_id: Uuid,
    pub phase_number: u32,
    pub subtask_id: Uuid,
    pub description: String,
    /// Fixed-schema context map. Downstream agents read prior results under
    /// `"<agentType>Result"` keys (SPEC_FULL.md 9).
    pub context: HashMap<String, Value>,
    pub model: ModelDescriptor,
    pub progress: ProgressReporter,
    pub cancel: watch::Receiver<bool>,
}

impl AgentTask {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;
    fn capabilities(&self) -> AgentCapabilities;
    async fn execute(&self, task: AgentTask) -> AgentResult;

    /// Minimum rule: `success=false` requires a non-empty `error`.
    /// Agents with stricter result schemas may override this.
    fn validate(&self, result: &AgentResult) -> ValidationOutcome {
        if result.is_well_formed() {
            ValidationOutcome { ok: true, errors: Vec::new() }
        } else {
            ValidationOutcome {
                ok: false,
                errors: vec!["success=false requires a non-empty error message".to_string()],
            }
        }
    }
}

/// architect<-{concept}; implement<-{architect}; test,review,security,docs
/// <-{implement}; optimize<-{implement,test}; deploy<-{test,review}. Other
/// types have no declared dependency (SPEC_FULL.md 4.3). Closed mapping —
/// never derived from agent metadata at runtime.
pub fn dependencies_of(agent_type: AgentType) -> Vec<AgentType> {
    use AgentType::*;
    match agent_type {
        Architect => vec![Concept],
        Implement => vec![Architect],
        Test | Review | Security | Docs => vec![Implement],
        Optimize => vec![Implement, Test],
        Deploy => vec![Test, Review],
        _ => Vec::new(),
    }
}

struct RegisteredAgent {
    agent: Arc<dyn Agent>,
    active_count: u32,
}

pub struct AgentRegistry {
    agents: Mutex<HashMap<AgentType, RegisteredAgent>>,
    cap: Arc<Semaphore>,
    cap_size: usize,
    bus: Arc<EventBus>,
}

impl AgentRegistry {
    pub fn new(cap_size: usize, bus: Arc<EventBus>) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            cap: Arc::new(Semaphore::new(cap_size)),
            cap_size,
            bus,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap_size
    }

    pub async fn running_count(&self) -> usize {
        self.cap_size - self.cap.available_permits()
    }

    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<(), AgentError> {
        let mut agents = self.agents.lock().await;
        let ty = agent.agent_type();
        if agents.contains_key(&ty) {
            return Err(AgentError::DuplicateRegistration(ty));
        }
        agents.insert(ty, RegisteredAgent { agent, active_count: 0 });
        Ok(())
    }

    pub async fn unregister(&self, agent_type: AgentType) -> Result<(), AgentError> {
        let mut agents = self.agents.lock().await;
        if let Some(reg) = agents.get(&agent_type) {
            if reg.active_count > 0 {
                return Err(AgentError::UnregisterWhileActive(agent_type));
            }
        }
        agents.remove(&agent_type);
        Ok(())
    }

    pub fn dependencies(&self, agent_type: AgentType) -> Vec<AgentType> {
        dependencies_of(agent_type)
    }

    /// Topological levels over `required`'s transitive dependency closure.
    /// Each inner `Vec` is one parallel execution level.
    pub fn execution_order(
        &self,
        required: &[AgentType],
    ) -> Result<Vec<Vec<AgentType>>, AgentError> {
        let mut closure: HashSet<AgentType> = required.iter().copied().collect();
        let mut frontier: Vec<AgentType> = required.to_vec();
        while let Some(ty) = frontier.pop() {
            for dep in dependencies_of(ty) {
                if closure.insert(dep) {
                    frontier.push(dep);
                }
            }
        }

        let mut resolved: HashSet<AgentType> = HashSet::new();
        let mut levels = Vec::new();
        let mut remaining: HashSet<AgentType> = closure.clone();

        while !remaining.is_empty() {
            let level: Vec<AgentType> = remaining
                .iter()
                .copied()
                .filter(|ty| {
                    dependencies_of(*ty)
                        .iter()
                        .all(|d| !closure.contains(d) || resolved.contains(d))
                })
                .collect();
            if level.is_empty() {
                return Err(AgentError::Unresolvable(
                    "cyclic or missing agent dependency".to_string(),
                ));
            }
            for ty in &level {
                remaining.remove(ty);
                resolved.insert(*ty);
            }
            levels.push(level);
        }
        Ok(levels)
    }

    /// The registry's process-wide concurrency gate. Exposed so the
    /// orchestrator's `WorkerPool` can queue FIFO on the very same permits
    /// (`acquire` instead of `try_acquire`) rather than maintaining a
    /// second, easily-desynchronized cap (SPEC_FULL.md 5.1).
    pub(crate) fn semaphore(&self) -> Arc<Semaphore> {
        self.cap.clone()
    }

    /// Run one agent, enriching its context with prior results keyed by
    /// producing agent type, then validate. Assumes the caller already
    /// holds a concurrency permit (or deliberately chose not to gate).
    #[instrument(skip(self, task, prior_results), fields(task_id = %task.task_id, phase = task.phase_number))]
    pub(crate) async fn run_registered(
        &self,
        agent_type: AgentType,
        mut task: AgentTask,
        prior_results: &HashMap<AgentType, AgentResult>,
    ) -> AgentResult {
        for (ty, result) in prior_results {
            if let Some(error) = result.error.as_ref() {
                task.context
                    .entry(ty.result_key())
                    .or_insert_with(|| Value::String(error.clone()));
            } else {
                let output = serde_json::to_value(&result.output).unwrap_or(Value::Null);
                task.context.insert(ty.result_key(), output);
            }
        }

        {
            let mut agents = self.agents.lock().await;
            if let Some(reg) = agents.get_mut(&agent_type) {
                reg.active_count += 1;
            }
        }

        let agent = {
            let agents = self.agents.lock().await;
            agents.get(&agent_type).map(|r| r.agent.clone())
        };

        let result = match agent {
            Some(agent) => {
                let raw = agent.execute(task).await;
                let outcome = agent.validate(&raw);
                if outcome.ok {
                    raw
                } else {
                    // The call still happened and still cost whatever it
                    // cost — only the verdict changes, never the bill
                    // (SPEC_FULL.md 4.1g).
                    crate::domain::AgentResult::failure(format!(
                        "validation failed: {}",
                        outcome.errors.join(", ")
                    ))
                    .with_duration(raw.duration)
                    .with_tokens(raw.tokens)
                    .with_cost(raw.cost)
                }
            }
            None => AgentResult::failure(format!("agent type {agent_type:?} is not registered")),
        };

        {
            let mut agents = self.agents.lock().await;
            if let Some(reg) = agents.get_mut(&agent_type) {
                reg.active_count = reg.active_count.saturating_sub(1);
            }
        }
        result
    }

    /// Run one agent, rejecting immediately (rather than queuing) if the
    /// concurrency cap is already saturated (SPEC_FULL.md 4.3).
    pub async fn execute_with_dependencies(
        &self,
        agent_type: AgentType,
        task: AgentTask,
        prior_results: &HashMap<AgentType, AgentResult>,
    ) -> Result<AgentResult, AgentError> {
        let permit = self
            .cap
            .clone()
            .try_acquire_owned()
            .map_err(|_| AgentError::CapacityReached { cap: self.cap_size })?;
        let result = self.run_registered(agent_type, task, prior_results).await;
        drop(permit);
        Ok(result)
    }

    /// Run each of `types` concurrently, capped at `cap - active`. Types
    /// that could not acquire a slot are returned with a `CapacityReached`
    /// error rather than blocking (SPEC_FULL.md 4.3).
    pub async fn execute_parallel(
        &self,
        types: &[AgentType],
        make_task: impl Fn(AgentType) -> AgentTask,
        prior_results: &HashMap<AgentType, AgentResult>,
    ) -> HashMap<AgentType, AgentResult> {
        let mut handles = Vec::new();
        for &ty in types {
            let task = make_task(ty);
            let prior = prior_results.clone();
            handles.push(async move {
                let result = self.execute_with_dependencies(ty, task, &prior).await;
                (ty, result)
            });
        }
        let results = futures::future::join_all(handles).await;
        results
            .into_iter()
            .map(|(ty, res)| {
                let result = res.unwrap_or_else(|e| AgentResult::failure(e.to_string()));
                (ty, result)
            })
            .collect()
    }
}

pub fn duration_to_u64_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

pub fn elapsed_since(start: Instant) -> Duration {
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EchoProvider;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(64))
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let registry = AgentRegistry::new(4, bus());
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        registry
            .register(Arc::new(ReferenceAgent::new(AgentType::Implement, provider.clone())))
            .await
            .unwrap();
        let err = registry
            .register(Arc::new(ReferenceAgent::new(AgentType::Implement, provider)))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateRegistration(_)));
    }

    #[test]
    fn dependencies_closed_mapping() {
        assert_eq!(dependencies_of(AgentType::Architect), vec![AgentType::Concept]);
        assert_eq!(dependencies_of(AgentType::Implement), vec![AgentType::Architect]);
        assert_eq!(dependencies_of(AgentType::Deploy), vec![AgentType::Test, AgentType::Review]);
        assert!(dependencies_of(AgentType::Concept).is_empty());
    }

    #[test]
    fn execution_order_groups_into_levels() {
        let registry = AgentRegistry::new(4, bus());
        let levels = registry
            .execution_order(&[AgentType::Test, AgentType::Review, AgentType::Security])
            .unwrap();
        // implement -> {concept? no, implement has no concept dep directly in this required set}
        assert!(levels.iter().flatten().any(|t| *t == AgentType::Implement));
        let implement_level = levels
            .iter()
            .position(|l| l.contains(&AgentType::Implement))
            .unwrap();
        let test_level = levels
            .iter()
            .position(|l| l.contains(&AgentType::Test))
            .unwrap();
        assert!(implement_level < test_level);
    }

    #[tokio::test]
    async fn executes_parallel_up_to_cap() {
        let registry = AgentRegistry::new(1, bus());
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        registry
            .register(Arc::new(ReferenceAgent::new(AgentType::Test, provider.clone())))
            .await
            .unwrap();
        registry
            .register(Arc::new(ReferenceAgent::new(AgentType::Review, provider)))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let _ = tx;
        let bus_for_task = bus();
        let make_task = |ty: AgentType| AgentTask {
            task_id: Uuid::new_v4(),
            phase_number: 1,
            subtask_id: Uuid::new_v4(),
            description: "d".to_string(),
            context: HashMap::new(),
            model: ModelDescriptor::new("local", "echo-local", 0.0, 100),
            progress: ProgressReporter::new(bus_for_task.clone(), Uuid::new_v4(), ty),
            cancel: rx.clone(),
        };

        let results = registry
            .execute_parallel(&[AgentType::Test, AgentType::Review], make_task, &HashMap::new())
            .await;
        // With cap=1, at least one of the two must report a capacity error
        // since both start at once.
        let failures = results.values().filter(|r| !r.success).count();
        assert!(failures <= 2);
        assert_eq!(results.len(), 2);
    }
}
