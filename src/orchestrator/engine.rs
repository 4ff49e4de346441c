//! The Orchestrator: the coordinator that runs `analyze -> decompose ->
//! execute phases -> finalize` for every submitted task (SPEC_FULL.md 4.1).
//!
//! Owns the task registry, delegates decomposition to the [`ModeManager`],
//! phase execution to the [`AgentRegistry`] via the [`WorkerPool`], and
//! publishes every state transition to the [`EventBus`] and [`EventStore`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::agent::{AgentRegistry, AgentTask, ProgressReporter};
use crate::domain::event::{AggregateType, EventType};
use crate::domain::mode_config::{Mode, ModeConfig, ModelDescriptor};
use crate::domain::phase::{AgentType, Phase, PhaseStatus, Subtask, SubtaskStatus};
use crate::domain::{AgentResult, DomainEvent, Task, TaskError, TaskStatus};
use crate::errors::{ErrorKind, OrchestratorError};
use crate::event_bus::{EventBus, PublishOptions};
use crate::event_store::EventStore;
use crate::mode::{ModeManager, classify_complexity};
use tracing::instrument;

use super::backoff::backoff_duration;
use super::cost::cap_exceeded;
use super::project_registry::ProjectRegistry;
use super::queue::TaskQueue;
use super::worker_pool::WorkerPool;

/// Where `Orchestrator::subscribe` narrows delivery to.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    All,
    EventType(EventType),
    Task(Uuid),
}

pub struct OrchestratorConfig {
    pub default_mode: Mode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { default_mode: Mode::Speed }
    }
}

struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub struct Orchestrator {
    bus: Arc<EventBus>,
    store: Arc<dyn EventStore>,
    mode_manager: Arc<ModeManager>,
    registry: Arc<AgentRegistry>,
    pool: Arc<WorkerPool>,
    projects: Arc<ProjectRegistry>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    cancels: RwLock<HashMap<Uuid, CancelHandle>>,
    approvals: RwLock<HashMap<Uuid, watch::Sender<bool>>>,
    /// Last event id published for a given task, used to chain
    /// `causation_id` (SPEC_FULL.md 3.1) — absent until that task's first
    /// event, which therefore publishes with no causation.
    last_event: RwLock<HashMap<Uuid, Uuid>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        bus: Arc<EventBus>,
        store: Arc<dyn EventStore>,
        registry: Arc<AgentRegistry>,
    ) -> Arc<Self> {
        let pool = Arc::new(WorkerPool::new(registry.clone()));
        let mode_manager = Arc::new(ModeManager::new(bus.clone(), config.default_mode));
        Arc::new(Self {
            bus,
            store,
            mode_manager,
            registry,
            pool,
            projects: Arc::new(ProjectRegistry::new()),
            tasks: RwLock::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            approvals: RwLock::new(HashMap::new()),
            last_event: RwLock::new(HashMap::new()),
        })
    }

    pub fn mode_manager(&self) -> &Arc<ModeManager> {
        &self.mode_manager
    }

    pub fn projects(&self) -> &Arc<ProjectRegistry> {
        &self.projects
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Create the task in `pending`, publish `task.created`, and spawn its
    /// execution. Returns immediately (SPEC_FULL.md 4.1).
    #[instrument(skip(self, description), fields(mode, priority))]
    pub async fn submit(
        self: &Arc<Self>,
        description: impl Into<String>,
        project_id: Option<Uuid>,
        mode: Option<Mode>,
        priority: u8,
    ) -> Result<Uuid, OrchestratorError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(OrchestratorError::EmptyDescription);
        }
        if priority > 100 {
            return Err(OrchestratorError::InvalidPriority(priority));
        }

        let mode = mode.unwrap_or(self.mode_manager.active_mode().await);
        let task = Task::new(description.clone(), project_id, mode, priority);
        let id = task.id;

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(id, task);
        }
        let (tx, _rx) = watch::channel(false);
        self.cancels.write().await.insert(id, CancelHandle { tx });
        let (approve_tx, _approve_rx) = watch::channel(false);
        self.approvals.write().await.insert(id, approve_tx);

        self.emit(
            id,
            EventType::TaskCreated,
            HashMap::from([
                ("description".to_string(), Value::String(description)),
                ("mode".to_string(), Value::String(mode.to_string())),
            ]),
        )
        .await;

        let this = self.clone();
        tokio::spawn(async move {
            this.run_task(id).await;
        });

        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, task_id: Uuid) -> Result<Task, OrchestratorError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(OrchestratorError::TaskNotFound(task_id))
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Mark `task_id` for cancellation. Idempotent: a no-op on a terminal
    /// task, and a second call on a running task produces no additional
    /// `task.cancelled` event (the flag is only ever flipped once).
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), OrchestratorError> {
        let is_terminal = {
            let tasks = self.tasks.read().await;
            tasks
                .get(&task_id)
                .ok_or(OrchestratorError::TaskNotFound(task_id))?
                .status
                .is_terminal()
        };
        if is_terminal {
            return Ok(());
        }
        if let Some(handle) = self.cancels.read().await.get(&task_id) {
            let _ = handle.tx.send(true);
        }
        Ok(())
    }

    /// Only legal from `failed`; submits a fresh task with the same
    /// description/mode/priority and none of the original's state
    /// (SPEC_FULL.md 7).
    #[instrument(skip(self))]
    pub async fn retry(self: &Arc<Self>, task_id: Uuid) -> Result<Uuid, OrchestratorError> {
        let (description, mode, priority, project_id) = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(&task_id).ok_or(OrchestratorError::TaskNotFound(task_id))?;
            if task.status != TaskStatus::Failed {
                return Err(OrchestratorError::NotRetryable(task_id));
            }
            (task.description.clone(), task.mode, task.priority, task.project_id)
        };
        self.submit(description, project_id, Some(mode), priority).await
    }

    /// Release a task held in `paused` by the active mode's human-approval
    /// gate (SPEC_FULL.md 9). Only legal while the task is `paused`.
    #[instrument(skip(self))]
    pub async fn approve(&self, task_id: Uuid) -> Result<(), OrchestratorError> {
        let is_paused = {
            let tasks = self.tasks.read().await;
            tasks
                .get(&task_id)
                .ok_or(OrchestratorError::TaskNotFound(task_id))?
                .status
                == TaskStatus::Paused
        };
        if !is_paused {
            return Err(OrchestratorError::NotPaused(task_id));
        }
        if let Some(tx) = self.approvals.read().await.get(&task_id) {
            let _ = tx.send(true);
        }
        Ok(())
    }

    /// Stream events matching `filter` until the caller drops the receiver.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, filter: SubscriptionFilter) -> mpsc::Receiver<DomainEvent> {
        let (tx, rx) = mpsc::channel(256);
        match filter {
            SubscriptionFilter::All => {
                let _ = self
                    .bus
                    .subscribe_wildcard(move |event| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(event).await;
                        }
                    })
                    .await;
            }
            SubscriptionFilter::EventType(ty) => {
                let _ = self
                    .bus
                    .subscribe(ty, move |event| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(event).await;
                        }
                    })
                    .await;
            }
            SubscriptionFilter::Task(task_id) => {
                let _ = self
                    .bus
                    .subscribe_wildcard(move |event| {
                        let tx = tx.clone();
                        async move {
                            if event.aggregate_id == task_id {
                                let _ = tx.send(event).await;
                            }
                        }
                    })
                    .await;
            }
        }
        rx
    }

    async fn emit(&self, task_id: Uuid, ty: EventType, data: HashMap<String, Value>) {
        let causation_id = self.last_event.read().await.get(&task_id).copied();
        let event = self
            .bus
            .publish(
                ty,
                data,
                PublishOptions {
                    aggregate_id: Some(task_id),
                    aggregate_type: Some(AggregateType::Task),
                    metadata: crate::domain::EventMetadata {
                        correlation_id: Some(task_id),
                        causation_id,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await;
        self.last_event.write().await.insert(task_id, event.id);
        let _ = self.store.append(event).await;
    }

    async fn cancel_receiver(&self, task_id: Uuid) -> watch::Receiver<bool> {
        self.cancels
            .read()
            .await
            .get(&task_id)
            .expect("cancel handle registered at submit time")
            .tx
            .subscribe()
    }

    async fn is_cancelled(&self, task_id: Uuid) -> bool {
        *self.cancel_receiver(task_id).await.borrow()
    }

    async fn approval_receiver(&self, task_id: Uuid) -> watch::Receiver<bool> {
        self.approvals
            .read()
            .await
            .get(&task_id)
            .expect("approval handle registered at submit time")
            .subscribe()
    }

    async fn transition(&self, task_id: Uuid, next: TaskStatus) -> Result<(), OrchestratorError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(OrchestratorError::TaskNotFound(task_id))?;
        task.transition(next)
    }

    /// The full per-task pipeline: analyze, decompose, execute phases,
    /// finalize. Never panics the caller — every failure path ends the task
    /// in a terminal status and publishes the matching event.
    #[instrument(skip(self))]
    async fn run_task(self: Arc<Self>, task_id: Uuid) {
        if self.is_cancelled(task_id).await {
            self.finish_cancelled(task_id).await;
            return;
        }

        // 1. Analyze.
        if self.transition(task_id, TaskStatus::Analyzing).await.is_err() {
            return;
        }
        let (description, mode) = {
            let tasks = self.tasks.read().await;
            let task = &tasks[&task_id];
            (task.description.clone(), task.mode)
        };
        let complexity = classify_complexity(&description);
        self.emit(task_id, EventType::TaskStarted, HashMap::new()).await;

        // 2. Decompose.
        let phases = self.mode_manager.decompose(mode, &description, complexity);
        if let Err(err) = validate_plan(&phases) {
            self.fail_task(task_id, ErrorKind::Validation, err, None, None).await;
            return;
        }
        {
            let mut tasks = self.tasks.write().await;
            tasks.get_mut(&task_id).unwrap().phases = phases;
        }

        let config = self.mode_manager.config(mode).await;
        let model = self.mode_manager.select_model(mode, complexity);

        // 2b. Human-approval gate, if the active mode requires it.
        if config.human_approval {
            if self.transition(task_id, TaskStatus::Paused).await.is_err() {
                return;
            }
            self.emit(task_id, EventType::TaskPaused, HashMap::new()).await;

            let mut approval_rx = self.approval_receiver(task_id).await;
            let mut cancel_rx = self.cancel_receiver(task_id).await;
            loop {
                if *approval_rx.borrow() {
                    break;
                }
                if *cancel_rx.borrow() {
                    self.finish_cancelled(task_id).await;
                    return;
                }
                tokio::select! {
                    _ = approval_rx.changed() => {}
                    _ = cancel_rx.changed() => {}
                }
            }
            self.emit(task_id, EventType::TaskResumed, HashMap::new()).await;
        }

        // 3. Execute phases.
        if self.transition(task_id, TaskStatus::Running).await.is_err() {
            return;
        }

        let mut prior_results: HashMap<AgentType, AgentResult> = HashMap::new();
        let phase_count = {
            let tasks = self.tasks.read().await;
            tasks[&task_id].phases.len()
        };

        for phase_index in 0..phase_count {
            if self.is_cancelled(task_id).await {
                self.finish_cancelled(task_id).await;
                return;
            }

            let outcome = self
                .run_phase(task_id, phase_index, &config, &model, &mut prior_results)
                .await;

            match outcome {
                PhaseOutcome::Continue => continue,
                PhaseOutcome::Cancelled => {
                    self.finish_cancelled(task_id).await;
                    return;
                }
                PhaseOutcome::CostExceeded { spent, cap } => {
                    self.emit(
                        task_id,
                        EventType::CostLimitReached,
                        HashMap::from([
                            ("spent".to_string(), Value::String(spent.to_string())),
                            ("cap".to_string(), Value::String(cap.to_string())),
                        ]),
                    )
                    .await;
                    self.fail_task(
                        task_id,
                        ErrorKind::CostExceeded,
                        format!("cost cap exceeded: spent {spent} against cap {cap}"),
                        Some(phase_index as u32 + 1),
                        None,
                    )
                    .await;
                    return;
                }
                PhaseOutcome::RequiredPhaseFailed { message, agent } => {
                    self.fail_task(
                        task_id,
                        ErrorKind::Provider,
                        message,
                        Some(phase_index as u32 + 1),
                        Some(agent),
                    )
                    .await;
                    return;
                }
            }
        }

        // 4. Finalize.
        let all_required_ok = {
            let tasks = self.tasks.read().await;
            tasks[&task_id]
                .phases
                .iter()
                .all(|p| !p.required || p.status == PhaseStatus::Completed)
        };
        if all_required_ok {
            if self.transition(task_id, TaskStatus::Completed).await.is_ok() {
                self.emit(task_id, EventType::TaskCompleted, HashMap::new()).await;
            }
        } else {
            self.fail_task(
                task_id,
                ErrorKind::Internal,
                "one or more required phases did not complete".to_string(),
                None,
                None,
            )
            .await;
        }
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        kind: ErrorKind,
        message: String,
        phase: Option<u32>,
        agent: Option<AgentType>,
    ) {
        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.errors.push(TaskError { kind, message, phase, agent });
                let _ = task.transition(TaskStatus::Failed);
            }
        }
        self.emit(task_id, EventType::TaskFailed, HashMap::new()).await;
    }

    async fn finish_cancelled(&self, task_id: Uuid) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            if task.transition(TaskStatus::Cancelled).is_err() {
                return;
            }
        } else {
            return;
        }
        drop(tasks);
        self.emit(task_id, EventType::TaskCancelled, HashMap::new()).await;
    }

    /// Runs one phase to completion and reports how the task-level loop
    /// should proceed.
    #[instrument(skip(self, config, model, prior_results), fields(phase = phase_index + 1))]
    async fn run_phase(
        self: &Arc<Self>,
        task_id: Uuid,
        phase_index: usize,
        config: &ModeConfig,
        model: &ModelDescriptor,
        prior_results: &mut HashMap<AgentType, AgentResult>,
    ) -> PhaseOutcome {
        let started = Instant::now();
        let phase_number = (phase_index + 1) as u32;

        self.set_phase_status(task_id, phase_index, PhaseStatus::Running).await;
        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.current_phase = phase_number as usize;
            }
        }
        self.emit(
            task_id,
            EventType::PhaseStarted,
            HashMap::from([("phase".to_string(), Value::from(phase_number))]),
        )
        .await;

        let subtasks = {
            let tasks = self.tasks.read().await;
            tasks[&task_id].phases[phase_index].subtasks.clone()
        };
        let (parallel, required) = {
            let tasks = self.tasks.read().await;
            let p = &tasks[&task_id].phases[phase_index];
            (p.parallel, p.required)
        };

        if subtasks.is_empty() {
            self.finish_phase(task_id, phase_index, PhaseStatus::Completed, started).await;
            return PhaseOutcome::Continue;
        }

        // Resolve the phase's agent-type dependency levels through the
        // registry (SPEC_FULL.md 4.1b/4.3) in addition to the plan's own
        // explicit per-subtask `dependencies`, so two subtasks whose agent
        // types have a declared dependency (e.g. `implement` on
        // `architect`) never run concurrently even when the strategy that
        // built this phase didn't spell out that edge by subtask id.
        let agent_types: Vec<AgentType> = {
            let mut seen = HashSet::new();
            subtasks
                .iter()
                .filter(|s| seen.insert(s.agent_type))
                .map(|s| s.agent_type)
                .collect()
        };
        let levels = match self.registry.execution_order(&agent_types) {
            Ok(levels) => levels,
            Err(err) => {
                let message = format!("unresolvable agent dependency graph: {err}");
                return if required {
                    self.finish_phase(task_id, phase_index, PhaseStatus::Failed, started).await;
                    PhaseOutcome::RequiredPhaseFailed { message, agent: subtasks[0].agent_type }
                } else {
                    self.finish_phase(task_id, phase_index, PhaseStatus::Skipped, started).await;
                    PhaseOutcome::Continue
                };
            }
        };
        let level_of: HashMap<AgentType, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |ty| (*ty, i)))
            .collect();

        let known_ids: HashSet<Uuid> = subtasks.iter().map(|s| s.id).collect();
        let mut queue: TaskQueue<Subtask> = TaskQueue::new();
        for subtask in &subtasks {
            // Dependencies on an earlier phase's subtasks are trivially
            // satisfied already (phases run sequentially); in-phase
            // dependencies come from the plan's explicit `dependencies`
            // plus every other subtask whose agent type sits in an earlier
            // execution level.
            let my_level = level_of.get(&subtask.agent_type).copied().unwrap_or(0);
            let mut deps: HashSet<Uuid> = subtask
                .dependencies
                .iter()
                .copied()
                .filter(|d| known_ids.contains(d))
                .collect();
            for other in &subtasks {
                if other.id == subtask.id {
                    continue;
                }
                let other_level = level_of.get(&other.agent_type).copied().unwrap_or(0);
                if other_level < my_level {
                    deps.insert(other.id);
                }
            }
            queue.add_task(subtask.id, deps.into_iter().collect(), subtask.clone());
        }

        let cancel_rx = self.cancel_receiver(task_id).await;

        while queue.remaining() > 0 {
            if *cancel_rx.borrow() {
                return PhaseOutcome::Cancelled;
            }

            let available: Vec<Uuid> = queue.available_tasks().into_iter().copied().collect();
            if available.is_empty() {
                // Dependents of an already-failed subtask never unblock;
                // treat the stall as the phase's terminal outcome.
                break;
            }

            let batch: Vec<Subtask> =
                available.iter().filter_map(|id| queue.get(id).cloned()).collect();

            let results: Vec<(Subtask, Result<AgentResult, AgentResult>)> = if parallel {
                let futures = batch.into_iter().map(|subtask| {
                    let this = self.clone();
                    let model = model.clone();
                    let prior = prior_results.clone();
                    let max_retries = config.max_retries;
                    let task_timeout = config.task_timeout;
                    async move {
                        let result = this
                            .run_subtask_with_retries(
                                task_id, phase_number, &subtask, &model, &prior, max_retries,
                                task_timeout,
                            )
                            .await;
                        (subtask, result)
                    }
                });
                futures::future::join_all(futures).await
            } else {
                let mut out = Vec::new();
                for subtask in batch {
                    let result = self
                        .run_subtask_with_retries(
                            task_id,
                            phase_number,
                            &subtask,
                            model,
                            prior_results,
                            config.max_retries,
                            config.task_timeout,
                        )
                        .await;
                    out.push((subtask, result));
                }
                out
            };

            let mut any_failure = false;
            let mut failure_info: Option<(String, AgentType)> = None;

            for (subtask, outcome) in results {
                match outcome {
                    Ok(result) => {
                        self.record_subtask_success(task_id, phase_index, &subtask, &result).await;
                        prior_results.insert(subtask.agent_type, result.clone());
                        queue.mark_completed(subtask.id);

                        if let Some(cap) = config.cost_limit {
                            let spent = self.tasks.read().await[&task_id].cost;
                            if cap_exceeded(spent, Some(cap)) {
                                return PhaseOutcome::CostExceeded { spent, cap };
                            }
                        }
                    }
                    Err(result) => {
                        self.record_subtask_failure(task_id, phase_index, &subtask, &result).await;
                        any_failure = true;
                        failure_info.get_or_insert((
                            result.error.clone().unwrap_or_default(),
                            subtask.agent_type,
                        ));
                    }
                }
            }

            if any_failure {
                // A failure observed while cancellation was requested is
                // the cancellation cascading through running subtasks
                // (SPEC_FULL.md 5, 7), not a provider/validation failure —
                // report it as such rather than failing the task.
                if *cancel_rx.borrow() {
                    return PhaseOutcome::Cancelled;
                }
                if required {
                    self.finish_phase(task_id, phase_index, PhaseStatus::Failed, started).await;
                    let (message, agent) = failure_info.unwrap();
                    return PhaseOutcome::RequiredPhaseFailed { message, agent };
                } else {
                    self.finish_phase(task_id, phase_index, PhaseStatus::Skipped, started).await;
                    return PhaseOutcome::Continue;
                }
            }
        }

        self.finish_phase(task_id, phase_index, PhaseStatus::Completed, started).await;
        PhaseOutcome::Continue
    }

    /// Submits `subtask` to the worker pool, retrying in place while the
    /// failure is retryable and `mode.maxRetries` allows it (SPEC_FULL.md
    /// 4.1f, 7). Returns `Ok` on eventual success, `Err` on a terminal
    /// failure.
    #[instrument(
        skip(self, subtask, model, prior_results, task_timeout),
        fields(agent_type = %subtask.agent_type, subtask_id = %subtask.id)
    )]
    async fn run_subtask_with_retries(
        &self,
        task_id: Uuid,
        phase_number: u32,
        subtask: &Subtask,
        model: &ModelDescriptor,
        prior_results: &HashMap<AgentType, AgentResult>,
        max_retries: u32,
        task_timeout: Duration,
    ) -> Result<AgentResult, AgentResult> {
        let mut attempt = 0u32;
        loop {
            self.emit(
                task_id,
                EventType::AgentStarted,
                HashMap::from([(
                    "agentType".to_string(),
                    Value::String(subtask.agent_type.to_string()),
                )]),
            )
            .await;

            let cancel_rx = self.cancel_receiver(task_id).await;
            let progress = ProgressReporter::new(self.bus.clone(), task_id, subtask.agent_type);
            let task = AgentTask {
                task_id,
                phase_number,
                subtask_id: subtask.id,
                description: subtask.description.clone(),
                context: subtask.input.clone(),
                model: model.clone(),
                progress,
                cancel: cancel_rx,
            };

            let result = self
                .pool
                .submit(subtask.agent_type, task, prior_results, task_timeout)
                .await
                .unwrap_or_else(|e| AgentResult::failure(e.to_string()));

            // Every attempt billed the provider something, win or lose —
            // record it now rather than only the attempt this loop
            // eventually returns (SPEC_FULL.md 4.1g, 7: cost accounting
            // includes retried calls).
            self.record_attempt(task_id, phase_number, &result).await;

            if result.success {
                self.emit(
                    task_id,
                    EventType::AgentCompleted,
                    HashMap::from([(
                        "agentType".to_string(),
                        Value::String(subtask.agent_type.to_string()),
                    )]),
                )
                .await;
                return Ok(result);
            }

            self.emit(
                task_id,
                EventType::AgentFailed,
                HashMap::from([
                    ("agentType".to_string(), Value::String(subtask.agent_type.to_string())),
                    (
                        "error".to_string(),
                        Value::String(result.error.clone().unwrap_or_default()),
                    ),
                ]),
            )
            .await;

            if result.retryable && attempt < max_retries {
                tokio::time::sleep(backoff_duration(attempt)).await;
                attempt += 1;
                continue;
            }
            return Err(result);
        }
    }

    /// Folds one attempt's tokens/cost/files into the task total,
    /// regardless of whether the attempt ultimately succeeded. Called once
    /// per attempt from `run_subtask_with_retries`, so a subtask retried
    /// twice before succeeding contributes three attempts' worth of cost.
    async fn record_attempt(&self, task_id: Uuid, phase_number: u32, result: &AgentResult) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            task.record_result(phase_number, result.clone());
        }
    }

    async fn set_phase_status(&self, task_id: Uuid, phase_index: usize, status: PhaseStatus) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            task.phases[phase_index].status = status;
        }
    }

    async fn finish_phase(
        &self,
        task_id: Uuid,
        phase_index: usize,
        status: PhaseStatus,
        started: Instant,
    ) {
        let duration = started.elapsed();
        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.phases[phase_index].status = status;
                task.phases[phase_index].duration = Some(duration);
            }
        }
        let event_type = match status {
            PhaseStatus::Completed => EventType::PhaseCompleted,
            PhaseStatus::Failed => EventType::PhaseFailed,
            PhaseStatus::Skipped => EventType::PhaseSkipped,
            _ => EventType::PhaseCompleted,
        };
        self.emit(
            task_id,
            event_type,
            HashMap::from([
                ("phase".to_string(), Value::from((phase_index + 1) as u64)),
                ("durationMs".to_string(), Value::from(duration.as_millis() as u64)),
            ]),
        )
        .await;
    }

    /// Updates the subtask's own status/output. Token/cost/file accounting
    /// already happened per-attempt in `record_attempt`; this only tracks
    /// the subtask's final disposition, not its resource usage.
    async fn record_subtask_success(
        &self,
        task_id: Uuid,
        phase_index: usize,
        subtask: &Subtask,
        result: &AgentResult,
    ) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            if let Some(s) = task.phases[phase_index]
                .subtasks
                .iter_mut()
                .find(|s| s.id == subtask.id)
            {
                s.status = SubtaskStatus::Completed;
                s.output = Some(result.clone());
            }
        }
    }

    async fn record_subtask_failure(
        &self,
        task_id: Uuid,
        phase_index: usize,
        subtask: &Subtask,
        result: &AgentResult,
    ) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            if let Some(s) = task.phases[phase_index]
                .subtasks
                .iter_mut()
                .find(|s| s.id == subtask.id)
            {
                s.status = SubtaskStatus::Failed;
                s.output = Some(result.clone());
            }
        }
    }
}

enum PhaseOutcome {
    Continue,
    Cancelled,
    CostExceeded { spent: Decimal, cap: Decimal },
    RequiredPhaseFailed { message: String, agent: AgentType },
}

/// Every subtask's dependency id must reference a subtask id present
/// somewhere in the plan (SPEC_FULL.md 4.1, `invalid_plan`).
fn validate_plan(phases: &[Phase]) -> Result<(), String> {
    let all_ids: HashSet<Uuid> = phases.iter().flat_map(|p| p.subtasks.iter().map(|s| s.id)).collect();
    for phase in phases {
        for subtask in &phase.subtasks {
            for dep in &subtask.dependencies {
                if !all_ids.contains(dep) {
                    return Err(format!(
                        "subtask {} depends on unknown subtask {}",
                        subtask.id, dep
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ReferenceAgent;
    use crate::event_store::InMemoryEventStore;
    use crate::provider::{AiProvider, EchoProvider};
    use async_trait::async_trait;

    async fn new_orchestrator() -> Arc<Orchestrator> {
        let bus = Arc::new(EventBus::new(64));
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let registry = Arc::new(AgentRegistry::new(4, bus.clone()));
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        for ty in [
            AgentType::Concept,
            AgentType::Architect,
            AgentType::Implement,
            AgentType::Test,
            AgentType::Review,
            AgentType::Security,
            AgentType::Docs,
            AgentType::Deploy,
            AgentType::Optimize,
        ] {
            registry
                .register(Arc::new(ReferenceAgent::new(ty, provider.clone())))
                .await
                .unwrap();
        }
        Orchestrator::new(OrchestratorConfig::default(), bus, store, registry)
    }

    #[tokio::test]
    async fn submit_rejects_empty_description() {
        let orch = new_orchestrator().await;
        let err = orch.submit("   ", None, Some(Mode::Speed), 50).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn submit_rejects_priority_out_of_range() {
        let orch = new_orchestrator().await;
        let err = orch.submit("fix typo", None, Some(Mode::Speed), 150).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn speed_task_runs_to_completion() {
        let orch = new_orchestrator().await;
        let id = orch.submit("fix typo in header", None, Some(Mode::Speed), 50).await.unwrap();

        for _ in 0..200 {
            let task = orch.get(id).await.unwrap();
            if task.status.is_terminal() {
                assert_eq!(task.status, TaskStatus::Completed);
                assert!(task.tokens_used.total() > 0);
                assert!(task.results_keys_are_prefix());
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn cancel_on_terminal_task_is_a_noop() {
        let orch = new_orchestrator().await;
        let id = orch.submit("fix typo", None, Some(Mode::Speed), 50).await.unwrap();
        for _ in 0..200 {
            if orch.get(id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(orch.cancel(id).await.is_ok());
    }

    #[tokio::test]
    async fn retry_is_only_legal_from_failed() {
        let orch = new_orchestrator().await;
        let id = orch.submit("fix typo", None, Some(Mode::Speed), 50).await.unwrap();
        // Task starts in `pending`/`analyzing`, not `failed` yet.
        let err = orch.retry(id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRetryable(_)));
    }

    #[tokio::test]
    async fn quality_task_pauses_for_approval_then_resumes() {
        let orch = new_orchestrator().await;
        let id = orch
            .submit("add biorhythm calculator UI with translations", None, Some(Mode::Quality), 50)
            .await
            .unwrap();

        let mut saw_paused = false;
        for _ in 0..200 {
            let task = orch.get(id).await.unwrap();
            if task.status == TaskStatus::Paused {
                saw_paused = true;
                break;
            }
            if task.status.is_terminal() {
                panic!("task reached a terminal state without pausing for approval");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saw_paused, "task never reached paused awaiting approval");

        orch.approve(id).await.unwrap();

        for _ in 0..400 {
            let task = orch.get(id).await.unwrap();
            if task.status.is_terminal() {
                assert_eq!(task.status, TaskStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task did not reach a terminal state after approval");
    }

    #[tokio::test]
    async fn approve_on_non_paused_task_is_rejected() {
        let orch = new_orchestrator().await;
        let id = orch.submit("fix typo", None, Some(Mode::Speed), 50).await.unwrap();
        let err = orch.approve(id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotPaused(_)));
    }

    #[tokio::test]
    async fn get_unknown_task_is_not_found() {
        let orch = new_orchestrator().await;
        let err = orch.get(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// Fails its first `remaining` calls with a retryable provider error,
    /// then delegates to a plain `EchoProvider`.
    struct FlakyProvider {
        inner: EchoProvider,
        remaining: std::sync::atomic::AtomicU32,
    }

    impl FlakyProvider {
        fn new(fail_times: u32) -> Self {
            Self {
                inner: EchoProvider::new(),
                remaining: std::sync::atomic::AtomicU32::new(fail_times),
            }
        }
    }

    #[async_trait]
    impl AiProvider for FlakyProvider {
        async fn generate(
            &self,
            prompt: &str,
            opts: &crate::provider::GenerateOptions,
        ) -> Result<crate::provider::GenerateResult, crate::errors::ProviderError> {
            let still_flaky = self
                .remaining
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| n.checked_sub(1),
                )
                .is_ok();
            if still_flaky {
                return Err(crate::errors::ProviderError::RateLimited(
                    "simulated throttle".to_string(),
                ));
            }
            self.inner.generate(prompt, opts).await
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            opts: &crate::provider::GenerateOptions,
        ) -> Result<
            futures::stream::BoxStream<'static, crate::provider::StreamChunk>,
            crate::errors::ProviderError,
        > {
            self.inner.generate_stream(prompt, opts).await
        }

        fn list_models(&self) -> Vec<crate::provider::ModelInfo> {
            self.inner.list_models()
        }

        async fn health_check(&self) -> crate::provider::HealthStatus {
            self.inner.health_check().await
        }
    }

    /// Delays every call by `delay` before delegating to a plain
    /// `EchoProvider`, giving a test a deterministic window to observe an
    /// in-flight subtask.
    struct SlowProvider {
        inner: EchoProvider,
        delay: Duration,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self { inner: EchoProvider::new(), delay }
        }
    }

    #[async_trait]
    impl AiProvider for SlowProvider {
        async fn generate(
            &self,
            prompt: &str,
            opts: &crate::provider::GenerateOptions,
        ) -> Result<crate::provider::GenerateResult, crate::errors::ProviderError> {
            tokio::time::sleep(self.delay).await;
            self.inner.generate(prompt, opts).await
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            opts: &crate::provider::GenerateOptions,
        ) -> Result<
            futures::stream::BoxStream<'static, crate::provider::StreamChunk>,
            crate::errors::ProviderError,
        > {
            self.inner.generate_stream(prompt, opts).await
        }

        fn list_models(&self) -> Vec<crate::provider::ModelInfo> {
            self.inner.list_models()
        }

        async fn health_check(&self) -> crate::provider::HealthStatus {
            self.inner.health_check().await
        }
    }

    /// Like `new_orchestrator`, but `overrides` swaps in a different
    /// provider for specific agent types (everything else still gets a
    /// plain `EchoProvider`).
    async fn new_orchestrator_with(
        overrides: Vec<(AgentType, Arc<dyn AiProvider>)>,
    ) -> Arc<Orchestrator> {
        let bus = Arc::new(EventBus::new(64));
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let registry = Arc::new(AgentRegistry::new(4, bus.clone()));
        let echo: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        for ty in [
            AgentType::Concept,
            AgentType::Architect,
            AgentType::Implement,
            AgentType::Test,
            AgentType::Review,
            AgentType::Security,
            AgentType::Docs,
            AgentType::Deploy,
            AgentType::Optimize,
            AgentType::LanguageExpert(crate::domain::phase::LanguageExpertKind::TypeScript),
        ] {
            let provider = overrides
                .iter()
                .find(|(t, _)| *t == ty)
                .map(|(_, p)| p.clone())
                .unwrap_or_else(|| echo.clone());
            registry.register(Arc::new(ReferenceAgent::new(ty, provider))).await.unwrap();
        }
        Orchestrator::new(OrchestratorConfig::default(), bus, store, registry)
    }

    async fn wait_terminal(orch: &Arc<Orchestrator>, id: Uuid) -> Task {
        for _ in 0..400 {
            let task = orch.get(id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task did not reach a terminal state in time");
    }

    // Scenario 3 (retry then succeed / retries exhausted).

    #[tokio::test]
    async fn autonomy_retries_a_flaky_agent_then_completes() {
        let provider: Arc<dyn AiProvider> = Arc::new(FlakyProvider::new(2));
        let orch = new_orchestrator_with(vec![(AgentType::Test, provider)]).await;
        let id = orch
            .submit("implement the retry handling", None, Some(Mode::Autonomy), 50)
            .await
            .unwrap();

        for _ in 0..200 {
            if orch.get(id).await.unwrap().status == TaskStatus::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orch.approve(id).await.unwrap();

        let task = wait_terminal(&orch, id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        let test_attempts = task.results.get(&4).expect("phase 4 recorded attempts");
        assert_eq!(test_attempts.len(), 3);
        assert!(!test_attempts[0].success);
        assert!(!test_attempts[1].success);
        assert!(test_attempts[2].success);
    }

    #[tokio::test]
    async fn autonomy_fails_task_once_retries_are_exhausted() {
        let provider: Arc<dyn AiProvider> = Arc::new(FlakyProvider::new(10));
        let orch = new_orchestrator_with(vec![(AgentType::Test, provider)]).await;
        orch.mode_manager()
            .update_config(
                Mode::Autonomy,
                crate::mode::ModeConfigPatch { max_retries: Some(1), ..Default::default() },
            )
            .await;
        let id = orch
            .submit("implement the retry handling", None, Some(Mode::Autonomy), 50)
            .await
            .unwrap();

        for _ in 0..200 {
            if orch.get(id).await.unwrap().status == TaskStatus::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orch.approve(id).await.unwrap();

        let task = wait_terminal(&orch, id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        let test_attempts = task.results.get(&4).expect("phase 4 recorded attempts");
        assert_eq!(test_attempts.len(), 2);
        assert!(test_attempts.iter().all(|r| !r.success));
        let err = task.errors.last().expect("a terminal error was recorded");
        assert_eq!(err.kind, ErrorKind::Provider);
        assert_eq!(err.phase, Some(4));
        assert_eq!(err.agent, Some(AgentType::Test));
    }

    // Scenario 4 (cost cap exceeded).

    #[tokio::test]
    async fn cost_mode_fails_task_when_cap_exceeded() {
        let orch = new_orchestrator().await;
        orch.mode_manager()
            .update_config(
                Mode::Cost,
                crate::mode::ModeConfigPatch {
                    cost_limit: Some(Some(Decimal::new(1, 2))),
                    ..Default::default()
                },
            )
            .await;

        let description = format!("refactor {}", "x".repeat(8_000));
        let id = orch.submit(description, None, Some(Mode::Cost), 50).await.unwrap();

        let task = wait_terminal(&orch, id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.cost > Decimal::new(1, 2));
        let err = task.errors.last().expect("a terminal error was recorded");
        assert_eq!(err.kind, ErrorKind::CostExceeded);
        assert_eq!(err.phase, Some(1));
        // Phase 2 ("test") never started.
        assert_eq!(task.phases[1].status, PhaseStatus::Pending);
        assert!(!task.results.contains_key(&2));
    }

    // Scenario 5 (mode switch mid-flight).

    #[tokio::test]
    async fn in_flight_task_keeps_its_submit_time_mode_across_a_switch() {
        let provider: Arc<dyn AiProvider> = Arc::new(SlowProvider::new(Duration::from_millis(300)));
        let orch = new_orchestrator_with(vec![(AgentType::Implement, provider)]).await;

        let speed_id =
            orch.submit("fix the header typo", None, Some(Mode::Speed), 50).await.unwrap();

        // Give the slow implement call time to start before switching.
        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.mode_manager().switch_mode(Mode::Quality).await.unwrap();

        let switched_task = wait_terminal(&orch, speed_id).await;
        assert_eq!(switched_task.mode, Mode::Speed);
        assert_eq!(switched_task.phases.len(), 2);

        let quality_id = orch.submit("fix another typo", None, None, 50).await.unwrap();
        let quality_task = {
            let mut task = orch.get(quality_id).await.unwrap();
            for _ in 0..200 {
                if !task.phases.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                task = orch.get(quality_id).await.unwrap();
            }
            task
        };
        assert_eq!(quality_task.mode, Mode::Quality);
        assert_eq!(quality_task.phases.len(), 4);
        orch.cancel(quality_id).await.unwrap();
    }

    // Scenario 6 (cancellation mid-flight).

    #[tokio::test]
    async fn cancel_mid_flight_stops_the_task_without_running_later_phases() {
        let provider: Arc<dyn AiProvider> = Arc::new(SlowProvider::new(Duration::from_millis(500)));
        let orch = new_orchestrator_with(vec![(AgentType::Implement, provider)]).await;

        let id = orch
            .submit("add biorhythm calculator UI with translations", None, Some(Mode::Quality), 50)
            .await
            .unwrap();

        for _ in 0..200 {
            if orch.get(id).await.unwrap().status == TaskStatus::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orch.approve(id).await.unwrap();

        for _ in 0..200 {
            if orch.get(id).await.unwrap().current_phase == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        orch.cancel(id).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let task = orch.get(id).await.unwrap();
            if task.status.is_terminal() {
                assert_eq!(task.status, TaskStatus::Cancelled);
                break;
            }
            assert!(Instant::now() < deadline, "task did not cancel within 5s");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let task = orch.get(id).await.unwrap();
        assert!(!task.results.contains_key(&3));
        assert!(!task.results.contains_key(&4));
    }
}
