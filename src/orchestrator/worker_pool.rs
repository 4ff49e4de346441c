//! Bounded worker pool hosting subtask execution (SPEC_FULL.md 4.6).
//!
//! Queues FIFO on the same `Semaphore` permits the `AgentRegistry` uses for
//! its own direct-call cap check (SPEC_FULL.md 5.1) — `WorkerPool::submit`
//! blocks on `acquire` rather than failing fast on `try_acquire`, so a burst
//! of ready subtasks queues instead of being rejected. Each submission gets
//! a hard wall-clock timeout; on expiry the subtask fails with `timeout`
//! rather than being retried in place (the orchestrator's retry loop
//! decides whether to resubmit).

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentRegistry, AgentResult, AgentTask};
use crate::domain::AgentType;
use crate::errors::AgentError;
use tracing::instrument;

pub struct WorkerPool {
    registry: Arc<AgentRegistry>,
}

impl WorkerPool {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Acquire a slot (queuing FIFO if the pool is saturated), run the
    /// agent with `timeout` as a hard wall-clock budget, and release the
    /// slot whether or not the agent itself returned in time.
    #[instrument(skip(self, task, prior_results), fields(task_id = %task.task_id, agent_type = %agent_type))]
    pub async fn submit(
        &self,
        agent_type: AgentType,
        task: AgentTask,
        prior_results: &std::collections::HashMap<AgentType, AgentResult>,
        timeout: Duration,
    ) -> Result<AgentResult, AgentError> {
        let permit = self
            .registry
            .semaphore()
            .acquire_owned()
            .await
            .expect("registry semaphore is never closed");

        let subtask_id = task.subtask_id;
        let run = self.registry.run_registered(agent_type, task, prior_results);
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => AgentResult::failure(format!(
                "subtask {subtask_id} timed out after {}ms",
                timeout.as_millis()
            )),
        };
        drop(permit);
        Ok(result)
    }
}
