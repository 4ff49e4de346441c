//! Reference agents: one implementation per `AgentType` that satisfies the
//! `Agent` contract over the provider abstraction. These are not real
//! compilers/linters/test-runners — SPEC_FULL.md 1 scopes those out — they
//! exist so the orchestrator and mode strategies have something concrete to
//! dispatch to in tests and the CLI's default deployment.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{AgentResult, AgentType};
use crate::provider::{AiProvider, GenerateOptions};

use super::{Agent, AgentCapabilities, AgentTask, ValidationOutcome};

pub struct ReferenceAgent {
    agent_type: AgentType,
    provider: Arc<dyn AiProvider>,
}

impl ReferenceAgent {
    pub fn new(agent_type: AgentType, provider: Arc<dyn AiProvider>) -> Self {
        Self { agent_type, provider }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are the {} agent in a multi-agent development orchestrator. \
             Respond with a concise summary of the work you performed.",
            self.agent_type
        )
    }
}

#[async_trait]
impl Agent for ReferenceAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            name: self.agent_type.to_string(),
            description: format!("Reference {} agent", self.agent_type),
            capabilities: vec![self.agent_type.to_string()],
            inputs: vec!["description".to_string()],
            outputs: vec!["summary".to_string()],
            required_context: Vec::new(),
            estimated_duration_ms: 2_000,
        }
    }

    async fn execute(&self, task: AgentTask) -> AgentResult {
        task.progress.report(0).await;

        if task.is_cancelled() {
            return AgentResult::failure("cancelled");
        }

        let context_summary = task
            .context
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = if context_summary.is_empty() {
            task.description.clone()
        } else {
            format!("{}\n\nPrior results available: {}", task.description, context_summary)
        };

        task.progress.report(25).await;

        let opts = GenerateOptions {
            model: task.model.model.clone(),
            temperature: task.model.temperature,
            max_tokens: task.model.max_tokens,
            stop_sequences: Vec::new(),
            system_prompt: Some(self.system_prompt()),
            timeout: std::time::Duration::from_secs(60),
        };

        let start = Instant::now();
        let generated = match self.provider.generate(&prompt, &opts).await {
            Ok(g) => g,
            Err(err) => {
                let retryable = err.kind().is_retryable();
                return AgentResult::failure(err.to_string()).with_retryable(retryable);
            }
        };

        task.progress.report(75).await;

        if task.is_cancelled() {
            return AgentResult::failure("cancelled");
        }

        let cost = self.provider.estimate_cost(
            generated.tokens_in,
            generated.tokens_out,
            Some(&generated.model),
        );

        let mut output = std::collections::HashMap::new();
        output.insert("summary".to_string(), Value::String(generated.content.clone()));

        let result = AgentResult::success(output, Vec::new())
            .with_duration(start.elapsed())
            .with_tokens(crate::domain::agent_result::TokenUsage {
                input: generated.tokens_in,
                output: generated.tokens_out,
            })
            .with_cost(cost)
            .with_truncated(matches!(
                generated.finish_reason,
                crate::provider::FinishReason::Length
            ));

        task.progress.report(100).await;
        result
    }

    fn validate(&self, result: &AgentResult) -> ValidationOutcome {
        if !result.is_well_formed() {
            return ValidationOutcome {
                ok: false,
                errors: vec!["success=false requires a non-empty error message".to_string()],
            };
        }
        if result.success && !result.output.contains_key("summary") {
            return ValidationOutcome {
                ok: false,
                errors: vec![format!("{} agent result missing 'summary' output", self.agent_type)],
            };
        }
        ValidationOutcome { ok: true, errors: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ProgressReporter;
    use crate::domain::mode_config::ModelDescriptor;
    use crate::event_bus::EventBus;
    use crate::provider::EchoProvider;
    use std::collections::HashMap;
    use tokio::sync::watch;
    use uuid::Uuid;

    #[tokio::test]
    async fn reference_agent_produces_summary_output() {
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        let agent = ReferenceAgent::new(AgentType::Implement, provider);
        let (_tx, rx) = watch::channel(false);
        let bus = Arc::new(EventBus::new(16));
        let task = AgentTask {
            task_id: Uuid::new_v4(),
            phase_number: 1,
            subtask_id: Uuid::new_v4(),
            description: "implement the thing".to_string(),
            context: HashMap::new(),
            model: ModelDescriptor::new("local", "echo-local", 0.0, 100),
            progress: ProgressReporter::new(bus, Uuid::new_v4(), AgentType::Implement),
            cancel: rx,
        };
        let result = agent.execute(task).await;
        assert!(result.success);
        assert!(result.output.contains_key("summary"));
    }

    #[tokio::test]
    async fn cancelled_task_fails_fast() {
        let provider: Arc<dyn AiProvider> = Arc::new(EchoProvider::new());
        let agent = ReferenceAgent::new(AgentType::Test, provider);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let bus = Arc::new(EventBus::new(16));
        let task = AgentTask {
            task_id: Uuid::new_v4(),
            phase_number: 1,
            subtask_id: Uuid::new_v4(),
            description: "test the thing".to_string(),
            context: HashMap::new(),
            model: ModelDescriptor::new("local", "echo-local", 0.0, 100),
            progress: ProgressReporter::new(bus, Uuid::new_v4(), AgentType::Test),
            cancel: rx,
        };
        let result = agent.execute(task).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }
}
