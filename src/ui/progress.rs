//! Renders the orchestrator's domain-event stream to the terminal: one line
//! per task/phase transition, a live progress bar per in-flight agent driven
//! by `agent.progress`.

use std::collections::HashMap;
use std::sync::Mutex;

use console::{Emoji, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::domain::event::{DomainEvent, EventType};

static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✘ ", "[ERR] ");
static ARROW: Emoji<'_, '_> = Emoji("▶ ", "> ");
static SKIP: Emoji<'_, '_> = Emoji("⦿ ", "[SKIP] ");

pub struct EventRenderer {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    verbose: bool,
}

impl EventRenderer {
    pub fn new(verbose: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    fn agent_bar(&self, agent: &str) -> ProgressBar {
        let mut bars = self.bars.lock().expect("bars mutex poisoned");
        bars.entry(agent.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                let style = ProgressStyle::default_bar()
                    .template("  {prefix:.bold.dim} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓░");
                bar.set_style(style);
                bar.set_prefix(agent.to_string());
                bar
            })
            .clone()
    }

    fn take_bar(&self, agent: &str) -> Option<ProgressBar> {
        self.bars.lock().expect("bars mutex poisoned").remove(agent)
    }

    fn str_field<'a>(event: &'a DomainEvent, key: &str) -> &'a str {
        event.data.get(key).and_then(|v| v.as_str()).unwrap_or("?")
    }

    fn u64_field(event: &DomainEvent, key: &str) -> u64 {
        event.data.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Render one event. Safe to call from a loop draining an
    /// `Orchestrator::subscribe` channel.
    pub fn render(&self, event: &DomainEvent) {
        match event.event_type {
            EventType::TaskCreated => {
                println!("{}task {} created", ARROW, event.aggregate_id);
            }
            EventType::TaskStarted => {
                println!("{}task {} started", style(ARROW).cyan(), event.aggregate_id);
            }
            EventType::TaskPaused => {
                println!(
                    "{}task {} paused, awaiting approval",
                    style(SKIP).yellow(),
                    event.aggregate_id
                );
            }
            EventType::TaskResumed => {
                println!("{}task {} resumed", style(ARROW).cyan(), event.aggregate_id);
            }
            EventType::PhaseStarted => {
                let phase = Self::u64_field(event, "phase");
                println!("{}phase {phase} started", style(ARROW).cyan());
            }
            EventType::PhaseCompleted | EventType::PhaseFailed | EventType::PhaseSkipped => {
                let phase = Self::u64_field(event, "phase");
                let duration = Self::u64_field(event, "durationMs");
                let label = match event.event_type {
                    EventType::PhaseCompleted => format!("{}completed", style(CHECK).green()),
                    EventType::PhaseFailed => format!("{}failed", style(CROSS).red()),
                    _ => format!("{}skipped", style(SKIP).yellow()),
                };
                println!("phase {phase} {label} ({duration}ms)");
            }
            EventType::AgentStarted => {
                let agent = Self::str_field(event, "agentType");
                self.agent_bar(agent).set_message("starting".to_string());
            }
            EventType::AgentProgress => {
                let agent = Self::str_field(event, "agentType");
                let pct = Self::u64_field(event, "progress").min(100);
                let bar = self.agent_bar(agent);
                bar.set_position(pct);
                bar.set_message(format!("{pct}%"));
            }
            EventType::AgentCompleted => {
                let agent = Self::str_field(event, "agentType");
                if let Some(bar) = self.take_bar(agent) {
                    bar.finish_with_message(format!("{}done", style(CHECK).green()));
                }
            }
            EventType::AgentFailed => {
                let agent = Self::str_field(event, "agentType");
                let error = Self::str_field(event, "error");
                if let Some(bar) = self.take_bar(agent) {
                    bar.finish_with_message(format!("{}{error}", style(CROSS).red()));
                } else {
                    eprintln!("{}{agent} failed: {error}", style(CROSS).red());
                }
            }
            EventType::AgentLog => {
                if self.verbose {
                    println!("  {}", Self::str_field(event, "message"));
                }
            }
            EventType::ModeSwitching => {
                println!(
                    "{}switching to {}",
                    style(ARROW).yellow(),
                    Self::str_field(event, "target")
                );
            }
            EventType::ModeSwitched => {
                println!("{}now running {}", style(CHECK).green(), Self::str_field(event, "mode"));
            }
            EventType::ModeConfigUpdated => {
                println!(
                    "{}config for {} updated",
                    style(CHECK).green(),
                    Self::str_field(event, "mode")
                );
            }
            EventType::CostIncurred => {
                if self.verbose {
                    println!("  cost +{}", Self::str_field(event, "amount"));
                }
            }
            EventType::CostLimitReached => {
                println!("{}cost limit reached, failing task", style(CROSS).red());
            }
            EventType::TaskCompleted => {
                println!("{}task {} completed", style(CHECK).green(), event.aggregate_id);
            }
            EventType::TaskFailed => {
                println!("{}task {} failed", style(CROSS).red(), event.aggregate_id);
            }
            EventType::TaskCancelled => {
                println!("{}task {} cancelled", style(SKIP).yellow(), event.aggregate_id);
            }
            EventType::SystemStarted | EventType::SystemShutdown | EventType::SystemError => {
                if self.verbose {
                    println!("{}", event.event_type.as_str());
                }
            }
        }
    }
}

impl Default for EventRenderer {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{AggregateType, EventMetadata};
    use chrono::Utc;
    use uuid::Uuid;

    fn event(event_type: EventType, data: HashMap<String, serde_json::Value>) -> DomainEvent {
        DomainEvent {
            id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            aggregate_type: AggregateType::Task,
            event_type,
            data,
            metadata: EventMetadata::default(),
            version: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn rendering_never_panics_across_the_taxonomy() {
        let renderer = EventRenderer::new(true);
        for &ty in EventType::ALL {
            renderer.render(&event(ty, HashMap::new()));
        }
    }

    #[test]
    fn agent_progress_then_completion_clears_the_bar() {
        let renderer = EventRenderer::new(false);
        let mut data = HashMap::new();
        data.insert("agentType".to_string(), serde_json::Value::String("implement".to_string()));
        renderer.render(&event(EventType::AgentStarted, data.clone()));
        assert!(renderer.bars.lock().unwrap().contains_key("implement"));
        renderer.render(&event(EventType::AgentCompleted, data));
        assert!(!renderer.bars.lock().unwrap().contains_key("implement"));
    }
}
