//! Mode Manager: holds the active mode and the four strategy objects that
//! parameterize decomposition, agent selection, validation, and model
//! choice (SPEC_FULL.md 4.2).

pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::mode_config::{Mode, ModeConfig, ModelDescriptor, ValidationConfig};
use crate::domain::phase::{AgentType, Phase};
use crate::errors::ModeError;
use crate::event_bus::{EventBus, PublishOptions};
use crate::domain::event::{AggregateType, EventType};

pub use strategies::{AgentSelection, Complexity, ModeStrategy};

/// A partial override merged onto a mode's baseline config by
/// `ModeManager::update_config`.
#[derive(Debug, Clone, Default)]
pub struct ModeConfigPatch {
    pub human_approval: Option<bool>,
    pub use_local_models: Option<bool>,
    pub max_retries: Option<u32>,
    pub cost_limit: Option<Option<Decimal>>,
    pub task_timeout_secs: Option<u64>,
}

struct ManagerState {
    active: Mode,
    switching: bool,
}

pub struct ModeManager {
    state: RwLock<ManagerState>,
    configs: RwLock<HashMap<Mode, ModeConfig>>,
    strategies: HashMap<Mode, Box<dyn ModeStrategy>>,
    bus: Arc<EventBus>,
}

impl ModeManager {
    pub fn new(bus: Arc<EventBus>, default_mode: Mode) -> Self {
        let mut strategies: HashMap<Mode, Box<dyn ModeStrategy>> = HashMap::new();
        strategies.insert(Mode::Speed, Box::new(strategies::SpeedStrategy));
        strategies.insert(Mode::Quality, Box::new(strategies::QualityStrategy));
        strategies.insert(Mode::Autonomy, Box::new(strategies::AutonomyStrategy));
        strategies.insert(Mode::Cost, Box::new(strategies::CostStrategy));

        let mut configs = HashMap::new();
        for mode in Mode::ALL {
            configs.insert(mode, strategies::baseline_config(mode));
        }

        Self {
            state: RwLock::new(ManagerState {
                active: default_mode,
                switching: false,
            }),
            configs: RwLock::new(configs),
            strategies,
            bus,
        }
    }

    pub async fn active_mode(&self) -> Mode {
        self.state.read().await.active
    }

    pub async fn config(&self, mode: Mode) -> ModeConfig {
        self.configs.read().await.get(&mode).cloned().unwrap_or_else(|| {
            strategies::baseline_config(mode)
        })
    }

    pub async fn all_configs(&self) -> HashMap<Mode, ModeConfig> {
        self.configs.read().await.clone()
    }

    pub fn strategy(&self, mode: Mode) -> &dyn ModeStrategy {
        self.strategies.get(&mode).expect("all modes have a strategy").as_ref()
    }

    /// Switch the active mode. In-progress tasks keep running under the
    /// mode they started with; only newly submitted tasks observe the
    /// switch (enforced by the orchestrator capturing `Mode` at submit
    /// time, not by this method).
    pub async fn switch_mode(&self, target: Mode) -> Result<(), ModeError> {
        {
            let mut state = self.state.write().await;
            if state.switching {
                return Err(ModeError::SwitchInProgress);
            }
            state.switching = true;
        }

        self.bus
            .publish(
                EventType::ModeSwitching,
                HashMap::from([(
                    "target".to_string(),
                    serde_json::Value::String(target.to_string()),
                )]),
                PublishOptions {
                    aggregate_type: Some(AggregateType::Mode),
                    ..Default::default()
                },
            )
            .await;

        {
            let mut state = self.state.write().await;
            state.active = target;
            state.switching = false;
        }

        self.bus
            .publish(
                EventType::ModeSwitched,
                HashMap::from([(
                    "mode".to_string(),
                    serde_json::Value::String(target.to_string()),
                )]),
                PublishOptions {
                    aggregate_type: Some(AggregateType::Mode),
                    ..Default::default()
                },
            )
            .await;
        Ok(())
    }

    /// Merge a partial config into `mode`'s baseline and publish
    /// `mode.config.updated`.
    pub async fn update_config(&self, mode: Mode, patch: ModeConfigPatch) {
        {
            let mut configs = self.configs.write().await;
            let config = configs.entry(mode).or_insert_with(|| strategies::baseline_config(mode));
            if let Some(v) = patch.human_approval {
                config.human_approval = v;
            }
            if let Some(v) = patch.use_local_models {
                config.use_local_models = v;
            }
            if let Some(v) = patch.max_retries {
                config.max_retries = v;
            }
            if let Some(v) = patch.cost_limit {
                config.cost_limit = v;
            }
            if let Some(v) = patch.task_timeout_secs {
                config.task_timeout = std::time::Duration::from_secs(v);
            }
        }

        self.bus
            .publish(
                EventType::ModeConfigUpdated,
                HashMap::from([(
                    "mode".to_string(),
                    serde_json::Value::String(mode.to_string()),
                )]),
                PublishOptions {
                    aggregate_type: Some(AggregateType::Mode),
                    ..Default::default()
                },
            )
            .await;
    }

    pub fn decompose(&self, mode: Mode, description: &str, complexity: Complexity) -> Vec<Phase> {
        self.strategy(mode).decompose(description, complexity)
    }

    pub fn select_agents(&self, mode: Mode, description: &str) -> AgentSelection {
        self.strategy(mode).select_agents(description)
    }

    pub async fn validation_config(&self, mode: Mode) -> ValidationConfig {
        self.strategy(mode).validation_config()
    }

    pub fn select_model(&self, mode: Mode, complexity: Complexity) -> ModelDescriptor {
        self.strategy(mode).select_model(complexity)
    }
}

pub fn classify_complexity(description: &str) -> Complexity {
    strategies::classify_complexity(description)
}
