//! The four baseline mode strategies (SPEC_FULL.md 4.2) plus the closed
//! keyword table that classifies a task description's complexity.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::mode_config::{
    DecompositionDepth, Mode, ModeConfig, ModelDescriptor, ParallelizationLevel, ValidationConfig,
    ValidationDepth,
};
use crate::domain::phase::{AgentType, LanguageExpertKind, Phase, Subtask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

/// Orchestrator::analyze's closed keyword table (SPEC_FULL.md 4.1).
pub fn classify_complexity(description: &str) -> Complexity {
    let lower = description.to_lowercase();
    const COMPLEX: &[&str] = &["refactor", "architecture", "migrate", "redesign"];
    const MEDIUM: &[&str] = &["add", "create", "implement", "feature"];
    const SIMPLE: &[&str] = &["fix", "update", "change", "modify", "rename", "remove"];

    if COMPLEX.iter().any(|kw| lower.contains(kw)) {
        Complexity::Complex
    } else if MEDIUM.iter().any(|kw| lower.contains(kw)) {
        Complexity::Medium
    } else if SIMPLE.iter().any(|kw| lower.contains(kw)) {
        Complexity::Simple
    } else {
        Complexity::Medium
    }
}

#[derive(Debug, Clone)]
pub struct AgentSelection {
    pub primary: AgentType,
    pub secondary: Vec<AgentType>,
    pub skip: Vec<AgentType>,
}

/// Whether the description mentions UI/translation work, the one
/// description-sensitive branch in the baseline plans (QUALITY phase 2).
fn mentions_ui_or_translation(description: &str) -> bool {
    let lower = description.to_lowercase();
    ["ui", "translation", "multilingual"]
        .iter()
        .any(|kw| lower.contains(kw))
}

pub trait ModeStrategy: Send + Sync {
    fn decompose(&self, description: &str, complexity: Complexity) -> Vec<Phase>;
    fn select_agents(&self, description: &str) -> AgentSelection;
    fn validation_config(&self) -> ValidationConfig;
    fn select_model(&self, complexity: Complexity) -> ModelDescriptor;

    /// COST is the only mode with a non-trivial budget gate; other modes
    /// always continue.
    fn should_continue(&self, _current_cost: Decimal) -> bool {
        true
    }
}

fn cloud_model(model: &str, temperature: f32, max_tokens: u32) -> ModelDescriptor {
    ModelDescriptor::new("cloud", model, temperature, max_tokens)
}

fn local_model(max_tokens: u32) -> ModelDescriptor {
    ModelDescriptor::new("local", "echo-local", 0.2, max_tokens)
}

pub struct SpeedStrategy;

impl ModeStrategy for SpeedStrategy {
    fn decompose(&self, description: &str, _complexity: Complexity) -> Vec<Phase> {
        vec![
            Phase::new(1, "implement", true, true)
                .with_subtasks(vec![Subtask::new(description, AgentType::Implement)]),
            Phase::new(2, "verify", false, false)
                .with_subtasks(vec![Subtask::new("verify build", AgentType::Test)]),
        ]
    }

    fn select_agents(&self, _description: &str) -> AgentSelection {
        AgentSelection {
            primary: AgentType::Implement,
            secondary: vec![AgentType::Test],
            skip: vec![AgentType::Review, AgentType::Security, AgentType::Docs],
        }
    }

    fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            build: true,
            ..Default::default()
        }
    }

    fn select_model(&self, _complexity: Complexity) -> ModelDescriptor {
        cloud_model("speed-primary", 0.3, 4096)
    }
}

pub struct QualityStrategy;

impl ModeStrategy for QualityStrategy {
    fn decompose(&self, description: &str, _complexity: Complexity) -> Vec<Phase> {
        let mut implement_subtasks = vec![Subtask::new(description, AgentType::Implement)];
        if mentions_ui_or_translation(description) {
            implement_subtasks.push(Subtask::new(
                "translate UI strings",
                AgentType::LanguageExpert(LanguageExpertKind::TypeScript),
            ));
        }

        let concept = Subtask::new("clarify intent", AgentType::Concept);
        let architect =
            Subtask::new("design architecture", AgentType::Architect).depends_on([concept.id]);

        vec![
            Phase::new(1, "concept_architect", false, true)
                .with_subtasks(vec![concept, architect]),
            Phase::new(2, "implement", true, true).with_subtasks(implement_subtasks),
            Phase::new(3, "test_review_security", true, true).with_subtasks(vec![
                Subtask::new("run tests", AgentType::Test),
                Subtask::new("code review", AgentType::Review),
                Subtask::new("security scan", AgentType::Security),
            ]),
            Phase::new(4, "docs", false, true)
                .with_subtasks(vec![Subtask::new("write docs", AgentType::Docs)]),
        ]
    }

    fn select_agents(&self, description: &str) -> AgentSelection {
        let mut secondary = vec![
            AgentType::Concept,
            AgentType::Architect,
            AgentType::Test,
            AgentType::Review,
            AgentType::Security,
            AgentType::Docs,
        ];
        if mentions_ui_or_translation(description) {
            secondary.push(AgentType::LanguageExpert(LanguageExpertKind::TypeScript));
        }
        AgentSelection {
            primary: AgentType::Implement,
            secondary,
            skip: Vec::new(),
        }
    }

    fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            typecheck: true,
            lint: true,
            build: true,
            tests: true,
            require_review: true,
            require_security_scan: true,
            min_coverage: Some(0.80),
        }
    }

    fn select_model(&self, _complexity: Complexity) -> ModelDescriptor {
        cloud_model("quality-primary", 0.5, 8192)
    }
}

pub struct AutonomyStrategy;

impl ModeStrategy for AutonomyStrategy {
    fn decompose(&self, description: &str, _complexity: Complexity) -> Vec<Phase> {
        vec![
            Phase::new(1, "analysis", false, true)
                .with_subtasks(vec![Subtask::new("analyze request", AgentType::Concept)]),
            Phase::new(2, "architecture", false, true)
                .with_subtasks(vec![Subtask::new("design architecture", AgentType::Architect)]),
            Phase::new(3, "implementation", true, true)
                .with_subtasks(vec![Subtask::new(description, AgentType::Implement)]),
            Phase::new(4, "testing", false, true)
                .with_subtasks(vec![Subtask::new("run tests", AgentType::Test)]),
            Phase::new(5, "review_security", true, true).with_subtasks(vec![
                Subtask::new("code review", AgentType::Review),
                Subtask::new("security scan", AgentType::Security),
            ]),
            Phase::new(6, "optimization", false, false)
                .with_subtasks(vec![Subtask::new("optimize", AgentType::Optimize)]),
            Phase::new(7, "docs", false, true)
                .with_subtasks(vec![Subtask::new("write docs", AgentType::Docs)]),
            Phase::new(8, "deploy", false, true)
                .with_subtasks(vec![Subtask::new("deploy", AgentType::Deploy)]),
        ]
    }

    fn select_agents(&self, _description: &str) -> AgentSelection {
        AgentSelection {
            primary: AgentType::Implement,
            secondary: vec![
                AgentType::Concept,
                AgentType::Architect,
                AgentType::Test,
                AgentType::Review,
                AgentType::Security,
                AgentType::Docs,
                AgentType::Deploy,
            ],
            skip: Vec::new(),
        }
    }

    fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            typecheck: true,
            lint: true,
            build: true,
            tests: true,
            require_review: true,
            require_security_scan: true,
            min_coverage: Some(0.70),
        }
    }

    fn select_model(&self, complexity: Complexity) -> ModelDescriptor {
        match complexity {
            Complexity::Complex => cloud_model("autonomy-primary", 0.4, 16384),
            _ => local_model(8192),
        }
    }
}

pub struct CostStrategy;

impl ModeStrategy for CostStrategy {
    fn decompose(&self, description: &str, _complexity: Complexity) -> Vec<Phase> {
        vec![
            Phase::new(1, "implement", false, true)
                .with_subtasks(vec![Subtask::new(description, AgentType::Implement)]),
            Phase::new(2, "test", false, false)
                .with_subtasks(vec![Subtask::new("run tests", AgentType::Test)]),
        ]
    }

    fn select_agents(&self, _description: &str) -> AgentSelection {
        AgentSelection {
            primary: AgentType::Implement,
            secondary: vec![AgentType::Test],
            skip: vec![AgentType::Review, AgentType::Security, AgentType::Docs],
        }
    }

    fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            build: true,
            ..Default::default()
        }
    }

    fn select_model(&self, complexity: Complexity) -> ModelDescriptor {
        match complexity {
            Complexity::Complex => cloud_model("cost-cheapest", 0.3, 4096),
            _ => local_model(4096),
        }
    }

    fn should_continue(&self, current_cost: Decimal) -> bool {
        // The caller compares against the mode's configured `cost_limit`;
        // this default (no limit known here) always continues. The
        // orchestrator's cost-cap check (SPEC_FULL.md 4.1g) is what
        // actually enforces the cap — this hook exists for strategies that
        // want to pre-empt before dispatching another subtask.
        let _ = current_cost;
        true
    }
}

/// The baseline `ModeConfig` for each mode (SPEC_FULL.md 3 and 4.2),
/// layered with config file/env overrides by the caller.
pub fn baseline_config(mode: Mode) -> ModeConfig {
    match mode {
        Mode::Speed => ModeConfig {
            mode,
            decomposition_depth: DecompositionDepth::Shallow,
            parallelization: ParallelizationLevel::Aggressive,
            validation_depth: ValidationDepth::Minimal,
            human_approval: false,
            primary_model: cloud_model("speed-primary", 0.3, 4096),
            fallback_model: local_model(4096),
            use_local_models: false,
            required_agents: vec![AgentType::Implement],
            optional_agents: vec![AgentType::Test],
            task_timeout: Duration::from_secs(5 * 60),
            max_retries: 2,
            cost_limit: None,
        },
        Mode::Quality => ModeConfig {
            mode,
            decomposition_depth: DecompositionDepth::Standard,
            parallelization: ParallelizationLevel::Balanced,
            validation_depth: ValidationDepth::Comprehensive,
            human_approval: true,
            primary_model: cloud_model("quality-primary", 0.5, 8192),
            fallback_model: cloud_model("quality-fallback", 0.5, 8192),
            use_local_models: false,
            required_agents: vec![
                AgentType::Concept,
                AgentType::Architect,
                AgentType::Implement,
                AgentType::Test,
                AgentType::Review,
                AgentType::Security,
                AgentType::Docs,
            ],
            optional_agents: Vec::new(),
            task_timeout: Duration::from_secs(30 * 60),
            max_retries: 3,
            cost_limit: None,
        },
        Mode::Autonomy => ModeConfig {
            mode,
            decomposition_depth: DecompositionDepth::Deep,
            parallelization: ParallelizationLevel::Balanced,
            validation_depth: ValidationDepth::Comprehensive,
            human_approval: true,
            primary_model: cloud_model("autonomy-primary", 0.4, 16384),
            fallback_model: local_model(8192),
            use_local_models: true,
            required_agents: vec![
                AgentType::Concept,
                AgentType::Architect,
                AgentType::Implement,
                AgentType::Test,
                AgentType::Review,
                AgentType::Security,
                AgentType::Docs,
                AgentType::Deploy,
            ],
            optional_agents: vec![AgentType::Optimize],
            task_timeout: Duration::from_secs(60 * 60),
            max_retries: 5,
            cost_limit: None,
        },
        Mode::Cost => ModeConfig {
            mode,
            decomposition_depth: DecompositionDepth::Shallow,
            parallelization: ParallelizationLevel::Conservative,
            validation_depth: ValidationDepth::Minimal,
            human_approval: false,
            primary_model: local_model(4096),
            fallback_model: cloud_model("cost-cheapest", 0.3, 4096),
            use_local_models: true,
            required_agents: vec![AgentType::Implement],
            optional_agents: vec![AgentType::Test],
            task_timeout: Duration::from_secs(10 * 60),
            max_retries: 1,
            cost_limit: None,
        },
    }
}
