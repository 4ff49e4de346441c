//! Phase and subtask types: the execution plan a mode strategy produces and
//! the orchestrator walks.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::agent_result::AgentResult;

/// The closed set of agent type tags (SPEC_FULL.md 4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Concept,
    Architect,
    Implement,
    Test,
    Review,
    Optimize,
    Docs,
    Deploy,
    Security,
    Refactor,
    Debug,
    Migrate,
    LanguageExpert(LanguageExpertKind),
}

/// Language-specific implementation experts, a closed sub-enum of
/// `AgentType::LanguageExpert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageExpertKind {
    Rust,
    TypeScript,
    Python,
    Go,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Concept => "concept",
            AgentType::Architect => "architect",
            AgentType::Implement => "implement",
            AgentType::Test => "test",
            AgentType::Review => "review",
            AgentType::Optimize => "optimize",
            AgentType::Docs => "docs",
            AgentType::Deploy => "deploy",
            AgentType::Security => "security",
            AgentType::Refactor => "refactor",
            AgentType::Debug => "debug",
            AgentType::Migrate => "migrate",
            AgentType::LanguageExpert(LanguageExpertKind::Rust) => "language_expert_rust",
            AgentType::LanguageExpert(LanguageExpertKind::TypeScript) => {
                "language_expert_typescript"
            }
            AgentType::LanguageExpert(LanguageExpertKind::Python) => "language_expert_python",
            AgentType::LanguageExpert(LanguageExpertKind::Go) => "language_expert_go",
        }
    }

    /// The fixed-schema context key downstream agents read this type's
    /// output under (`"<agentType>Result"`, SPEC_FULL.md 3.1).
    pub fn result_key(&self) -> String {
        format!("{}Result", self.as_str())
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One unit of work assigned to a single agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub description: String,
    pub agent_type: AgentType,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub input: HashMap<String, Value>,
    #[serde(default)]
    pub output: Option<AgentResult>,
}

impl Subtask {
    pub fn new(description: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            agent_type,
            status: SubtaskStatus::Pending,
            dependencies: Vec::new(),
            input: HashMap::new(),
            output: None,
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.dependencies.extend(ids);
        self
    }
}

/// A group of subtasks executed together, sequentially or in parallel,
/// within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub name: String,
    pub parallel: bool,
    pub required: bool,
    pub status: PhaseStatus,
    pub subtasks: Vec<Subtask>,
    #[serde(default, with = "duration_millis_opt")]
    pub duration: Option<Duration>,
}

impl Phase {
    pub fn new(number: u32, name: impl Into<String>, parallel: bool, required: bool) -> Self {
        Self {
            number,
            name: name.into(),
            parallel,
            required,
            status: PhaseStatus::Pending,
            subtasks: Vec::new(),
            duration: None,
        }
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Subtask>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Every subtask's dependency id must reference a subtask id that is
    /// already present in `known_ids` (i.e. from a strictly earlier phase or
    /// an earlier subtask within this phase's own plan construction).
    pub fn all_dependencies_known(&self, known_ids: &std::collections::HashSet<Uuid>) -> bool {
        self.subtasks
            .iter()
            .flat_map(|s| s.dependencies.iter())
            .all(|dep| known_ids.contains(dep))
    }
}

mod duration_millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}
