//! Project: a named workspace root that tasks may be associated with.
//!
//! Local bookkeeping only — not an event-sourced aggregate (SPEC_FULL.md
//! 3.1). Held by `ProjectRegistry` in the orchestrator module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub root: std::path::PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            root: root.into(),
            created_at: Utc::now(),
        }
    }
}
