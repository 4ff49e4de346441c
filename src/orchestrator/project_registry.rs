//! In-memory project bookkeeping (SPEC_FULL.md 3.1). Guarded the same way
//! as the agent registry's active-agents set: one lock, mutated only by
//! the CRUD operations below.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::Project;
use crate::errors::OrchestratorError;

#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<HashMap<Uuid, Project>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, name: impl Into<String>, root: impl Into<std::path::PathBuf>) -> Project {
        let project = Project::new(name, root);
        self.projects.write().await.insert(project.id, project.clone());
        project
    }

    pub async fn get(&self, id: Uuid) -> Result<Project, OrchestratorError> {
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::ProjectNotFound(id))
    }

    pub async fn list(&self) -> Vec<Project> {
        self.projects.read().await.values().cloned().collect()
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        self.projects.write().await.remove(&id).is_some()
    }
}
