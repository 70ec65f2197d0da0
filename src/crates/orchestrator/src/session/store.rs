//! Thin collaborator interfaces the session layer depends on but does not
//! implement: persisted session metadata and persisted workflow definitions.
//! Concrete backends (sqlite, a filesystem tree, etc.) live outside this
//! crate's orchestration core, mirroring how `agent_session_manager.py`
//! delegates storage to a separate repository object rather than embedding
//! SQL in the session manager itself.

use async_trait::async_trait;
use langgraph_core::workflow_engine::Workflow;

use crate::Result;

use super::SessionRecord;

/// Persists `SessionRecord` snapshots so a registry can survive a restart
/// and so `restore` (§4.C) has something to rebuild a `Session` from.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, record: &SessionRecord) -> Result<()>;
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>>;
    async fn delete(&self, session_id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<SessionRecord>>;
}

/// Persists `Workflow` definitions, enforcing that templates
/// (`is_template: true`) are read-only: mutation/delete attempts on a
/// template must fail with `Forbidden` before ever reaching a backend.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, workflow_id: &str) -> Result<Option<Workflow>>;
    async fn list(&self) -> Result<Vec<Workflow>>;
    async fn save(&self, workflow: Workflow) -> Result<()>;
    async fn delete(&self, workflow_id: &str) -> Result<()>;
}

/// Guards a `WorkflowStore` implementation against mutating a template,
/// independent of which concrete backend is behind it.
pub async fn save_guarded(store: &dyn WorkflowStore, workflow: Workflow) -> Result<()> {
    if let Some(existing) = store.get(&workflow.id).await? {
        if existing.is_template {
            return Err(crate::OrchestratorError::Forbidden(format!(
                "workflow {} is a template and cannot be modified",
                workflow.id
            )));
        }
    }
    store.save(workflow).await
}

pub async fn delete_guarded(store: &dyn WorkflowStore, workflow_id: &str) -> Result<()> {
    if let Some(existing) = store.get(workflow_id).await? {
        if existing.is_template {
            return Err(crate::OrchestratorError::Forbidden(format!(
                "workflow {workflow_id} is a template and cannot be deleted"
            )));
        }
    }
    store.delete(workflow_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct InMemoryWorkflowStore {
        workflows: Mutex<Vec<Workflow>>,
    }

    fn template(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "template".into(),
            description: String::new(),
            nodes: vec![],
            edges: vec![],
            is_template: true,
            template_name: Some("builtin".into()),
        }
    }

    #[async_trait]
    impl WorkflowStore for InMemoryWorkflowStore {
        async fn get(&self, workflow_id: &str) -> Result<Option<Workflow>> {
            Ok(self.workflows.lock().unwrap().iter().find(|w| w.id == workflow_id).cloned())
        }
        async fn list(&self) -> Result<Vec<Workflow>> {
            Ok(self.workflows.lock().unwrap().clone())
        }
        async fn save(&self, workflow: Workflow) -> Result<()> {
            let mut guard = self.workflows.lock().unwrap();
            guard.retain(|w| w.id != workflow.id);
            guard.push(workflow);
            Ok(())
        }
        async fn delete(&self, workflow_id: &str) -> Result<()> {
            self.workflows.lock().unwrap().retain(|w| w.id != workflow_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn template_mutation_is_forbidden() {
        let store = InMemoryWorkflowStore {
            workflows: Mutex::new(vec![template("wf1")]),
        };
        let err = save_guarded(&store, template("wf1")).await.unwrap_err();
        assert!(matches!(err, crate::OrchestratorError::Forbidden(_)));
    }

    #[tokio::test]
    async fn template_delete_is_forbidden() {
        let store = InMemoryWorkflowStore {
            workflows: Mutex::new(vec![template("wf1")]),
        };
        let err = delete_guarded(&store, "wf1").await.unwrap_err();
        assert!(matches!(err, crate::OrchestratorError::Forbidden(_)));
    }

    #[tokio::test]
    async fn non_template_saves_freely() {
        let store = InMemoryWorkflowStore {
            workflows: Mutex::new(vec![]),
        };
        let mut wf = template("wf2");
        wf.is_template = false;
        assert!(save_guarded(&store, wf).await.is_ok());
    }
}
