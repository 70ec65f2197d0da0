//! The session registry: create/get/list/delete/restore/cleanup/upgrade over
//! a set of live [`Session`]s, plus the manager/worker hierarchy queries.
//!
//! Grounded on `agent_session_manager.py`'s `AgentSessionManager`: an
//! in-process `_local_agents` map, `get_agent_workers_by_manager`/
//! `get_agent_managers` hierarchy lookups, a soft-delete that keeps the
//! record around for `restore`, and `cleanup_dead_sessions` sweeping
//! processes that exited without deregistering. The registry's own lock
//! (here, `dashmap`'s per-shard locking) is never held across a model call —
//! every `Session` method that touches the model takes its own lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::{OrchestratorError, Result};

use super::store::PersistenceStore;
use super::{Session, SessionConfig, SessionRecord, SessionRole};
use langgraph_core::llm::ChatModel;
use langgraph_core::workflow_engine::CompiledWorkflow;

struct Entry {
    session: Arc<Session>,
    deleted: bool,
    stopped_at: Option<Instant>,
}

/// How long a soft-deleted session's entry is kept before `cleanup_dead`
/// may reclaim it permanently. Conservative; the spec leaves the exact
/// number unnormative.
const RECLAIM_AFTER: Duration = Duration::from_secs(3600);

/// In-process registry of live agent sessions, keyed by session id.
///
/// A `PersistenceStore` is optional: without one the registry is a pure
/// in-memory map, same as `agent_session_manager.py`'s `_local_agents` before
/// it grew a backing repository. With one, `create`/soft-`delete`/permanent
/// `delete` keep the store's `SessionRecord` in sync so `restore_from_store`
/// can rebuild a session the in-process map no longer holds (after a
/// restart, or eviction by `cleanup_dead`).
#[derive(Default)]
pub struct SessionRegistry {
    entries: DashMap<String, Entry>,
    store: Option<Arc<dyn PersistenceStore>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as `new`, but every create/delete is mirrored to `store` so
    /// `restore_from_store` can reconstruct a session after it's gone from
    /// the in-process map.
    pub fn with_store(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            entries: DashMap::new(),
            store: Some(store),
        }
    }

    /// Create and register a new session. Rejects manager ids that don't
    /// resolve to an existing, non-deleted manager session (§4.C hierarchy
    /// integrity).
    pub async fn create(
        &self,
        config: SessionConfig,
        model: Arc<dyn ChatModel>,
        graph: Option<CompiledWorkflow>,
    ) -> Result<Arc<Session>> {
        if let Some(manager_id) = config.manager_id.clone() {
            let manager = self
                .get(&manager_id)
                .ok_or_else(|| OrchestratorError::NotFound(manager_id.clone()))?;
            if manager.info().await.role != SessionRole::Manager {
                return Err(OrchestratorError::InvalidStateTransition {
                    from: "worker".to_string(),
                    to: format!("{manager_id} is not a manager session"),
                });
            }
        }

        let session = Arc::new(Session::create(config, model, graph));
        let record = session.info().await;
        let id = record.session_id.clone();
        if let Some(store) = &self.store {
            store.save(&record).await?;
        }
        self.entries.insert(
            id,
            Entry {
                session: session.clone(),
                deleted: false,
                stopped_at: None,
            },
        );
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let entry = self.entries.get(session_id)?;
        if entry.deleted {
            return None;
        }
        Some(entry.session.clone())
    }

    pub async fn list(&self) -> Vec<SessionRecord> {
        let sessions: Vec<Arc<Session>> = self
            .entries
            .iter()
            .filter(|e| !e.deleted)
            .map(|e| e.session.clone())
            .collect();
        let mut records = Vec::with_capacity(sessions.len());
        for session in sessions {
            records.push(session.info().await);
        }
        records
    }

    pub async fn list_managers(&self) -> Vec<SessionRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| r.role == SessionRole::Manager)
            .collect()
    }

    pub async fn workers_of(&self, manager_id: &str) -> Vec<SessionRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| r.manager_id.as_deref() == Some(manager_id))
            .collect()
    }

    /// Soft-delete: the session stops accepting work but its record and
    /// entry remain for `restore` until `cleanup_dead` reclaims it.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        session.stop().await;
        if let Some(store) = &self.store {
            store.save(&session.info().await).await?;
        }
        let mut entry = self
            .entries
            .get_mut(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        entry.deleted = true;
        entry.stopped_at = Some(Instant::now());
        Ok(())
    }

    /// Hard delete: remove the entry entirely, regardless of soft-delete
    /// state. Irreversible.
    pub async fn permanent_delete(&self, session_id: &str) -> Result<()> {
        if let Some((_, entry)) = self.entries.remove(session_id) {
            entry.session.stop().await;
            if let Some(store) = &self.store {
                store.delete(session_id).await?;
            }
            Ok(())
        } else {
            Err(OrchestratorError::NotFound(session_id.to_string()))
        }
    }

    /// Un-delete a soft-deleted session. The session itself stays stopped;
    /// only its visibility in `list`/`get` is restored.
    pub fn restore(&self, session_id: &str) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        entry.deleted = false;
        entry.stopped_at = None;
        Ok(())
    }

    /// Rebuild a session from `store` when it's no longer in the in-process
    /// map (after a restart, or after `cleanup_dead` reclaimed its entry).
    /// Same id, same storage path — both come from the persisted record, not
    /// from the caller. The caller still supplies the model adapter and
    /// compiled graph since neither survives a restart.
    pub async fn restore_from_store(
        &self,
        session_id: &str,
        model: Arc<dyn ChatModel>,
        graph: Option<CompiledWorkflow>,
    ) -> Result<Arc<Session>> {
        if let Some(session) = self.get(session_id) {
            return Ok(session);
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        let record = store
            .load(session_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;

        let config = SessionConfig {
            session_id: Some(record.session_id.clone()),
            session_name: record.session_name,
            model_name: record.model_name,
            max_turns: record.max_turns,
            timeout: record.timeout,
            autonomous: record.autonomous,
            max_iterations: record.max_iterations,
            role: record.role,
            manager_id: record.manager_id,
            workflow_id: record.workflow_id,
            storage_path: record.storage_path,
            freshness: None,
        };

        let session = Arc::new(Session::create(config, model, graph));
        let refreshed = session.info().await;
        store.save(&refreshed).await?;
        self.entries.insert(
            session_id.to_string(),
            Entry {
                session: session.clone(),
                deleted: false,
                stopped_at: None,
            },
        );
        Ok(session)
    }

    /// Sweep dead sessions: anything `!is_alive()` whose process exited
    /// without a clean `delete`, plus permanently reclaiming soft-deletes
    /// older than `RECLAIM_AFTER`. Returns the ids removed.
    pub fn cleanup_dead(&self) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|id, entry| {
            let reclaim_soft_delete = entry
                .stopped_at
                .map(|t| t.elapsed() > RECLAIM_AFTER)
                .unwrap_or(false);
            let dead_without_delete = !entry.session.is_alive() && !entry.deleted;
            let keep = !(reclaim_soft_delete || dead_without_delete);
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    /// Upgrade a bare model-only session to a graph-wrapped one in place.
    pub async fn upgrade(&self, session_id: &str, graph: CompiledWorkflow) -> Result<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        session.upgrade(graph).await;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
