//! Persistence store (C2): a durable map of `(workflow, key) -> value` for
//! agent memory, task outputs, and plans.
//!
//! Two implementations share one `PersistenceStore` trait: an in-memory
//! default sufficient for tests and the isolation contract, and an optional
//! RocksDB-backed store (feature `rocksdb-store`) modeled directly on
//! `state::store::StateStore` — one column family per keyed namespace,
//! bincode-serialized values, an `RwLock<DB>` for interior mutability.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::model::Plan;

/// Schema, not API: callers only depend on these six operations plus the
/// isolation contract, regardless of backing implementation.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn add_memory(&self, agent_name: &str, entry: &str) -> CoreResult<()>;

    /// Oldest to newest.
    async fn load_memory(&self, agent_name: &str) -> CoreResult<Vec<String>>;

    /// Idempotent overwrite.
    async fn save_plan(&self, workflow_id: &str, plan: &Plan) -> CoreResult<()>;

    async fn load_plan(&self, workflow_id: &str) -> CoreResult<Option<Plan>>;

    /// Overwrite per `(workflow_id, task_name)` key; last writer wins.
    async fn save_task_output(
        &self,
        workflow_id: &str,
        task_name: &str,
        output: &str,
    ) -> CoreResult<()>;

    /// Ordered by task name (`BTreeMap` key order), not insertion/execution
    /// order — callers that need execution order reconstruct it from the
    /// plan, as the parallel executor and sequential runner both do.
    async fn load_task_outputs(&self, workflow_id: &str) -> CoreResult<BTreeMap<String, String>>;

    /// Remove every namespace (plan, task outputs, memory) owned by this
    /// workflow id. Used when an isolated store's guard drops without the
    /// "preserve for debug" flag, and available to callers tearing down a
    /// completed workflow explicitly.
    async fn remove_workflow(&self, workflow_id: &str) -> CoreResult<()>;
}

pub type SharedPersistenceStore = Arc<dyn PersistenceStore>;

#[derive(Debug, Default)]
struct MemoryStoreInner {
    plans: BTreeMap<String, Plan>,
    task_outputs: BTreeMap<String, BTreeMap<String, String>>,
    agent_memory: BTreeMap<String, Vec<String>>,
}

/// Default backend: `RwLock`-guarded in-process maps. Cheap enough that an
/// isolated store is simply a fresh instance — nothing to clean up on close.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A freshly constructed, private store for one synthetic workflow id.
    /// Satisfies the isolation contract without any on-disk cleanup.
    pub fn isolated() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn add_memory(&self, agent_name: &str, entry: &str) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .agent_memory
            .entry(agent_name.to_string())
            .or_default()
            .push(entry.to_string());
        Ok(())
    }

    async fn load_memory(&self, agent_name: &str) -> CoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.agent_memory.get(agent_name).cloned().unwrap_or_default())
    }

    async fn save_plan(&self, workflow_id: &str, plan: &Plan) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.plans.insert(workflow_id.to_string(), plan.clone());
        Ok(())
    }

    async fn load_plan(&self, workflow_id: &str) -> CoreResult<Option<Plan>> {
        let inner = self.inner.read().await;
        Ok(inner.plans.get(workflow_id).cloned())
    }

    async fn save_task_output(
        &self,
        workflow_id: &str,
        task_name: &str,
        output: &str,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .task_outputs
            .entry(workflow_id.to_string())
            .or_default()
            .insert(task_name.to_string(), output.to_string());
        Ok(())
    }

    async fn load_task_outputs(&self, workflow_id: &str) -> CoreResult<BTreeMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.task_outputs.get(workflow_id).cloned().unwrap_or_default())
    }

    async fn remove_workflow(&self, workflow_id: &str) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.plans.remove(workflow_id);
        inner.task_outputs.remove(workflow_id);
        Ok(())
    }
}

/// Persist a memory entry, logging (never failing the caller) if the write
/// fails — memory-write failures are non-fatal to the agent per §4.2/§4.5.
pub async fn persist_memory_best_effort(
    store: &dyn PersistenceStore,
    agent_name: &str,
    entry: &str,
) {
    if let Err(err) = store.add_memory(agent_name, entry).await {
        warn!(agent = agent_name, error = %err, "memory persist failed, continuing");
    }
}

#[cfg(feature = "rocksdb-store")]
pub mod rocks {
    //! RocksDB-backed implementation, modeled on `state::store::StateStore`:
    //! one column family per namespace, bincode-serialized values behind an
    //! `RwLock<DB>` for interior mutability under a shared `Arc`.

    use std::path::{Path, PathBuf};

    use bincode::{Decode, Encode};
    use rocksdb::{ColumnFamilyDescriptor, Options, DB};

    use super::*;

    const CF_PLANS: &str = "plans";
    const CF_TASK_OUTPUTS: &str = "task_outputs";
    const CF_AGENT_MEMORY: &str = "agent_memory";
    const ALL_CFS: &[&str] = &[CF_PLANS, CF_TASK_OUTPUTS, CF_AGENT_MEMORY];

    fn plan_key(workflow_id: &str) -> String {
        format!("plan:{workflow_id}")
    }

    fn task_output_prefix(workflow_id: &str) -> String {
        format!("{workflow_id}:")
    }

    fn task_output_key(workflow_id: &str, task_name: &str) -> String {
        format!("{workflow_id}:{task_name}")
    }

    #[derive(Encode, Decode)]
    struct TaskDefRecord {
        name: String,
        description: String,
        prompt_template: String,
    }

    #[derive(Encode, Decode)]
    struct PlanRecord {
        tasks: Vec<TaskDefRecord>,
    }

    impl From<&Plan> for PlanRecord {
        fn from(plan: &Plan) -> Self {
            PlanRecord {
                tasks: plan
                    .tasks
                    .iter()
                    .map(|t| TaskDefRecord {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        prompt_template: t.prompt_template.clone(),
                    })
                    .collect(),
            }
        }
    }

    impl From<PlanRecord> for Plan {
        fn from(record: PlanRecord) -> Self {
            Plan {
                tasks: record
                    .tasks
                    .into_iter()
                    .map(|t| crate::model::TaskDefinition {
                        name: t.name,
                        description: t.description,
                        prompt_template: t.prompt_template,
                    })
                    .collect(),
            }
        }
    }

    /// On-disk persistence store. One RocksDB instance per `path`.
    pub struct RocksStore {
        db: RwLock<DB>,
        path: PathBuf,
    }

    impl RocksStore {
        pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
            let path = path.as_ref().to_path_buf();
            let mut db_opts = Options::default();
            db_opts.create_if_missing(true);
            db_opts.create_missing_column_families(true);

            let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
                .iter()
                .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
                .collect();

            let db = DB::open_cf_descriptors(&db_opts, &path, cfs)
                .map_err(|e| CoreError::persistence(format!("opening rocksdb at {path:?}: {e}")))?;

            Ok(Self {
                db: RwLock::new(db),
                path,
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Open an isolated store at a fresh temp directory. Returns the
        /// store plus a guard that removes the directory on drop unless
        /// `preserve` is set (the "preserve for debug" flag in §4.2).
        pub fn open_isolated(base_dir: impl AsRef<Path>) -> CoreResult<(Self, IsolationGuard)> {
            let synthetic_id = uuid_like_suffix();
            let path = base_dir.as_ref().join(format!("isolated-{synthetic_id}"));
            let store = Self::open(&path)?;
            let guard = IsolationGuard {
                path: path.clone(),
                preserve: false,
            };
            Ok((store, guard))
        }

        fn cf<'a>(&self, db: &'a DB, name: &str) -> CoreResult<&'a rocksdb::ColumnFamily> {
            db.cf_handle(name)
                .ok_or_else(|| CoreError::persistence(format!("missing column family {name}")))
        }
    }

    fn uuid_like_suffix() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("{nanos:x}")
    }

    /// Removes the isolated store's on-disk directory when dropped, unless
    /// `preserve()` was called first.
    pub struct IsolationGuard {
        path: PathBuf,
        preserve: bool,
    }

    impl IsolationGuard {
        pub fn preserve(&mut self) {
            self.preserve = true;
        }
    }

    impl Drop for IsolationGuard {
        fn drop(&mut self) {
            if !self.preserve && self.path.exists() {
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
    }

    #[async_trait]
    impl PersistenceStore for RocksStore {
        async fn add_memory(&self, agent_name: &str, entry: &str) -> CoreResult<()> {
            let db = self.db.write().await;
            let cf = self.cf(&db, CF_AGENT_MEMORY)?;
            let mut log: Vec<String> = db
                .get_cf(cf, agent_name)
                .map_err(|e| CoreError::persistence(e.to_string()))?
                .and_then(|bytes| bincode::decode_from_slice(&bytes, bincode::config::standard()).ok())
                .map(|(v, _): (Vec<String>, usize)| v)
                .unwrap_or_default();
            log.push(entry.to_string());
            let encoded = bincode::encode_to_vec(&log, bincode::config::standard())
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            db.put_cf(cf, agent_name, encoded)
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            Ok(())
        }

        async fn load_memory(&self, agent_name: &str) -> CoreResult<Vec<String>> {
            let db = self.db.read().await;
            let cf = self.cf(&db, CF_AGENT_MEMORY)?;
            let log = db
                .get_cf(cf, agent_name)
                .map_err(|e| CoreError::persistence(e.to_string()))?
                .and_then(|bytes| bincode::decode_from_slice(&bytes, bincode::config::standard()).ok())
                .map(|(v, _): (Vec<String>, usize)| v)
                .unwrap_or_default();
            Ok(log)
        }

        async fn save_plan(&self, workflow_id: &str, plan: &Plan) -> CoreResult<()> {
            let db = self.db.write().await;
            let cf = self.cf(&db, CF_PLANS)?;
            let record = PlanRecord::from(plan);
            let encoded = bincode::encode_to_vec(&record, bincode::config::standard())
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            db.put_cf(cf, plan_key(workflow_id), encoded)
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            Ok(())
        }

        async fn load_plan(&self, workflow_id: &str) -> CoreResult<Option<Plan>> {
            let db = self.db.read().await;
            let cf = self.cf(&db, CF_PLANS)?;
            let bytes = db
                .get_cf(cf, plan_key(workflow_id))
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            Ok(match bytes {
                None => None,
                Some(bytes) => {
                    let (record, _): (PlanRecord, usize) =
                        bincode::decode_from_slice(&bytes, bincode::config::standard())
                            .map_err(|e| CoreError::persistence(e.to_string()))?;
                    Some(record.into())
                }
            })
        }

        async fn save_task_output(
            &self,
            workflow_id: &str,
            task_name: &str,
            output: &str,
        ) -> CoreResult<()> {
            let db = self.db.write().await;
            let cf = self.cf(&db, CF_TASK_OUTPUTS)?;
            db.put_cf(cf, task_output_key(workflow_id, task_name), output.as_bytes())
                .map_err(|e| CoreError::persistence(e.to_string()))?;
            Ok(())
        }

        /// Ordered by task name, same as `MemoryStore`'s trait-level caveat:
        /// the RocksDB prefix scan is lexicographic by key, not insertion
        /// order.
        async fn load_task_outputs(&self, workflow_id: &str) -> CoreResult<BTreeMap<String, String>> {
            let db = self.db.read().await;
            let cf = self.cf(&db, CF_TASK_OUTPUTS)?;
            let prefix = task_output_prefix(workflow_id);
            let mut out = BTreeMap::new();
            let iter = db.prefix_iterator_cf(cf, prefix.as_bytes());
            for item in iter {
                let (key, value) =
                    item.map_err(|e| CoreError::persistence(e.to_string()))?;
                let key_str = String::from_utf8_lossy(&key);
                if !key_str.starts_with(&prefix) {
                    break;
                }
                let task_name = key_str[prefix.len()..].to_string();
                let value_str = String::from_utf8_lossy(&value).to_string();
                out.insert(task_name, value_str);
            }
            Ok(out)
        }

        async fn remove_workflow(&self, workflow_id: &str) -> CoreResult<()> {
            let db = self.db.write().await;
            let plans_cf = self.cf(&db, CF_PLANS)?;
            db.delete_cf(plans_cf, plan_key(workflow_id))
                .map_err(|e| CoreError::persistence(e.to_string()))?;

            let outputs_cf = self.cf(&db, CF_TASK_OUTPUTS)?;
            let prefix = task_output_prefix(workflow_id);
            let keys: Vec<Vec<u8>> = db
                .prefix_iterator_cf(outputs_cf, prefix.as_bytes())
                .filter_map(|item| item.ok())
                .map(|(k, _)| k.to_vec())
                .take_while(|k| String::from_utf8_lossy(k).starts_with(&prefix))
                .collect();
            for key in keys {
                db.delete_cf(outputs_cf, key)
                    .map_err(|e| CoreError::persistence(e.to_string()))?;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::model::TaskDefinition;

        #[tokio::test]
        async fn round_trips_plan_and_task_outputs() {
            let dir = tempfile::tempdir().unwrap();
            let store = RocksStore::open(dir.path()).unwrap();

            let plan = Plan::new(vec![TaskDefinition::new("A", "desc", "{{user_request}}")]);
            store.save_plan("wf-1", &plan).await.unwrap();
            let loaded = store.load_plan("wf-1").await.unwrap().unwrap();
            assert_eq!(loaded.tasks[0].name, "A");

            store.save_task_output("wf-1", "A", "output-a").await.unwrap();
            let outputs = store.load_task_outputs("wf-1").await.unwrap();
            assert_eq!(outputs.get("A"), Some(&"output-a".to_string()));
        }

        #[tokio::test]
        async fn memory_log_is_append_only_and_ordered() {
            let dir = tempfile::tempdir().unwrap();
            let store = RocksStore::open(dir.path()).unwrap();
            store.add_memory("agent-1", "first").await.unwrap();
            store.add_memory("agent-1", "second").await.unwrap();
            let log = store.load_memory("agent-1").await.unwrap();
            assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
        }

        #[tokio::test]
        async fn isolated_store_cleans_up_on_drop() {
            let base = tempfile::tempdir().unwrap();
            let path;
            {
                let (store, _guard) = RocksStore::open_isolated(base.path()).unwrap();
                path = store.path().to_path_buf();
                assert!(path.exists());
            }
            assert!(!path.exists());
        }

        #[tokio::test]
        async fn isolated_store_preserved_on_request() {
            let base = tempfile::tempdir().unwrap();
            let path;
            {
                let (store, mut guard) = RocksStore::open_isolated(base.path()).unwrap();
                path = store.path().to_path_buf();
                guard.preserve();
            }
            assert!(path.exists());
            std::fs::remove_dir_all(&path).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskDefinition;

    #[tokio::test]
    async fn memory_append_only_and_ordered() {
        let store = MemoryStore::new();
        store.add_memory("agent-1", "first").await.unwrap();
        store.add_memory("agent-1", "second").await.unwrap();
        let log = store.load_memory("agent-1").await.unwrap();
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn plan_save_is_idempotent_overwrite() {
        let store = MemoryStore::new();
        let plan_v1 = Plan::new(vec![TaskDefinition::new("A", "d", "t")]);
        let plan_v2 = Plan::new(vec![
            TaskDefinition::new("A", "d", "t"),
            TaskDefinition::new("B", "d2", "t2"),
        ]);
        store.save_plan("wf-1", &plan_v1).await.unwrap();
        store.save_plan("wf-1", &plan_v2).await.unwrap();
        let loaded = store.load_plan("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 2);
    }

    #[tokio::test]
    async fn task_output_round_trips_byte_identical() {
        let store = MemoryStore::new();
        store.save_task_output("wf-1", "A", "hello world").await.unwrap();
        let outputs = store.load_task_outputs("wf-1").await.unwrap();
        assert_eq!(outputs.get("A"), Some(&"hello world".to_string()));
    }

    #[tokio::test]
    async fn different_workflow_ids_are_independent() {
        let store = MemoryStore::new();
        store.save_task_output("wf-1", "A", "one").await.unwrap();
        store.save_task_output("wf-2", "A", "two").await.unwrap();
        assert_eq!(
            store.load_task_outputs("wf-1").await.unwrap().get("A"),
            Some(&"one".to_string())
        );
        assert_eq!(
            store.load_task_outputs("wf-2").await.unwrap().get("A"),
            Some(&"two".to_string())
        );
    }

    #[tokio::test]
    async fn remove_workflow_clears_plan_and_outputs() {
        let store = MemoryStore::new();
        let plan = Plan::new(vec![TaskDefinition::new("A", "d", "t")]);
        store.save_plan("wf-1", &plan).await.unwrap();
        store.save_task_output("wf-1", "A", "out").await.unwrap();
        store.remove_workflow("wf-1").await.unwrap();
        assert!(store.load_plan("wf-1").await.unwrap().is_none());
        assert!(store.load_task_outputs("wf-1").await.unwrap().is_empty());
    }
}
