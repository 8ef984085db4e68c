//! Storage for interruptions awaiting an out-of-band resolution.
//!
//! The engine only builds interruption records; persisting them and
//! collecting answers is the job of an [`InterruptionStore`].

use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "file-store")]
use std::path::{Path, PathBuf};
#[cfg(feature = "file-store")]
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(feature = "file-store")]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
#[cfg(feature = "file-store")]
use tokio::sync::Mutex;

use super::{Interruption, Resolution};
use crate::error::ParleyError;
use crate::types::{RunId, RunState};

/// Collaborator that stores interruptions and their resolutions.
///
/// Implementations must be safe for concurrent use across runs.
#[async_trait]
pub trait InterruptionStore: Send + Sync {
    /// Persist a freshly returned interruption. Saving the same id again
    /// replaces the record and clears any previous resolution.
    async fn save(&self, interruption: &Interruption) -> Result<(), ParleyError>;

    async fn get(&self, id: &str) -> Result<Option<Interruption>, ParleyError>;

    /// Record an answer. Returns `false` when the id is unknown, already
    /// resolved, or the resolution does not fit the interruption.
    async fn submit_resolution(&self, id: &str, resolution: Resolution) -> Result<bool, ParleyError>;

    /// Interruptions that still wait for an answer.
    async fn list_pending(&self) -> Result<Vec<Interruption>, ParleyError>;

    /// Remove and return every resolved interruption of a run.
    async fn take_resolutions(&self, run_id: &RunId) -> Result<BTreeMap<String, Resolution>, ParleyError>;

    /// Attach all collected resolutions for `state`'s run, ready for re-entry.
    async fn prepare_resume(&self, mut state: RunState) -> Result<RunState, ParleyError> {
        let resolutions = self.take_resolutions(&state.run_id).await?;
        state.pending_resolutions.extend(resolutions);
        Ok(state)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredInterruption {
    interruption: Interruption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resolution: Option<Resolution>,
}

impl StoredInterruption {
    fn resolve(&mut self, resolution: Resolution) -> bool {
        if self.resolution.is_some() || !self.interruption.accepts(&resolution) {
            return false;
        }
        self.resolution = Some(resolution);
        true
    }
}

/// Process-local store, lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryInterruptionStore {
    entries: RwLock<HashMap<String, StoredInterruption>>,
}

impl InMemoryInterruptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptionStore for InMemoryInterruptionStore {
    async fn save(&self, interruption: &Interruption) -> Result<(), ParleyError> {
        self.entries.write().await.insert(
            interruption.id.clone(),
            StoredInterruption {
                interruption: interruption.clone(),
                resolution: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Interruption>, ParleyError> {
        Ok(self
            .entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.interruption.clone()))
    }

    async fn submit_resolution(&self, id: &str, resolution: Resolution) -> Result<bool, ParleyError> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .get_mut(id)
            .is_some_and(|entry| entry.resolve(resolution)))
    }

    async fn list_pending(&self) -> Result<Vec<Interruption>, ParleyError> {
        let entries = self.entries.read().await;
        let mut pending: Vec<Interruption> = entries
            .values()
            .filter(|entry| entry.resolution.is_none())
            .map(|entry| entry.interruption.clone())
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }

    async fn take_resolutions(&self, run_id: &RunId) -> Result<BTreeMap<String, Resolution>, ParleyError> {
        let mut entries = self.entries.write().await;
        let resolved: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.interruption.run_id == *run_id && entry.resolution.is_some()
            })
            .map(|(id, _)| id.clone())
            .collect();
        let mut out = BTreeMap::new();
        for id in resolved {
            if let Some(StoredInterruption {
                resolution: Some(resolution),
                ..
            }) = entries.remove(&id)
            {
                out.insert(id, resolution);
            }
        }
        Ok(out)
    }
}

/// File-backed store: one JSON document per interruption.
///
/// Survives process restarts, so a run can be resumed by a different process
/// than the one that suspended it.
///
/// Clones share one write lock. Separate stores opened on the same directory
/// do not coordinate with each other.
#[cfg(feature = "file-store")]
#[derive(Debug, Clone)]
pub struct FileInterruptionStore {
    base_dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

#[cfg(feature = "file-store")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InterruptionFile {
    version: u32,
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    entry: StoredInterruption,
}

#[cfg(feature = "file-store")]
impl FileInterruptionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store under the platform data directory (`.../parley/interruptions`).
    pub fn new_default() -> Self {
        Self::new(default_store_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, id: &str) -> Result<PathBuf, ParleyError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ParleyError::Store(format!("invalid interruption id '{id}'")));
        }
        Ok(self.base_dir.join(format!("{id}.json")))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<StoredInterruption>, ParleyError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: InterruptionFile = serde_json::from_str(&raw)?;
        Ok(Some(file.entry))
    }

    async fn write_entry(&self, path: &Path, entry: StoredInterruption) -> Result<(), ParleyError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let file = InterruptionFile {
            version: 1,
            saved_at: Utc::now(),
            entry,
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serialized).await?;
        if let Err(err) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<(PathBuf, StoredInterruption)>, ParleyError> {
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_entry(&path).await {
                Ok(Some(entry)) => out.push((path, entry)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable interruption file");
                }
            }
        }
        out.sort_by(|a, b| a.1.interruption.id.cmp(&b.1.interruption.id));
        Ok(out)
    }
}

#[cfg(feature = "file-store")]
#[async_trait]
impl InterruptionStore for FileInterruptionStore {
    async fn save(&self, interruption: &Interruption) -> Result<(), ParleyError> {
        let path = self.entry_path(&interruption.id)?;
        let _guard = self.write_lock.lock().await;
        self.write_entry(
            &path,
            StoredInterruption {
                interruption: interruption.clone(),
                resolution: None,
            },
        )
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Interruption>, ParleyError> {
        let path = self.entry_path(id)?;
        Ok(self.read_entry(&path).await?.map(|entry| entry.interruption))
    }

    async fn submit_resolution(&self, id: &str, resolution: Resolution) -> Result<bool, ParleyError> {
        let path = self.entry_path(id)?;
        // read-check-write must not interleave with another submit
        let _guard = self.write_lock.lock().await;
        let Some(mut entry) = self.read_entry(&path).await? else {
            return Ok(false);
        };
        if !entry.resolve(resolution) {
            return Ok(false);
        }
        self.write_entry(&path, entry).await?;
        Ok(true)
    }

    async fn list_pending(&self) -> Result<Vec<Interruption>, ParleyError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|(_, entry)| entry.resolution.is_none())
            .map(|(_, entry)| entry.interruption)
            .collect())
    }

    async fn take_resolutions(&self, run_id: &RunId) -> Result<BTreeMap<String, Resolution>, ParleyError> {
        let _guard = self.write_lock.lock().await;
        let mut out = BTreeMap::new();
        let mut consumed = Vec::new();
        for (path, entry) in self.read_all().await? {
            if entry.interruption.run_id != *run_id {
                continue;
            }
            let Some(resolution) = entry.resolution else {
                continue;
            };
            out.insert(entry.interruption.id, resolution);
            consumed.push(path);
        }
        discard_files(&consumed).await;
        Ok(out)
    }
}

/// Best-effort removal of consumed entries. Returns how many could not be
/// removed; a leftover file only yields a stale resolution on a later take.
#[cfg(feature = "file-store")]
async fn discard_files(paths: &[PathBuf]) -> usize {
    let mut failed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                failed += 1;
                tracing::warn!(path = %path.display(), error = %err, "failed to remove consumed interruption file");
            }
        }
    }
    failed
}

#[cfg(feature = "file-store")]
fn default_store_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|dirs| dirs.data_dir().join("interruptions"))
        .unwrap_or_else(|| PathBuf::from(".parley/interruptions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::interruption::{package, ClarificationRequest, Suspension};
    use crate::types::ToolCall;
    use serde_json::json;

    fn clarification(state: &RunState, call_id: &str) -> Interruption {
        package(
            Suspension::Clarification(ClarificationRequest::new(
                "Which Alice?",
                ["Alice (Eng)", "Alice (Sales)"],
            )),
            &ToolCall::new(call_id, "find_person", json!({ "name": "Alice" })),
            "people",
            state,
            &RunConfig::default(),
        )
    }

    #[tokio::test]
    async fn in_memory_resolution_lifecycle() {
        let store = InMemoryInterruptionStore::new();
        let state = RunState::new("people");
        let interruption = clarification(&state, "call_1");
        store.save(&interruption).await.unwrap();

        assert_eq!(store.list_pending().await.unwrap().len(), 1);
        assert!(!store
            .submit_resolution(&interruption.id, Resolution::clarification("Bob"))
            .await
            .unwrap());
        assert!(store
            .submit_resolution(&interruption.id, Resolution::clarification("Alice (Eng)"))
            .await
            .unwrap());
        assert!(!store
            .submit_resolution(&interruption.id, Resolution::clarification("Alice (Sales)"))
            .await
            .unwrap());
        assert!(store.list_pending().await.unwrap().is_empty());

        let resumed = store.prepare_resume(state.clone()).await.unwrap();
        assert_eq!(
            resumed.pending_resolutions.get(&interruption.id),
            Some(&Resolution::clarification("Alice (Eng)"))
        );
        assert!(store.get(&interruption.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_rejected() {
        let store = InMemoryInterruptionStore::new();
        assert!(!store
            .submit_resolution("int_missing", Resolution::clarification("x"))
            .await
            .unwrap());
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = RunState::new("people");
        let interruption = clarification(&state, "call_1");
        let other_run = clarification(&RunState::new("people"), "call_1");

        {
            let store = FileInterruptionStore::new(dir.path());
            store.save(&interruption).await.unwrap();
            store.save(&other_run).await.unwrap();
        }

        let store = FileInterruptionStore::new(dir.path());
        assert_eq!(store.list_pending().await.unwrap().len(), 2);
        assert_eq!(store.get(&interruption.id).await.unwrap(), Some(interruption.clone()));
        assert!(store
            .submit_resolution(&interruption.id, Resolution::clarification("Alice (Sales)"))
            .await
            .unwrap());

        let resolutions = store.take_resolutions(&state.run_id).await.unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(
            resolutions.get(&interruption.id),
            Some(&Resolution::clarification("Alice (Sales)"))
        );
        assert_eq!(store.list_pending().await.unwrap(), vec![other_run]);
    }

    #[cfg(feature = "file-store")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submits_have_one_winner() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileInterruptionStore::new(dir.path());
        let state = RunState::new("people");

        for round in 0..25 {
            let interruption = clarification(&state, &format!("call_{round}"));
            store.save(&interruption).await.unwrap();

            let submit = |answer: &'static str| {
                let store = store.clone();
                let id = interruption.id.clone();
                tokio::spawn(async move {
                    store
                        .submit_resolution(&id, Resolution::clarification(answer))
                        .await
                })
            };
            let eng = submit("Alice (Eng)");
            let sales = submit("Alice (Sales)");
            let eng = eng.await.unwrap().unwrap();
            let sales = sales.await.unwrap().unwrap();
            assert!(eng ^ sales, "round {round}: eng={eng} sales={sales}");
        }

        let resolutions = store.take_resolutions(&state.run_id).await.unwrap();
        assert_eq!(resolutions.len(), 25);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn take_returns_every_resolution_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileInterruptionStore::new(dir.path());
        let state = RunState::new("people");
        let first = clarification(&state, "call_1");
        let second = clarification(&state, "call_2");
        let unresolved = clarification(&state, "call_3");
        for interruption in [&first, &second, &unresolved] {
            store.save(interruption).await.unwrap();
        }
        store
            .submit_resolution(&first.id, Resolution::clarification("Alice (Eng)"))
            .await
            .unwrap();
        store
            .submit_resolution(&second.id, Resolution::clarification("Alice (Sales)"))
            .await
            .unwrap();

        let taken = store.take_resolutions(&state.run_id).await.unwrap();
        assert_eq!(taken.keys().collect::<Vec<_>>(), {
            let mut ids = vec![&first.id, &second.id];
            ids.sort();
            ids
        });
        assert!(store.take_resolutions(&state.run_id).await.unwrap().is_empty());
        assert_eq!(store.list_pending().await.unwrap(), vec![unresolved]);
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn discard_tolerates_missing_and_reports_stuck_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let gone = dir.path().join("int_gone.json");
        let stuck = dir.path().join("int_stuck.json");
        std::fs::create_dir(&stuck).unwrap();

        assert_eq!(discard_files(&[gone, stuck.clone()]).await, 1);
        assert!(stuck.exists());
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn file_store_rejects_path_like_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileInterruptionStore::new(dir.path());
        assert!(store.get("../escape").await.is_err());
    }
}
