//! StateStore - per-case state.json CRUD operations

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::CaseState;
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// File name of the state document inside a case directory
pub const STATE_FILE: &str = "state.json";

const CASE_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

/// Reject ids that could escape the state directory
pub fn validate_case_id(case_id: &str) -> WorkflowResult<()> {
    let re = Regex::new(CASE_ID_PATTERN)
        .map_err(|_| WorkflowError::InvalidCaseId(case_id.to_string()))?;
    if case_id.len() > 128 || !re.is_match(case_id) || case_id.contains("..") {
        return Err(WorkflowError::InvalidCaseId(case_id.to_string()));
    }
    Ok(())
}

/// Filesystem-backed store: `<root>/<case_id>/state.json`
///
/// Safe to share across tasks. Writes are atomic (temp file + rename) and
/// callers serialise read-modify-write cycles on one case with [`lock`].
///
/// [`lock`]: StateStore::lock
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    locks: Arc<LockRegistry>,
}

type LockRegistry = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Held lock on one case; the registry entry is dropped once nobody holds
/// or waits on it
#[derive(Debug)]
pub struct CaseGuard {
    guard: Option<OwnedMutexGuard<()>>,
    case_id: String,
    locks: Arc<LockRegistry>,
}

impl Drop for CaseGuard {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.case_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.case_id);
        }
    }
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a case's state document
    pub fn state_path(&self, case_id: &str) -> WorkflowResult<PathBuf> {
        validate_case_id(case_id)?;
        Ok(self.root.join(case_id).join(STATE_FILE))
    }

    pub fn exists(&self, case_id: &str) -> bool {
        self.state_path(case_id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Strict load: a missing document is `NotFound`, never a default state
    pub fn load(&self, case_id: &str) -> WorkflowResult<CaseState> {
        let path = self.state_path(case_id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkflowError::NotFound {
                    case_id: case_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        CaseState::from_json(case_id, &content)
    }

    /// Write the document atomically, stamping `updated_at`
    pub fn save(&self, case_id: &str, state: &mut CaseState) -> WorkflowResult<PathBuf> {
        let path = self.state_path(case_id)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&dir)?;

        state.updated_at = Some(Utc::now());
        let content = state.to_json_pretty()?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| WorkflowError::Io(e.error))?;

        tracing::debug!(case_id, path = %path.display(), "saved case state");
        Ok(path)
    }

    /// Case ids that have a state document, sorted
    pub fn list_cases(&self) -> WorkflowResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut cases = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join(STATE_FILE).is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if validate_case_id(name).is_ok() {
                    cases.push(name.to_string());
                }
            }
        }
        cases.sort();
        Ok(cases)
    }

    /// Exclusive access to one case for a load-modify-save cycle
    pub async fn lock(&self, case_id: &str) -> CaseGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(case_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        CaseGuard {
            guard: Some(lock.lock_owned().await),
            case_id: case_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LandmarkState, LandmarkStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, StateStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("cases"));
        (temp_dir, store)
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_temp, store) = setup_store();
        let err = store.load("smith-2024").unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("smith-2024"));
    }

    #[test]
    fn test_save_and_load() {
        let (_temp, store) = setup_store();
        let mut state = CaseState::new("smith-2024", "setup", Utc::now());
        state.metadata.client_name = Some("Jane Smith".to_string());
        state
            .landmarks
            .insert("contract_signed".to_string(), LandmarkStatus::default());

        let path = store.save("smith-2024", &mut state).unwrap();
        assert!(path.ends_with("smith-2024/state.json"));
        assert!(store.exists("smith-2024"));

        let loaded = store.load("smith-2024").unwrap();
        assert_eq!(loaded.phase, "setup");
        assert_eq!(loaded.metadata.client_name.as_deref(), Some("Jane Smith"));
        assert_eq!(loaded.landmark_state("contract_signed"), LandmarkState::NotStarted);
        assert!(loaded.repairs.is_empty());
    }

    #[test]
    fn test_save_stamps_updated_at() {
        let (_temp, store) = setup_store();
        let mut state = CaseState::new("a", "setup", Utc::now());
        state.updated_at = None;
        store.save("a", &mut state).unwrap();
        assert!(state.updated_at.is_some());
        assert!(store.load("a").unwrap().updated_at.is_some());
    }

    #[test]
    fn test_load_empty_file_is_malformed() {
        let (_temp, store) = setup_store();
        let path = store.state_path("broken").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();

        let err = store.load("broken").unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedState { .. }));
    }

    #[test]
    fn test_list_cases() {
        let (_temp, store) = setup_store();
        assert!(store.list_cases().unwrap().is_empty());

        for id in ["b-case", "a-case"] {
            let mut state = CaseState::new(id, "setup", Utc::now());
            store.save(id, &mut state).unwrap();
        }
        // Directory without a state document is not a case
        std::fs::create_dir_all(store.root().join("stray")).unwrap();

        assert_eq!(store.list_cases().unwrap(), vec!["a-case", "b-case"]);
    }

    #[test]
    fn test_rejects_traversal_ids() {
        for id in ["../etc", "a/b", "", ".hidden", "a..b"] {
            assert!(
                matches!(validate_case_id(id), Err(WorkflowError::InvalidCaseId(_))),
                "{:?} should be rejected",
                id
            );
        }
        assert!(validate_case_id("smith_2024.v2").is_ok());
    }

    #[tokio::test]
    async fn test_lock_serialises_same_case() {
        let (_temp, store) = setup_store();
        let store = Arc::new(store);

        let guard = store.lock("a").await;
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _g = store.lock("a").await;
            })
        };
        // Other cases are not blocked
        let _other = store.lock("b").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_are_released() {
        let (_temp, store) = setup_store();
        let store = Arc::new(store);

        for i in 0..50 {
            let _guard = store.lock(&format!("case-{}", i)).await;
        }
        assert_eq!(store.tracked_locks(), 0);

        // Entry stays while another task is waiting on it
        let guard = store.lock("a").await;
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let _g = store.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(store.tracked_locks(), 1);
        waiter.await.unwrap();
        assert_eq!(store.tracked_locks(), 0);
    }
}
