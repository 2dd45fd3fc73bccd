//! Durable persistence of workflow state, one JSON file per feature.
//!
//! Saves are atomic from the caller's point of view: content is written to a
//! temp file in the same directory and renamed over the target, so a `load`
//! never observes a partially written record. Corrupt files fail a direct
//! `load` with `StateError::Corrupted` but are skipped by `list`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::StateError;
use crate::state::WorkflowState;

pub struct StateStore {
    storage_dir: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `storage_dir`, creating it if needed.
    pub fn new(storage_dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(storage_dir).map_err(|source| StateError::Io {
            path: storage_dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            storage_dir: storage_dir.to_path_buf(),
        })
    }

    fn file_path(&self, feature_id: u64) -> PathBuf {
        self.storage_dir.join(format!("{feature_id}.json"))
    }

    /// Persist a state, replacing any previous record for the feature.
    pub fn save(&self, state: &WorkflowState) -> Result<(), StateError> {
        let path = self.file_path(state.feature_id);
        let mut contents = serde_json::to_string_pretty(state).map_err(|source| {
            StateError::Corrupted {
                path: path.clone(),
                source,
            }
        })?;
        contents.push('\n');

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &contents).map_err(|source| StateError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(feature_id = state.feature_id, path = %path.display(), "state saved");
        Ok(())
    }

    /// Load a state by feature id. A missing record is `Ok(None)`, not an
    /// error; a malformed record is `StateError::Corrupted`.
    pub fn load(&self, feature_id: u64) -> Result<Option<WorkflowState>, StateError> {
        let path = self.file_path(feature_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        let state = serde_json::from_str(&contents)
            .map_err(|source| StateError::Corrupted { path, source })?;
        Ok(Some(state))
    }

    /// Whether a record exists for the feature.
    pub fn exists(&self, feature_id: u64) -> bool {
        self.file_path(feature_id).exists()
    }

    /// Delete a feature's record. Returns whether a record existed.
    pub fn delete(&self, feature_id: u64) -> Result<bool, StateError> {
        let path = self.file_path(feature_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// All stored states, ascending by feature id. Corrupt records are
    /// skipped with a warning rather than aborting the listing.
    pub fn list(&self) -> Result<Vec<WorkflowState>, StateError> {
        let entries = fs::read_dir(&self.storage_dir).map_err(|source| StateError::Io {
            path: self.storage_dir.clone(),
            source,
        })?;

        let mut states = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<WorkflowState>(&contents) {
                Ok(state) => states.push(state),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt state file");
                }
            }
        }

        states.sort_by_key(|s| s.feature_id);
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::WorkflowPhase;
    use tempfile::tempdir;

    fn sample_state(feature_id: u64) -> WorkflowState {
        let mut state = WorkflowState::new(feature_id, "Add auth", "OAuth login");
        state.start_phase(WorkflowPhase::Phase1Setup);
        state.branch_name = format!("{feature_id}-add-auth");
        state.ticket_id = Some(feature_id);
        state
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        let state = sample_state(7);
        store.save(&state).unwrap();

        let loaded = store.load(7).unwrap().unwrap();
        assert_eq!(loaded, state);
        // Timestamps keep their timezone through the round trip.
        assert_eq!(loaded.created_at, state.created_at);
    }

    #[test]
    fn test_load_missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        assert!(store.load(99).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_is_corrupted_error() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("5.json"), "{ not json").unwrap();

        let err = store.load(5).unwrap_err();
        assert_eq!(err.code(), "STATE_CORRUPTED");
    }

    #[test]
    fn test_list_sorted_and_skips_corrupt() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        store.save(&sample_state(12)).unwrap();
        store.save(&sample_state(3)).unwrap();
        store.save(&sample_state(7)).unwrap();
        fs::write(dir.path().join("5.json"), "{ not json").unwrap();

        let listed = store.list().unwrap();
        let ids: Vec<u64> = listed.iter().map(|s| s.feature_id).collect();
        assert_eq!(ids, vec![3, 7, 12]);
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();

        let mut state = sample_state(7);
        store.save(&state).unwrap();

        state.advance().unwrap();
        store.save(&state).unwrap();

        let loaded = store.load(7).unwrap().unwrap();
        assert_eq!(loaded.current_phase, WorkflowPhase::Phase2Specs);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save(&sample_state(7)).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["7.json"]);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        store.save(&sample_state(7)).unwrap();

        assert!(store.delete(7).unwrap());
        assert!(!store.delete(7).unwrap());
        assert!(!store.exists(7));
    }

    #[test]
    fn test_reload_after_restart() {
        let dir = tempdir().unwrap();
        {
            let store = StateStore::new(dir.path()).unwrap();
            store.save(&sample_state(7)).unwrap();
        }
        {
            let store = StateStore::new(dir.path()).unwrap();
            let loaded = store.load(7).unwrap().unwrap();
            assert_eq!(loaded.feature_id, 7);
            assert_eq!(loaded.current_phase, WorkflowPhase::Phase1Setup);
        }
    }
}
