// Copyright 2025 The p4stack Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Durable record of an in-progress rebase.
//!
//! The log is a single JSON file, whole-file replaced on every save so a
//! crash can never leave a half-written record. A partially written or
//! unparsable file is treated as absent; the user is expected to discard it.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;
use tracing::warn;

use crate::snapshot::Snapshot;
use crate::vcs::ChangeNumber;

/// File name of the log, relative to the store's directory.
pub const LOG_FILE_NAME: &str = ".p4stack-state.json";

/// Everything needed to resume a paused or interrupted rebase.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OperationLog {
    /// The changelist the fix was applied to (root of the rebase subtree).
    pub base_cl: ChangeNumber,
    /// All changelists to process, parent-first.
    pub stack_to_update: Vec<ChangeNumber>,
    /// Changelists already completed, in processing order.
    pub rebased_cls: Vec<ChangeNumber>,
    /// The changelist whose merge paused awaiting manual resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_cl: Option<ChangeNumber>,
    /// Pre-rebase shelf content of every processed changelist. A child
    /// merged after a pause still needs its parent's content from before
    /// this rebase began as the merge base.
    #[serde(default)]
    pub base_snapshots: BTreeMap<ChangeNumber, Snapshot>,
}

impl OperationLog {
    /// A fresh log for a rebase that is about to start.
    pub fn start(base_cl: ChangeNumber, stack_to_update: Vec<ChangeNumber>) -> Self {
        Self {
            base_cl,
            stack_to_update,
            rebased_cls: vec![],
            conflict_cl: None,
            base_snapshots: BTreeMap::new(),
        }
    }
}

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum OpLogError {
    #[error("Cannot access operation log {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Loads and saves the operation log of one working directory.
///
/// At most one rebase may be in progress per directory; the store does no
/// locking, the engine refuses to start while a log exists.
#[derive(Clone, Debug)]
pub struct OpLogStore {
    path: PathBuf,
}

impl OpLogStore {
    /// A store rooted at `dir` (conventionally the process's working
    /// directory).
    pub fn new_in(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(LOG_FILE_NAME),
        }
    }

    /// Path of the log file, whether or not it exists.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a log file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Atomically replaces the log file with `log`.
    pub fn save(&self, log: &OperationLog) -> Result<(), OpLogError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let io_error = |source| OpLogError::Io {
            path: self.path.clone(),
            source,
        };
        let mut temp_file = NamedTempFile::new_in(dir).map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            temp_file
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_error)?;
        }
        let json = serde_json::to_vec_pretty(log).expect("log should serialize");
        temp_file.write_all(&json).map_err(io_error)?;
        // Flush content before the rename so a crash can't persist an empty
        // file under the final name.
        temp_file.as_file().sync_data().map_err(io_error)?;
        temp_file
            .persist(&self.path)
            .map_err(|PersistError { error, file: _ }| io_error(error))?;
        Ok(())
    }

    /// Reads the log, or `None` if there is none or it doesn't parse.
    pub fn load(&self) -> Result<Option<OperationLog>, OpLogError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(OpLogError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        match serde_json::from_slice(&data) {
            Ok(log) => Ok(Some(log)),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "discarding unparsable operation log");
                Ok(None)
            }
        }
    }

    /// Deletes the log file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), OpLogError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OpLogError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn example_log() -> OperationLog {
        let mut log = OperationLog::start(100, vec![100, 101, 102]);
        log.rebased_cls.push(100);
        log.conflict_cl = Some(101);
        log.base_snapshots.insert(
            100,
            [("foo.txt".to_owned(), "A\n".into())].into_iter().collect(),
        );
        log
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = OpLogStore::new_in(temp_dir.path());
        assert!(!store.exists());

        let log = example_log();
        store.save(&log).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), Some(log));
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = OpLogStore::new_in(temp_dir.path());
        assert_matches!(store.load(), Ok(None));
    }

    #[test]
    fn test_load_partial_file_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = OpLogStore::new_in(temp_dir.path());
        fs::write(store.path(), b"{\"base_cl\": 100, \"stack_to").unwrap();
        assert_matches!(store.load(), Ok(None));
    }

    #[test]
    fn test_clear_missing_is_ok() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = OpLogStore::new_in(temp_dir.path());
        store.clear().unwrap();

        store.save(&example_log()).unwrap();
        store.clear().unwrap();
        assert!(!store.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_log_file_is_private() {
        use std::os::unix::fs::PermissionsExt as _;

        let temp_dir = tempfile::tempdir().unwrap();
        let store = OpLogStore::new_in(temp_dir.path());
        store.save(&example_log()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
