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

//! Reading and writing shelved changelist content as in-memory snapshots.
//!
//! A snapshot is keyed by file basename because that is the identity the
//! three-way merger and the local scratch space work with. The companion
//! [`FileToDepot`] map travels with every snapshot so edits can be
//! re-materialized on the server.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use bstr::BString;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;

use crate::vcs::ChangeNumber;
use crate::vcs::ShelveMode;
use crate::vcs::VcsClient;
use crate::vcs::VcsError;

/// Basename → file content of one changelist's shelf.
pub type Snapshot = BTreeMap<String, BString>;

/// Basename → full depot path, companion of a [`Snapshot`].
pub type FileToDepot = BTreeMap<String, String>;

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read shelved files of change {change}")]
    ReadFailed {
        change: ChangeNumber,
        #[source]
        source: VcsError,
    },
    #[error("Change {change} shelves more than one file named '{basename}'")]
    BasenameCollision {
        change: ChangeNumber,
        basename: String,
    },
    #[error("No depot path known for file '{basename}' in change {change}")]
    UnknownDepotPath {
        change: ChangeNumber,
        basename: String,
    },
    #[error("Cannot write {path}")]
    WriteLocal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// Fetches the content of every file shelved in `change`.
///
/// An empty or never-shelved changelist yields empty maps.
pub fn read_snapshot(
    vcs: &dyn VcsClient,
    change: ChangeNumber,
) -> Result<(Snapshot, FileToDepot), SnapshotError> {
    let entries = vcs
        .print_at(change)
        .map_err(|source| SnapshotError::ReadFailed { change, source })?;
    let mut snapshot = Snapshot::new();
    let mut file_to_depot = FileToDepot::new();
    for entry in entries {
        // The server may quote depot paths containing special characters.
        let depot_path = entry
            .depot_path
            .trim_matches(|c| c == '\'' || c == '"')
            .to_owned();
        let basename = depot_path
            .rsplit('/')
            .next()
            .unwrap_or(depot_path.as_str())
            .to_owned();
        if snapshot.contains_key(&basename) {
            return Err(SnapshotError::BasenameCollision { change, basename });
        }
        snapshot.insert(basename.clone(), entry.content);
        file_to_depot.insert(basename, depot_path);
    }
    Ok((snapshot, file_to_depot))
}

/// Updates the shelf of `change` to contain exactly `desired`.
///
/// `previous` must be the shelf content the caller last observed; the diff
/// between the two decides which files are opened for edit, add or delete.
/// The workspace is reverted on entry and on every exit path: only the shelf
/// is a committed artifact, and a crash mid-write is repaired by the revert
/// at the start of the next invocation.
#[instrument(skip_all, fields(change = change))]
pub fn write_snapshot(
    vcs: &dyn VcsClient,
    change: ChangeNumber,
    desired: &Snapshot,
    previous: &Snapshot,
    file_to_depot: &FileToDepot,
) -> Result<(), SnapshotError> {
    vcs.revert_change(change)?;
    let result = write_snapshot_inner(vcs, change, desired, previous, file_to_depot);
    let reverted = vcs.revert_change(change);
    result?;
    reverted?;
    Ok(())
}

fn write_snapshot_inner(
    vcs: &dyn VcsClient,
    change: ChangeNumber,
    desired: &Snapshot,
    previous: &Snapshot,
    file_to_depot: &FileToDepot,
) -> Result<(), SnapshotError> {
    let to_write: Vec<&str> = desired
        .iter()
        .filter(|&(basename, content)| previous.get(basename) != Some(content))
        .map(|(basename, _)| basename.as_str())
        .collect();
    let to_delete: Vec<&str> = previous
        .keys()
        .filter(|basename| !desired.contains_key(*basename))
        .map(String::as_str)
        .collect();
    debug!(?to_write, ?to_delete, "updating shelf");

    if !to_write.is_empty() {
        let depot_paths = depot_paths_for(change, &to_write, file_to_depot)?;
        vcs.open_for_edit(change, &depot_paths)?;
        for (basename, depot_path) in to_write.iter().zip(&depot_paths) {
            let local_path = vcs.where_is(depot_path)?;
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).map_err(|source| SnapshotError::WriteLocal {
                    path: parent.to_owned(),
                    source,
                })?;
            }
            let content = &desired[*basename];
            fs::write(&local_path, content).map_err(|source| SnapshotError::WriteLocal {
                path: local_path.clone(),
                source,
            })?;
        }
    }

    if !to_delete.is_empty() {
        let depot_paths = depot_paths_for(change, &to_delete, file_to_depot)?;
        vcs.open_for_delete(change, &depot_paths)?;
    }

    if to_write.is_empty() && to_delete.is_empty() {
        return Ok(());
    }
    if desired.is_empty() && !previous.is_empty() {
        vcs.shelve(change, ShelveMode::Delete)?;
    } else {
        vcs.shelve(change, ShelveMode::Replace)?;
    }
    Ok(())
}

fn depot_paths_for(
    change: ChangeNumber,
    basenames: &[&str],
    file_to_depot: &FileToDepot,
) -> Result<Vec<String>, SnapshotError> {
    basenames
        .iter()
        .map(|&basename| {
            file_to_depot
                .get(basename)
                .cloned()
                .ok_or_else(|| SnapshotError::UnknownDepotPath {
                    change,
                    basename: basename.to_owned(),
                })
        })
        .collect()
}
