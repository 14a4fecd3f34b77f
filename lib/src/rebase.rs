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

//! The rebase engine: propagating a fix at the base of a stack through all
//! of its descendants.
//!
//! The engine walks the descendant chain parent-first. The base changelist
//! is edited in the user's editor; every descendant is re-derived by a
//! three-way merge of its own shelf (`ours`) against its parent's updated
//! shelf (`theirs`) with the parent's pre-rebase shelf as `base`, restricted
//! to the files the descendant owns. Progress is recorded in the operation
//! log after every completed changelist, so a conflict pause or a crash can
//! be resumed with `continue`.

use bstr::ByteSlice as _;
use itertools::Itertools as _;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::editor::EditorError;
use crate::editor::TextEditor;
use crate::graph::StackGraph;
use crate::merge;
use crate::merge::MergeError;
use crate::op_log::OpLogError;
use crate::op_log::OpLogStore;
use crate::op_log::OperationLog;
use crate::snapshot;
use crate::snapshot::Snapshot;
use crate::snapshot::SnapshotError;
use crate::vcs::ChangeNumber;
use crate::vcs::ShelveMode;
use crate::vcs::VcsClient;
use crate::vcs::VcsError;

/// How a rebase run ended, short of an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RebaseStatus {
    /// Every changelist in the stack was processed; the log is gone.
    Done {
        /// The changelists processed, in order.
        rebased: Vec<ChangeNumber>,
    },
    /// A merge needs manual resolution; the log records where to resume.
    Conflict {
        /// The changelist whose shelf now carries conflict markers.
        change: ChangeNumber,
    },
}

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum RebaseError {
    #[error("An update is already in progress (operation log found)")]
    LogExists,
    #[error("No update is in progress (no operation log found)")]
    NoLog,
    #[error("Change {0} is not in your pending stacks")]
    ChangeNotInStack(ChangeNumber),
    #[error(
        "Operation log has no pre-rebase snapshot of change {change}; discard the log and \
         start over"
    )]
    MissingBaseSnapshot { change: ChangeNumber },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    OpLog(#[from] OpLogError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

impl RebaseError {
    /// The underlying server error, if that's what this is.
    pub fn as_vcs(&self) -> Option<&VcsError> {
        match self {
            Self::Vcs(err)
            | Self::Snapshot(SnapshotError::Vcs(err))
            | Self::Snapshot(SnapshotError::ReadFailed { source: err, .. }) => Some(err),
            _ => None,
        }
    }
}

/// Orchestrates snapshots, merges, the stack graph and the operation log
/// into the resumable stack update.
pub struct RebaseEngine<'a> {
    vcs: &'a dyn VcsClient,
    log_store: OpLogStore,
    editor: TextEditor,
}

impl<'a> RebaseEngine<'a> {
    #[expect(missing_docs)]
    pub fn new(vcs: &'a dyn VcsClient, log_store: OpLogStore, editor: TextEditor) -> Self {
        Self {
            vcs,
            log_store,
            editor,
        }
    }

    /// Applies a fix to `base_cl` (via the editor) and propagates it to all
    /// descendants.
    ///
    /// Refuses to start while an operation log exists.
    #[instrument(skip_all, fields(base_cl = base_cl))]
    pub fn rebase_stack(&self, base_cl: ChangeNumber) -> Result<RebaseStatus, RebaseError> {
        if self.log_store.exists() {
            return Err(RebaseError::LogExists);
        }
        let graph = self.build_graph()?;
        if !graph.contains(base_cl) {
            return Err(RebaseError::ChangeNotInStack(base_cl));
        }
        let order = graph.descendants(base_cl);
        debug!(?order, "starting stack update");
        let mut log = OperationLog::start(base_cl, order);
        self.log_store.save(&log)?;
        self.run_loop(&mut log, &graph)
    }

    /// Resumes a paused or interrupted rebase.
    ///
    /// If the log records a conflicted changelist, the user is assumed to
    /// have rewritten its shelf without markers; it is counted as done and
    /// the walk continues with the remaining changelists.
    #[instrument(skip_all)]
    pub fn continue_rebase(&self) -> Result<RebaseStatus, RebaseError> {
        let mut log = self.log_store.load()?.ok_or(RebaseError::NoLog)?;
        let graph = self.build_graph()?;
        if let Some(change) = log.conflict_cl.take() {
            let (resolved, _) = snapshot::read_snapshot(self.vcs, change)?;
            if resolved
                .values()
                .any(|content| content.contains_str("<<<<<<<"))
            {
                warn!(change, "shelf still contains conflict markers");
            }
            log.rebased_cls.push(change);
            self.log_store.save(&log)?;
        }
        self.run_loop(&mut log, &graph)
    }

    fn build_graph(&self) -> Result<StackGraph, RebaseError> {
        let changes = self.vcs.list_pending_changes()?;
        Ok(StackGraph::build(&changes))
    }

    fn run_loop(
        &self,
        log: &mut OperationLog,
        graph: &StackGraph,
    ) -> Result<RebaseStatus, RebaseError> {
        let result = self.run_loop_inner(log, graph);
        if result.is_err() {
            // Fatal path: leave the log for `continue`, but never leave
            // files opened in the workspace.
            if let Err(revert_err) = self.vcs.revert_all() {
                warn!(%revert_err, "could not revert workspace after failure");
            }
        }
        result
    }

    fn run_loop_inner(
        &self,
        log: &mut OperationLog,
        graph: &StackGraph,
    ) -> Result<RebaseStatus, RebaseError> {
        let pending = log
            .stack_to_update
            .iter()
            .copied()
            .filter(|change| !log.rebased_cls.contains(change))
            .collect_vec();
        for change in pending {
            self.vcs.revert_all()?;
            if change == log.base_cl {
                self.edit_base(log, change)?;
            } else {
                let has_conflict = self.rebase_child(log, graph, change)?;
                if has_conflict {
                    log.conflict_cl = Some(change);
                    self.log_store.save(log)?;
                    return Ok(RebaseStatus::Conflict { change });
                }
            }
            log.rebased_cls.push(change);
            self.log_store.save(log)?;
        }
        self.log_store.clear()?;
        Ok(RebaseStatus::Done {
            rebased: log.rebased_cls.clone(),
        })
    }

    /// The "fix" step: unshelve the base changelist into itself, let the
    /// user edit the files, and shelve the result back.
    fn edit_base(&self, log: &mut OperationLog, change: ChangeNumber) -> Result<(), RebaseError> {
        let (before, _) = snapshot::read_snapshot(self.vcs, change)?;
        self.vcs.unshelve(change, change, false)?;
        let opened = self.vcs.opened(change)?;
        let mut local_paths = Vec::with_capacity(opened.len());
        for file in &opened {
            local_paths.push(self.vcs.where_is(&file.depot_path)?);
        }
        if local_paths.is_empty() {
            debug!(change, "no files opened, skipping editor");
        } else {
            self.editor.edit_files(&local_paths)?;
            self.vcs.shelve(change, ShelveMode::Replace)?;
        }
        log.base_snapshots.insert(change, before);
        self.vcs.revert_change(change)?;
        Ok(())
    }

    /// Re-derives one descendant's shelf on top of its updated parent.
    /// Returns whether the merged shelf carries conflict markers.
    fn rebase_child(
        &self,
        log: &mut OperationLog,
        graph: &StackGraph,
        change: ChangeNumber,
    ) -> Result<bool, RebaseError> {
        if !graph.contains(change) {
            return Err(RebaseError::ChangeNotInStack(change));
        }
        let parent = graph
            .parent_of(change)
            .ok_or(RebaseError::ChangeNotInStack(change))?;
        let old_parent = log
            .base_snapshots
            .get(&parent)
            .cloned()
            .ok_or(RebaseError::MissingBaseSnapshot { change: parent })?;
        let (new_parent, _) = snapshot::read_snapshot(self.vcs, parent)?;
        let (child, child_map) = snapshot::read_snapshot(self.vcs, change)?;

        // The child's shelf carries only its own delta, so files touched by
        // the parent alone must not leak in: both parent sides are
        // restricted to the basenames the child owns.
        let restrict = |parent_side: &Snapshot| -> Snapshot {
            child
                .keys()
                .filter_map(|basename| {
                    parent_side
                        .get(basename)
                        .map(|content| (basename.clone(), content.clone()))
                })
                .collect()
        };
        let base = restrict(&old_parent);
        let theirs = restrict(&new_parent);
        debug!(change, parent, files = child.len(), "merging descendant");

        let merged = merge::merge_folders(&base, &child, &theirs)?;
        let has_conflict = merged.values().any(|result| result.has_conflict);
        let desired: Snapshot = merged
            .into_iter()
            .map(|(basename, result)| (basename, result.content))
            .collect();
        snapshot::write_snapshot(self.vcs, change, &desired, &child, &child_map)?;
        log.base_snapshots.insert(change, child);
        Ok(has_conflict)
    }
}
