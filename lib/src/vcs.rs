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

//! The thin typed surface the core consumes from the version-control server.
//!
//! The engine never talks to a server directly; everything goes through
//! [`VcsClient`]. The production implementation shells out to the `p4`
//! binary, tests substitute an in-memory model.

use std::path::PathBuf;

use bstr::BString;
use thiserror::Error;

/// A server-assigned changelist number.
pub type ChangeNumber = u32;

/// Error kinds surfaced by a [`VcsClient`].
///
/// The engine matches on kind, not on the underlying server message.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The session ticket has expired; the user has to log in again.
    #[error("Server session expired")]
    LoginRequired,
    /// The referenced changelist or file does not exist.
    #[error("{message}")]
    NotFound { message: String },
    /// The server refused the operation until conflicts are resolved
    /// manually (e.g. shelving with unresolved files).
    #[error("{message}")]
    Conflict { message: String },
    /// Any other server-side failure.
    #[error("{message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl VcsError {
    /// Wraps a plain message as an operation failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a message and an underlying cause as an operation failure.
    pub fn failed_with(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::OperationFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// One of the current user's pending changelists, in long-description form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingChange {
    /// The changelist number.
    pub number: ChangeNumber,
    /// The full description text.
    pub description: String,
}

/// Lifecycle state of a changelist.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeStatus {
    /// Open draft; may have shelved files. The only state the core mutates.
    Pending,
    /// Immutable, checked in.
    Submitted,
}

/// Result of describing a single changelist.
#[expect(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescribedChange {
    pub number: ChangeNumber,
    pub description: String,
    pub status: ChangeStatus,
}

/// One shelved file printed at a changelist: its depot path and content.
#[expect(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrintEntry {
    pub depot_path: String,
    pub content: BString,
}

/// A file currently opened in the workspace.
#[expect(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenedFile {
    pub depot_path: String,
}

/// How [`VcsClient::shelve`] should treat existing shelved files.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShelveMode {
    /// Force-replace the shelved copies of the opened files.
    Replace,
    /// Delete all shelved files of the changelist.
    Delete,
}

/// Primitive operations the rebase engine and the commands are built on.
///
/// All calls are synchronous and blocking; each corresponds to a single
/// server round trip and is treated as atomic with respect to engine state.
pub trait VcsClient {
    /// The connected user name.
    fn user(&self) -> &str;

    /// All pending changelists owned by the connected user.
    fn list_pending_changes(&self) -> Result<Vec<PendingChange>, VcsError>;

    /// Description and status of one changelist.
    fn describe(&self, change: ChangeNumber) -> Result<DescribedChange, VcsError>;

    /// Creates a new empty pending changelist and returns its number.
    fn create_change(&self, description: &str) -> Result<ChangeNumber, VcsError>;

    /// Deletes a pending changelist.
    fn delete_change(&self, change: ChangeNumber) -> Result<(), VcsError>;

    /// Replaces the description of a pending changelist.
    fn update_description(
        &self,
        change: ChangeNumber,
        description: &str,
    ) -> Result<(), VcsError>;

    /// Submits a pending changelist, returning the renumbered changelist.
    fn submit_change(&self, change: ChangeNumber) -> Result<ChangeNumber, VcsError>;

    /// Whether the changelist has shelved files.
    fn is_shelved(&self, change: ChangeNumber) -> Result<bool, VcsError>;

    /// Shelves the files opened in `change`, or deletes its shelf.
    fn shelve(&self, change: ChangeNumber, mode: ShelveMode) -> Result<(), VcsError>;

    /// Copies shelved files from `source` into the workspace, opened in
    /// `target`.
    fn unshelve(
        &self,
        source: ChangeNumber,
        target: ChangeNumber,
        force: bool,
    ) -> Result<(), VcsError>;

    /// Reverts all files opened in `change`.
    fn revert_change(&self, change: ChangeNumber) -> Result<(), VcsError>;

    /// Reverts every opened file in the workspace.
    fn revert_all(&self) -> Result<(), VcsError>;

    /// Opens the given depot paths for edit in `change`, batched.
    fn open_for_edit(&self, change: ChangeNumber, depot_paths: &[String])
    -> Result<(), VcsError>;

    /// Opens the given depot paths for delete in `change`, batched.
    fn open_for_delete(
        &self,
        change: ChangeNumber,
        depot_paths: &[String],
    ) -> Result<(), VcsError>;

    /// Maps a depot path to the local client path.
    fn where_is(&self, depot_path: &str) -> Result<PathBuf, VcsError>;

    /// Prints every shelved file at `change`, in server order. An empty
    /// shelf yields an empty list, not an error.
    fn print_at(&self, change: ChangeNumber) -> Result<Vec<PrintEntry>, VcsError>;

    /// Files currently opened in `change`.
    fn opened(&self, change: ChangeNumber) -> Result<Vec<OpenedFile>, VcsError>;

    /// Files currently opened in the default changelist.
    fn opened_in_default(&self) -> Result<Vec<OpenedFile>, VcsError>;

    /// Moves already-opened depot paths into `change`.
    fn reopen(&self, change: ChangeNumber, depot_paths: &[String]) -> Result<(), VcsError>;
}
