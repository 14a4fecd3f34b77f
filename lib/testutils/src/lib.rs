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

#![expect(missing_docs)]

//! Test scaffolding: an in-memory Perforce-style server with a temp-dir
//! client workspace, plus a scripted stand-in for `$EDITOR`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use bstr::BString;
use p4stack_lib::vcs::ChangeNumber;
use p4stack_lib::vcs::ChangeStatus;
use p4stack_lib::vcs::DescribedChange;
use p4stack_lib::vcs::OpenedFile;
use p4stack_lib::vcs::PendingChange;
use p4stack_lib::vcs::PrintEntry;
use p4stack_lib::vcs::ShelveMode;
use p4stack_lib::vcs::VcsClient;
use p4stack_lib::vcs::VcsError;
use tempfile::TempDir;

pub const TEST_USER: &str = "test-user";

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("p4stack-test-")
        .tempdir()
        .unwrap()
}

/// Writes an executable shell script to stand in for `$EDITOR`. The script
/// receives the opened files as arguments.
pub fn write_editor_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-editor.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum OpenAction {
    Edit,
    Delete,
}

#[derive(Clone, Debug)]
struct OpenedState {
    /// `None` models the default changelist.
    change: Option<ChangeNumber>,
    action: OpenAction,
}

#[derive(Clone, Debug)]
struct ChangeState {
    description: String,
    status: ChangeStatus,
    /// Depot path → shelved content.
    shelf: BTreeMap<String, BString>,
}

#[derive(Default)]
struct ServerState {
    changes: BTreeMap<ChangeNumber, ChangeState>,
    /// Depot path → how the workspace has it opened.
    opened: BTreeMap<String, OpenedState>,
}

/// An in-memory [`VcsClient`] good enough for the engine: pending changes
/// with shelves, an opened-file table, and real files under a temp-dir
/// client root so editors and snapshot writes exercise actual I/O.
pub struct TestVcs {
    temp_dir: TempDir,
    state: RefCell<ServerState>,
}

impl Default for TestVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl TestVcs {
    pub fn new() -> Self {
        Self {
            temp_dir: new_temp_dir(),
            state: RefCell::new(ServerState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn client_path(&self, depot_path: &str) -> PathBuf {
        self.root().join(depot_path.trim_start_matches('/'))
    }

    /// Registers a pending changelist with a fixed number.
    pub fn add_pending_change(&self, number: ChangeNumber, description: &str) {
        self.state.borrow_mut().changes.insert(
            number,
            ChangeState {
                description: description.to_owned(),
                status: ChangeStatus::Pending,
                shelf: BTreeMap::new(),
            },
        );
    }

    /// Registers a submitted changelist (graph builds must ignore it).
    pub fn add_submitted_change(&self, number: ChangeNumber, description: &str) {
        self.state.borrow_mut().changes.insert(
            number,
            ChangeState {
                description: description.to_owned(),
                status: ChangeStatus::Submitted,
                shelf: BTreeMap::new(),
            },
        );
    }

    /// Puts a file into a changelist's shelf, bypassing the workspace.
    pub fn shelve_file(&self, change: ChangeNumber, depot_path: &str, content: impl Into<BString>) {
        let mut state = self.state.borrow_mut();
        let change_state = state.changes.get_mut(&change).expect("change should exist");
        change_state
            .shelf
            .insert(depot_path.to_owned(), content.into());
    }

    /// Removes a file from a changelist's shelf, bypassing the workspace.
    pub fn unshelve_file(&self, change: ChangeNumber, depot_path: &str) {
        let mut state = self.state.borrow_mut();
        let change_state = state.changes.get_mut(&change).expect("change should exist");
        change_state.shelf.remove(depot_path);
    }

    /// The full shelf of a changelist, keyed by depot path.
    pub fn shelf(&self, change: ChangeNumber) -> BTreeMap<String, BString> {
        self.state.borrow().changes[&change].shelf.clone()
    }

    pub fn shelf_content(&self, change: ChangeNumber, depot_path: &str) -> Option<BString> {
        self.state.borrow().changes[&change]
            .shelf
            .get(depot_path)
            .cloned()
    }

    pub fn change_description(&self, change: ChangeNumber) -> String {
        self.state.borrow().changes[&change].description.clone()
    }

    pub fn change_exists(&self, change: ChangeNumber) -> bool {
        self.state.borrow().changes.contains_key(&change)
    }

    /// Depot paths currently opened anywhere in the workspace.
    pub fn opened_paths(&self) -> Vec<String> {
        self.state.borrow().opened.keys().cloned().collect()
    }

    /// Opens a file in the default changelist with the given workspace
    /// content, as `p4 edit`/`p4 add` would.
    pub fn open_in_default(&self, depot_path: &str, content: impl Into<BString>) {
        let path = self.client_path(depot_path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content.into()).unwrap();
        self.state.borrow_mut().opened.insert(
            depot_path.to_owned(),
            OpenedState {
                change: None,
                action: OpenAction::Edit,
            },
        );
    }

    fn next_change_number(&self) -> ChangeNumber {
        self.state
            .borrow()
            .changes
            .keys()
            .next_back()
            .map_or(1000, |number| number + 1)
    }

    fn remove_workspace_file(&self, depot_path: &str) {
        let _ = fs::remove_file(self.client_path(depot_path));
    }
}

impl VcsClient for TestVcs {
    fn user(&self) -> &str {
        TEST_USER
    }

    fn list_pending_changes(&self) -> Result<Vec<PendingChange>, VcsError> {
        Ok(self
            .state
            .borrow()
            .changes
            .iter()
            .filter(|(_, change)| change.status == ChangeStatus::Pending)
            .map(|(&number, change)| PendingChange {
                number,
                description: change.description.clone(),
            })
            .collect())
    }

    fn describe(&self, change: ChangeNumber) -> Result<DescribedChange, VcsError> {
        let state = self.state.borrow();
        let change_state = state.changes.get(&change).ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        Ok(DescribedChange {
            number: change,
            description: change_state.description.clone(),
            status: change_state.status,
        })
    }

    fn create_change(&self, description: &str) -> Result<ChangeNumber, VcsError> {
        let number = self.next_change_number();
        self.add_pending_change(number, description);
        Ok(number)
    }

    fn delete_change(&self, change: ChangeNumber) -> Result<(), VcsError> {
        let mut state = self.state.borrow_mut();
        match state.changes.get(&change) {
            Some(change_state) if change_state.status == ChangeStatus::Pending => {
                state.changes.remove(&change);
                Ok(())
            }
            Some(_) => Err(VcsError::failed(format!(
                "Changelist {change} is not pending"
            ))),
            None => Err(VcsError::NotFound {
                message: format!("Changelist {change} not found"),
            }),
        }
    }

    fn update_description(
        &self,
        change: ChangeNumber,
        description: &str,
    ) -> Result<(), VcsError> {
        let mut state = self.state.borrow_mut();
        let change_state = state.changes.get_mut(&change).ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        change_state.description = description.to_owned();
        Ok(())
    }

    fn submit_change(&self, change: ChangeNumber) -> Result<ChangeNumber, VcsError> {
        let submitted_as = self.next_change_number();
        let mut state = self.state.borrow_mut();
        let mut change_state = state.changes.remove(&change).ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        change_state.status = ChangeStatus::Submitted;
        change_state.shelf.clear();
        state.changes.insert(submitted_as, change_state);
        Ok(submitted_as)
    }

    fn is_shelved(&self, change: ChangeNumber) -> Result<bool, VcsError> {
        Ok(!self.state.borrow().changes[&change].shelf.is_empty())
    }

    fn shelve(&self, change: ChangeNumber, mode: ShelveMode) -> Result<(), VcsError> {
        match mode {
            ShelveMode::Replace => {
                let opened: Vec<(String, OpenAction)> = {
                    let state = self.state.borrow();
                    state
                        .opened
                        .iter()
                        .filter(|(_, opened)| opened.change == Some(change))
                        .map(|(depot_path, opened)| (depot_path.clone(), opened.action))
                        .collect()
                };
                for (depot_path, action) in opened {
                    match action {
                        OpenAction::Edit => {
                            let content = fs::read(self.client_path(&depot_path))
                                .map_err(|err| VcsError::failed_with(
                                    format!("Missing workspace file {depot_path}"),
                                    err,
                                ))?;
                            let mut state = self.state.borrow_mut();
                            let change_state =
                                state.changes.get_mut(&change).expect("change should exist");
                            change_state.shelf.insert(depot_path, content.into());
                        }
                        OpenAction::Delete => {
                            let mut state = self.state.borrow_mut();
                            let change_state =
                                state.changes.get_mut(&change).expect("change should exist");
                            change_state.shelf.remove(&depot_path);
                        }
                    }
                }
            }
            ShelveMode::Delete => {
                let mut state = self.state.borrow_mut();
                let change_state = state.changes.get_mut(&change).ok_or_else(|| {
                    VcsError::NotFound {
                        message: format!("Changelist {change} not found"),
                    }
                })?;
                change_state.shelf.clear();
            }
        }
        Ok(())
    }

    fn unshelve(
        &self,
        source: ChangeNumber,
        target: ChangeNumber,
        _force: bool,
    ) -> Result<(), VcsError> {
        let shelf = self.shelf(source);
        for (depot_path, content) in shelf {
            let path = self.client_path(&depot_path);
            fs::create_dir_all(path.parent().expect("client path should have a parent"))
                .and_then(|()| fs::write(&path, &content))
                .map_err(|err| {
                    VcsError::failed_with(format!("Could not materialize {depot_path}"), err)
                })?;
            self.state.borrow_mut().opened.insert(
                depot_path,
                OpenedState {
                    change: Some(target),
                    action: OpenAction::Edit,
                },
            );
        }
        Ok(())
    }

    fn revert_change(&self, change: ChangeNumber) -> Result<(), VcsError> {
        let reverted: Vec<String> = {
            let mut state = self.state.borrow_mut();
            let paths: Vec<String> = state
                .opened
                .iter()
                .filter(|(_, opened)| opened.change == Some(change))
                .map(|(depot_path, _)| depot_path.clone())
                .collect();
            for depot_path in &paths {
                state.opened.remove(depot_path);
            }
            paths
        };
        for depot_path in reverted {
            self.remove_workspace_file(&depot_path);
        }
        Ok(())
    }

    fn revert_all(&self) -> Result<(), VcsError> {
        let reverted: Vec<String> = {
            let mut state = self.state.borrow_mut();
            let paths: Vec<String> = state.opened.keys().cloned().collect();
            state.opened.clear();
            paths
        };
        for depot_path in reverted {
            self.remove_workspace_file(&depot_path);
        }
        Ok(())
    }

    fn open_for_edit(
        &self,
        change: ChangeNumber,
        depot_paths: &[String],
    ) -> Result<(), VcsError> {
        let mut state = self.state.borrow_mut();
        for depot_path in depot_paths {
            state.opened.insert(
                depot_path.clone(),
                OpenedState {
                    change: Some(change),
                    action: OpenAction::Edit,
                },
            );
        }
        Ok(())
    }

    fn open_for_delete(
        &self,
        change: ChangeNumber,
        depot_paths: &[String],
    ) -> Result<(), VcsError> {
        for depot_path in depot_paths {
            self.state.borrow_mut().opened.insert(
                depot_path.clone(),
                OpenedState {
                    change: Some(change),
                    action: OpenAction::Delete,
                },
            );
            self.remove_workspace_file(depot_path);
        }
        Ok(())
    }

    fn where_is(&self, depot_path: &str) -> Result<PathBuf, VcsError> {
        Ok(self.client_path(depot_path))
    }

    fn print_at(&self, change: ChangeNumber) -> Result<Vec<PrintEntry>, VcsError> {
        let state = self.state.borrow();
        let change_state = state.changes.get(&change).ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        Ok(change_state
            .shelf
            .iter()
            .map(|(depot_path, content)| PrintEntry {
                depot_path: depot_path.clone(),
                content: content.clone(),
            })
            .collect())
    }

    fn opened(&self, change: ChangeNumber) -> Result<Vec<OpenedFile>, VcsError> {
        Ok(self
            .state
            .borrow()
            .opened
            .iter()
            .filter(|(_, opened)| opened.change == Some(change))
            .map(|(depot_path, _)| OpenedFile {
                depot_path: depot_path.clone(),
            })
            .collect())
    }

    fn opened_in_default(&self) -> Result<Vec<OpenedFile>, VcsError> {
        Ok(self
            .state
            .borrow()
            .opened
            .iter()
            .filter(|(_, opened)| opened.change.is_none())
            .map(|(depot_path, _)| OpenedFile {
                depot_path: depot_path.clone(),
            })
            .collect())
    }

    fn reopen(&self, change: ChangeNumber, depot_paths: &[String]) -> Result<(), VcsError> {
        let mut state = self.state.borrow_mut();
        for depot_path in depot_paths {
            if let Some(opened) = state.opened.get_mut(depot_path) {
                opened.change = Some(change);
            }
        }
        Ok(())
    }
}
