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

//! Command-layer error type and exit-code mapping.
//!
//! Library errors are classified rather than matched on type identity: an
//! expired server session renders guidance and exits 0 (the user has to act,
//! nothing failed), everything else is a failure with exit code 1.

use std::error;
use std::io;
use std::io::Write as _;
use std::process::ExitCode;

use p4stack_lib::editor::EditorError;
use p4stack_lib::merge::MergeError;
use p4stack_lib::op_log::OpLogError;
use p4stack_lib::rebase::RebaseError;
use p4stack_lib::snapshot::SnapshotError;
use p4stack_lib::swarm::SwarmError;
use p4stack_lib::vcs::VcsError;

use crate::ui::Ui;

type BoxedError = Box<dyn error::Error + Send + Sync>;

/// How the process should end for an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandErrorKind {
    /// The user asked for something that can't be done; exit 1.
    User,
    /// Something unexpected broke; exit 1.
    Internal,
    /// The server session expired; guidance is printed and the process
    /// exits 0.
    LoginRequired,
}

/// Error of a whole command, with optional hints for the user.
#[derive(Debug)]
pub struct CommandError {
    pub(crate) kind: CommandErrorKind,
    pub(crate) error: BoxedError,
    pub(crate) hints: Vec<String>,
}

impl CommandError {
    pub(crate) fn new(kind: CommandErrorKind, error: impl Into<BoxedError>) -> Self {
        Self {
            kind,
            error: error.into(),
            hints: vec![],
        }
    }

    pub(crate) fn hinted(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// An error caused by the user's request or environment.
pub fn user_error(error: impl Into<BoxedError>) -> CommandError {
    CommandError::new(CommandErrorKind::User, error)
}

/// A user error with a suggestion on how to proceed.
pub fn user_error_with_hint(
    error: impl Into<BoxedError>,
    hint: impl Into<String>,
) -> CommandError {
    user_error(error).hinted(hint)
}

/// An unexpected failure inside the tool.
pub fn internal_error(error: impl Into<BoxedError>) -> CommandError {
    CommandError::new(CommandErrorKind::Internal, error)
}

fn from_vcs_error(err: VcsError) -> CommandError {
    match err {
        VcsError::LoginRequired => CommandError::new(CommandErrorKind::LoginRequired, err)
            .hinted("Run 'p4 login' and retry"),
        err => user_error(err),
    }
}

impl From<VcsError> for CommandError {
    fn from(err: VcsError) -> Self {
        from_vcs_error(err)
    }
}

impl From<RebaseError> for CommandError {
    fn from(err: RebaseError) -> Self {
        if matches!(err.as_vcs(), Some(VcsError::LoginRequired)) {
            return CommandError::new(CommandErrorKind::LoginRequired, err)
                .hinted("Run 'p4 login' and retry; the update can be resumed with --continue");
        }
        match err {
            RebaseError::LogExists => user_error_with_hint(
                err,
                "Run 'p4stack update --continue', or delete the state file to abandon the \
                 in-flight update",
            ),
            RebaseError::NoLog => {
                user_error_with_hint(err, "Start an update with 'p4stack update <change>'")
            }
            RebaseError::ChangeNotInStack(_) => user_error(err),
            err => user_error(err),
        }
    }
}

impl From<SnapshotError> for CommandError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Vcs(err) | SnapshotError::ReadFailed { source: err, .. } => {
                from_vcs_error(err)
            }
            err => user_error(err),
        }
    }
}

impl From<MergeError> for CommandError {
    fn from(err: MergeError) -> Self {
        user_error(err)
    }
}

impl From<EditorError> for CommandError {
    fn from(err: EditorError) -> Self {
        user_error(err)
    }
}

impl From<OpLogError> for CommandError {
    fn from(err: OpLogError) -> Self {
        internal_error(err)
    }
}

impl From<SwarmError> for CommandError {
    fn from(err: SwarmError) -> Self {
        user_error(err)
    }
}

impl From<io::Error> for CommandError {
    fn from(err: io::Error) -> Self {
        internal_error(err)
    }
}

fn print_error_chain(ui: &Ui, heading_error: &BoxedError) {
    let mut source = heading_error.source();
    while let Some(err) = source {
        writeln!(ui.status(), "Caused by: {err}").ok();
        source = err.source();
    }
}

/// Renders the outcome of a command and picks the process exit code.
pub fn handle_command_result(ui: &Ui, result: Result<(), CommandError>) -> ExitCode {
    let Err(err) = result else {
        return ExitCode::SUCCESS;
    };
    match err.kind {
        CommandErrorKind::LoginRequired => {
            writeln!(ui.warning(), "{}", err.error).ok();
            for hint in &err.hints {
                writeln!(ui.hint(), "{hint}").ok();
            }
            // An expired session is a detour, not a failure.
            ExitCode::SUCCESS
        }
        CommandErrorKind::User => {
            writeln!(ui.error(), "{}", err.error).ok();
            print_error_chain(ui, &err.error);
            for hint in &err.hints {
                writeln!(ui.hint(), "{hint}").ok();
            }
            ExitCode::FAILURE
        }
        CommandErrorKind::Internal => {
            writeln!(ui.error(), "Internal error: {}", err.error).ok();
            print_error_chain(ui, &err.error);
            ExitCode::FAILURE
        }
    }
}
