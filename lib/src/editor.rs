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

//! Launching the user's text editor over workspace files.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

const DEFAULT_EDITOR: &str = "vi";

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum EditorError {
    #[error("Editor '{program}' not found. Check $EDITOR")]
    NotFound { program: String },
    #[error("Editor '{program}' exited with an error")]
    Failed { program: String },
    #[error("Could not run editor '{program}'")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// The user's text editor, run as one blocking subprocess with inherited
/// stdio.
#[derive(Clone, Debug)]
pub struct TextEditor {
    program: String,
    args: Vec<String>,
}

impl TextEditor {
    /// Resolves the editor from `$EDITOR`, falling back to `vi`. The value
    /// is split on whitespace so editors invoked with flags (e.g.
    /// `"code --wait"`) work.
    pub fn from_env() -> Self {
        match std::env::var("EDITOR") {
            Ok(value) if !value.trim().is_empty() => Self::from_command_line(&value),
            _ => Self::with_program(DEFAULT_EDITOR),
        }
    }

    /// An editor invoked as `program` with no extra arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    fn from_command_line(value: &str) -> Self {
        let mut words = value.split_whitespace().map(str::to_owned);
        let program = words.next().unwrap_or_else(|| DEFAULT_EDITOR.to_owned());
        Self {
            program,
            args: words.collect(),
        }
    }

    /// Opens all `paths` in the editor and waits for it to exit.
    pub fn edit_files(&self, paths: &[PathBuf]) -> Result<(), EditorError> {
        debug!(program = %self.program, ?paths, "launching editor");
        let status = Command::new(&self.program)
            .args(&self.args)
            .args(paths)
            .status()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => EditorError::NotFound {
                    program: self.program.clone(),
                },
                _ => EditorError::Io {
                    program: self.program.clone(),
                    source: err,
                },
            })?;
        if !status.success() {
            return Err(EditorError::Failed {
                program: self.program.clone(),
            });
        }
        Ok(())
    }
}
