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

//! Terminal output and prompting.
//!
//! Status, warnings, errors and hints go to stderr so stdout stays clean
//! for machine-consumable output (the stack listing). Labels are colored
//! only when stderr is a terminal and `NO_COLOR` is unset.

use std::io;
use std::io::IsTerminal as _;
use std::io::Stdout;
use std::io::Write;

use crossterm::style::Color;
use crossterm::style::Stylize as _;

/// Console frontend of the command layer.
#[derive(Clone, Debug)]
pub struct Ui {
    color: bool,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

impl Ui {
    /// A Ui for the current terminal environment.
    pub fn new() -> Self {
        Self {
            color: io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }

    /// Stdout, for the actual command output.
    pub fn stdout(&self) -> Stdout {
        io::stdout()
    }

    /// Plain progress/status output.
    pub fn status(&self) -> LabeledWriter {
        LabeledWriter::new(self.color, None)
    }

    /// Output prefixed with a yellow "Warning: " heading.
    pub fn warning(&self) -> LabeledWriter {
        LabeledWriter::new(self.color, Some(("Warning: ", Color::Yellow)))
    }

    /// Output prefixed with a red "Error: " heading.
    pub fn error(&self) -> LabeledWriter {
        LabeledWriter::new(self.color, Some(("Error: ", Color::Red)))
    }

    /// Output prefixed with a cyan "Hint: " heading.
    pub fn hint(&self) -> LabeledWriter {
        LabeledWriter::new(self.color, Some(("Hint: ", Color::Cyan)))
    }

    /// Asks a yes/no question on stderr. Returns `default` when stdin is
    /// not interactive or the user just presses enter.
    pub fn prompt_yes_no(&self, prompt: &str, default: bool) -> io::Result<bool> {
        if !io::stdin().is_terminal() {
            return Ok(default);
        }
        let choices = if default { "[Y/n]" } else { "[y/N]" };
        let mut stderr = io::stderr();
        write!(stderr, "{prompt} {choices}: ")?;
        stderr.flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        Ok(match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        })
    }
}

/// Stderr writer that emits an optional colored heading before the first
/// byte written through it.
pub struct LabeledWriter {
    color: bool,
    label: Option<(&'static str, Color)>,
    started: bool,
}

impl LabeledWriter {
    fn new(color: bool, label: Option<(&'static str, Color)>) -> Self {
        Self {
            color,
            label,
            started: false,
        }
    }
}

impl Write for LabeledWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr();
        if !self.started {
            self.started = true;
            if let Some((label, color)) = self.label {
                if self.color {
                    write!(stderr, "{}", label.with(color).bold())?;
                } else {
                    write!(stderr, "{label}")?;
                }
            }
        }
        stderr.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
