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

use std::io::Write as _;

use itertools::Itertools as _;
use p4stack_lib::depends::set_depends_on;
use p4stack_lib::graph::StackGraph;
use p4stack_lib::vcs::VcsClient as _;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Create a changelist stacked on the current tip
///
/// Moves the files opened in the default changelist into a new pending
/// changelist whose description depends on the highest-numbered pending
/// change (the stack tip). With no existing stack, the new changelist
/// becomes a root.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct CreateArgs {
    /// The description for the new changelist
    #[arg(value_name = "DESCRIPTION")]
    description: String,
}

#[instrument(skip_all)]
pub(crate) fn cmd_create(
    ui: &mut Ui,
    command: &CommandHelper,
    args: &CreateArgs,
) -> Result<(), CommandError> {
    let vcs = command.connect()?;
    let files_in_default = vcs.opened_in_default()?;
    if files_in_default.is_empty() {
        writeln!(
            ui.warning(),
            "No files in the default changelist. Nothing to create or move."
        )?;
        return Ok(());
    }

    let changes = vcs.list_pending_changes()?;
    let graph = StackGraph::build(&changes);
    let description = match graph.tip() {
        Some(tip) => {
            writeln!(ui.status(), "Stacking on current tip: {tip}")?;
            set_depends_on(&args.description, tip)
        }
        None => {
            writeln!(ui.status(), "Creating new stack root.")?;
            args.description.clone()
        }
    };

    let new_change = vcs.create_change(&description)?;
    let depot_paths = files_in_default
        .iter()
        .map(|file| file.depot_path.clone())
        .collect_vec();
    vcs.reopen(new_change, &depot_paths)?;

    writeln!(
        ui.status(),
        "Created changelist {new_change} with {count} file(s).",
        count = depot_paths.len()
    )?;
    writeln!(
        ui.hint(),
        "Run 'p4 shelve -c {new_change}' to save your changes."
    )?;
    Ok(())
}
