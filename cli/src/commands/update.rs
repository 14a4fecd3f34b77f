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

use p4stack_lib::rebase::RebaseStatus;
use p4stack_lib::vcs::ChangeNumber;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Update a changelist and propagate the fix through its stack
///
/// Opens the changelist's shelved files in $EDITOR, then reshapes every
/// descendant's shelf by three-way merge so each still carries only its own
/// delta. A merge conflict pauses the update; resolve the markers in the
/// conflicted shelf and rerun with `--continue`.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct UpdateArgs {
    /// The base changelist of the stack to update
    #[arg(value_name = "CHANGE", required_unless_present = "continue_")]
    change: Option<ChangeNumber>,

    /// Continue a previously conflicting update
    #[arg(long = "continue", conflicts_with = "change")]
    continue_: bool,
}

#[instrument(skip_all)]
pub(crate) fn cmd_update(
    ui: &mut Ui,
    command: &CommandHelper,
    args: &UpdateArgs,
) -> Result<(), CommandError> {
    let vcs = command.connect()?;
    let engine = command.rebase_engine(&vcs)?;
    let status = if args.continue_ {
        writeln!(ui.status(), "Continuing the paused stack update...")?;
        engine.continue_rebase()?
    } else {
        let change = args.change.expect("clap should require a changelist");
        writeln!(
            ui.status(),
            "Starting update for the stack based at {change}..."
        )?;
        engine.rebase_stack(change)?
    };
    match status {
        RebaseStatus::Done { rebased } => {
            writeln!(
                ui.status(),
                "Stack update complete; {count} changelist(s) processed.",
                count = rebased.len()
            )?;
        }
        RebaseStatus::Conflict { change } => {
            writeln!(ui.warning(), "Conflict while rebasing change {change}.")?;
            writeln!(
                ui.status(),
                "The shelved files of {change} now contain conflict markers."
            )?;
            writeln!(
                ui.hint(),
                "Resolve them (unshelve, edit, reshelve) and run 'p4stack update --continue'."
            )?;
        }
    }
    Ok(())
}
