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

use p4stack_lib::graph::StackGraph;
use p4stack_lib::p4_subprocess::P4Client;
use p4stack_lib::vcs::ChangeNumber;
use p4stack_lib::vcs::ShelveMode;
use p4stack_lib::vcs::VcsClient as _;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::command_error::user_error;
use crate::ui::Ui;

/// Create one aggregate review for an entire stack
///
/// Unshelves every changelist of the stack into a temporary changelist and
/// opens a single review for the combined content. The temporary changelist
/// is always cleaned up.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct ReviewArgs {
    /// The base changelist of the stack to review
    #[arg(value_name = "CHANGE")]
    change: ChangeNumber,
}

#[instrument(skip_all)]
pub(crate) fn cmd_review(
    ui: &mut Ui,
    command: &CommandHelper,
    args: &ReviewArgs,
) -> Result<(), CommandError> {
    let vcs = command.connect()?;
    writeln!(
        ui.status(),
        "Finding stack from base {change}...",
        change = args.change
    )?;
    let changes = vcs.list_pending_changes()?;
    let graph = StackGraph::build(&changes);
    if !graph.contains(args.change) {
        return Err(user_error(format!(
            "Changelist {change} not found in pending stacks",
            change = args.change
        )));
    }
    let stack = graph.descendants(args.change);
    let summary = graph
        .description(args.change)
        .and_then(|description| description.lines().next())
        .unwrap_or_default()
        .trim()
        .to_owned();

    vcs.revert_all()?;
    let temp_description =
        format!("[p4stack] Review for stack {change}: {summary}", change = args.change);
    let temp_change = vcs.create_change(&temp_description)?;
    writeln!(
        ui.status(),
        "Created temporary changelist {temp_change} for the review."
    )?;

    let result = build_review(ui, command, &vcs, &stack, temp_change, &temp_description);

    // Unconditional cleanup; the temp changelist is never a deliverable.
    writeln!(ui.status(), "Cleaning up the temporary changelist...")?;
    if let Err(err) = vcs
        .revert_all()
        .and_then(|()| vcs.shelve(temp_change, ShelveMode::Delete))
        .and_then(|()| vcs.delete_change(temp_change))
    {
        writeln!(
            ui.warning(),
            "Could not clean up changelist {temp_change}; delete it manually. ({err})"
        )?;
    }
    result
}

fn build_review(
    ui: &mut Ui,
    command: &CommandHelper,
    vcs: &P4Client,
    stack: &[ChangeNumber],
    temp_change: ChangeNumber,
    description: &str,
) -> Result<(), CommandError> {
    for (index, &change) in stack.iter().enumerate() {
        writeln!(
            ui.status(),
            "  Unshelving {change} ({position}/{total})...",
            position = index + 1,
            total = stack.len()
        )?;
        vcs.unshelve(change, temp_change, false)?;
    }
    vcs.shelve(temp_change, ShelveMode::Replace)?;

    writeln!(ui.status(), "Creating review for {temp_change}...")?;
    let swarm = command.swarm_client(ui, vcs)?;
    let review = swarm.create_review(temp_change, description)?;
    writeln!(
        ui.status(),
        "Review created: {url}",
        url = swarm.review_url(review)
    )?;
    Ok(())
}
