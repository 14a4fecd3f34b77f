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

use std::collections::BTreeMap;
use std::io::Write as _;

use p4stack_lib::depends::set_depends_on;
use p4stack_lib::graph::StackGraph;
use p4stack_lib::vcs::ChangeNumber;
use p4stack_lib::vcs::ShelveMode;
use p4stack_lib::vcs::VcsClient as _;
use tracing::debug;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::command_error::user_error;
use crate::ui::Ui;

/// Submit an entire stack, base to tip, as linear history
///
/// Before each submit, the child's `Depends-On:` tag is rewritten to the
/// renumbered changelist its parent was submitted as.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct SubmitArgs {
    /// The base changelist of the stack to submit
    #[arg(value_name = "CHANGE")]
    change: ChangeNumber,
}

#[instrument(skip_all)]
pub(crate) fn cmd_submit(
    ui: &mut Ui,
    command: &CommandHelper,
    args: &SubmitArgs,
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
    writeln!(
        ui.status(),
        "Found stack with {count} change(s). Starting submit...",
        count = stack.len()
    )?;

    let mut submitted: BTreeMap<ChangeNumber, ChangeNumber> = BTreeMap::new();
    for &change in &stack {
        if let Some(parent) = graph.parent_of(change)
            && let Some(&new_parent) = submitted.get(&parent)
        {
            writeln!(
                ui.status(),
                "  Updating {change} to depend on {new_parent}..."
            )?;
            let description = graph.description(change).unwrap_or_default();
            vcs.update_description(change, &set_depends_on(description, new_parent))?;
        }

        writeln!(ui.status(), "  Unshelving files in {change}...")?;
        vcs.unshelve(change, change, true)?;
        // The shelf blocks the submit; drop it first.
        if let Err(err) = vcs.shelve(change, ShelveMode::Delete) {
            debug!(change, %err, "could not drop shelf before submit");
        }
        writeln!(ui.status(), "Submitting {change}...")?;
        let submitted_as = vcs.submit_change(change)?;
        writeln!(ui.status(), "  -> Submitted as change {submitted_as}")?;
        submitted.insert(change, submitted_as);

        if let Err(err) = vcs.revert_all() {
            debug!(%err, "nothing left to revert");
        }
    }
    writeln!(ui.status(), "Stack submitted successfully.")?;

    let prompt = format!(
        "Delete {count} obsolete pending changelist(s)?",
        count = stack.len()
    );
    if ui.prompt_yes_no(&prompt, false)? {
        writeln!(ui.status(), "Cleaning up pending changelists...")?;
        for &change in &stack {
            if let Err(err) = vcs
                .shelve(change, ShelveMode::Delete)
                .and_then(|()| vcs.delete_change(change))
            {
                writeln!(ui.warning(), "Could not delete change {change}: {err}")?;
            }
        }
        writeln!(ui.status(), "Cleanup complete.")?;
    }
    Ok(())
}
