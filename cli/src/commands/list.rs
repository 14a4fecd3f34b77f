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

use std::io;
use std::io::Write as _;

use p4stack_lib::graph::StackGraph;
use p4stack_lib::vcs::ChangeNumber;
use p4stack_lib::vcs::VcsClient as _;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::ui::Ui;

/// Show your pending changelists as stacks
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct ListArgs {}

#[instrument(skip_all)]
pub(crate) fn cmd_list(
    ui: &mut Ui,
    command: &CommandHelper,
    _args: &ListArgs,
) -> Result<(), CommandError> {
    let vcs = command.connect()?;
    writeln!(
        ui.status(),
        "Fetching pending changes for @{user}...",
        user = vcs.user()
    )?;
    let changes = vcs.list_pending_changes()?;
    let graph = StackGraph::build(&changes);
    if graph.roots().is_empty() {
        writeln!(ui.status(), "No stacked changes found.")?;
        return Ok(());
    }
    let mut out = ui.stdout();
    for &root in graph.roots() {
        writeln!(out, "{}", node_label(&graph, root))?;
        print_children(&mut out, &graph, root, "")?;
    }
    Ok(())
}

fn node_label(graph: &StackGraph, change: ChangeNumber) -> String {
    let summary = graph
        .description(change)
        .and_then(|description| description.lines().next())
        .unwrap_or_default()
        .trim()
        .to_owned();
    format!("{change} {summary}")
}

fn print_children(
    out: &mut impl io::Write,
    graph: &StackGraph,
    change: ChangeNumber,
    prefix: &str,
) -> io::Result<()> {
    let children = graph.children_of(change);
    for (index, &child) in children.iter().enumerate() {
        let is_last = index == children.len() - 1;
        let connector = if is_last { "└─ " } else { "├─ " };
        writeln!(out, "{prefix}{connector}{}", node_label(graph, child))?;
        let child_prefix = format!("{prefix}{}", if is_last { "   " } else { "│  " });
        print_children(out, graph, child, &child_prefix)?;
    }
    Ok(())
}
