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

use itertools::Itertools as _;
use p4stack_lib::graph::StackGraph;
use p4stack_lib::swarm::ReviewId;
use p4stack_lib::vcs::ChangeNumber;
use p4stack_lib::vcs::VcsClient as _;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::command_error::CommandError;
use crate::command_error::user_error;
use crate::ui::Ui;

/// Upload a stack as a chain of linked reviews
///
/// Creates (or finds) one review per changelist, then rewrites every review
/// description with navigation links to the neighboring reviews in the
/// stack.
#[derive(clap::Args, Clone, Debug)]
pub(crate) struct UploadArgs {
    /// The root changelist of the stack to upload
    #[arg(value_name = "CHANGE")]
    root: ChangeNumber,
}

const STACK_MARKER_START: &str = "\n\n---\nStack navigation:\n";
const STACK_MARKER_END: &str = "\n---";
const STACK_WARNING: &str = "STACKED CHANGE: This review depends on Review";

#[instrument(skip_all)]
pub(crate) fn cmd_upload(
    ui: &mut Ui,
    command: &CommandHelper,
    args: &UploadArgs,
) -> Result<(), CommandError> {
    let vcs = command.connect()?;
    let changes = vcs.list_pending_changes()?;
    let graph = StackGraph::build(&changes);
    if !graph.contains(args.root) || graph.parent_of(args.root).is_some() {
        return Err(user_error(
            "Please upload from the root of your changelist stack",
        ));
    }
    let stack = graph.descendants(args.root);
    writeln!(
        ui.status(),
        "Found stack with {count} changelist(s): {chain}",
        count = stack.len(),
        chain = stack.iter().map(ToString::to_string).join(" -> ")
    )?;

    let swarm = command.swarm_client(ui, &vcs)?;

    writeln!(ui.status(), "Phase 1: creating or finding reviews...")?;
    let mut reviews: BTreeMap<ChangeNumber, ReviewId> = BTreeMap::new();
    for &change in &stack {
        if !vcs.is_shelved(change)? {
            writeln!(
                ui.warning(),
                "Change {change} has no shelved files; its review will be empty."
            )?;
        }
        let description = vcs.describe(change)?.description;
        match swarm.get_review_id(change)? {
            Some(review) => {
                writeln!(ui.status(), "  CL {change} -> Review {review} (existing)")?;
                reviews.insert(change, review);
            }
            None => {
                let review = swarm.create_review(change, &description)?;
                writeln!(ui.status(), "  CL {change} -> Review {review} (created)")?;
                reviews.insert(change, review);
            }
        }
    }

    writeln!(ui.status(), "Phase 2: linking reviews...")?;
    for &change in &stack {
        let review = reviews[&change];
        // Re-fetch so manual edits made since phase 1 are kept.
        let description = vcs.describe(change)?.description;
        let linked = link_description(
            &description,
            swarm.base_url(),
            &graph,
            &reviews,
            change,
        );
        swarm.update_review_description(review, &linked)?;
        writeln!(ui.status(), "  Review {review} linked.")?;
    }

    writeln!(ui.status(), "Stack uploaded successfully. Review URLs:")?;
    for &change in &stack {
        writeln!(
            ui.status(),
            "  CL {change}: {url}",
            url = swarm.review_url(reviews[&change])
        )?;
    }
    Ok(())
}

/// Removes any stack-navigation block and dependency warning a previous
/// upload added, so re-uploads don't accumulate them.
fn strip_stack_info(description: &str) -> String {
    let mut result = description.to_owned();
    if let Some(start) = result.find(STACK_MARKER_START) {
        let search_from = start + STACK_MARKER_START.len();
        match result[search_from..].find(STACK_MARKER_END) {
            Some(end) => {
                let end = search_from + end + STACK_MARKER_END.len();
                result.replace_range(start..end, "");
            }
            None => result.truncate(start),
        }
    }
    result
        .lines()
        .filter(|line| !line.contains(STACK_WARNING))
        .join("\n")
        .trim()
        .to_owned()
}

/// Builds the review description with the dependency warning and the
/// Prev/Next navigation block.
fn link_description(
    description: &str,
    swarm_url: &str,
    graph: &StackGraph,
    reviews: &BTreeMap<ChangeNumber, ReviewId>,
    change: ChangeNumber,
) -> String {
    let review_link =
        |review: ReviewId| format!("[Review {review}]({swarm_url}/reviews/{review})");
    let mut result = strip_stack_info(description);
    let mut nav_parts = vec![];
    if let Some(parent_review) = graph.parent_of(change).and_then(|parent| reviews.get(&parent))
    {
        result = format!(
            "{STACK_WARNING} {link}\n\n{result}",
            link = review_link(*parent_review)
        );
        nav_parts.push(format!("Prev: {link}", link = review_link(*parent_review)));
    }
    for child in graph.children_of(change) {
        if let Some(child_review) = reviews.get(child) {
            nav_parts.push(format!("Next: {link}", link = review_link(*child_review)));
        }
    }
    if nav_parts.is_empty() {
        return result;
    }
    format!(
        "{result}{STACK_MARKER_START}{nav}{STACK_MARKER_END}",
        nav = nav_parts.join(" | ")
    )
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use p4stack_lib::vcs::PendingChange;
    use pretty_assertions::assert_eq;

    use super::*;

    fn linear_graph() -> StackGraph {
        StackGraph::build(&[
            PendingChange {
                number: 100,
                description: "base".to_owned(),
            },
            PendingChange {
                number: 101,
                description: "child\n\nDepends-On: 100".to_owned(),
            },
            PendingChange {
                number: 102,
                description: "leaf\n\nDepends-On: 101".to_owned(),
            },
        ])
    }

    #[test]
    fn test_link_description_root() {
        let graph = linear_graph();
        let reviews = btreemap! {100 => 7u64, 101 => 8u64, 102 => 9u64};
        let linked = link_description("base", "http://swarm", &graph, &reviews, 100);
        // Roots get a Next link but no warning.
        assert!(!linked.contains(STACK_WARNING));
        assert!(linked.contains("Next: [Review 8](http://swarm/reviews/8)"));
        assert!(linked.starts_with("base"));
    }

    #[test]
    fn test_link_description_middle() {
        let graph = linear_graph();
        let reviews = btreemap! {100 => 7u64, 101 => 8u64, 102 => 9u64};
        let linked =
            link_description("child\n\nDepends-On: 100", "http://swarm", &graph, &reviews, 101);
        assert!(linked.starts_with(STACK_WARNING));
        assert!(linked.contains("Prev: [Review 7](http://swarm/reviews/7)"));
        assert!(linked.contains("Next: [Review 9](http://swarm/reviews/9)"));
    }

    #[test]
    fn test_link_description_is_stable_across_reuploads() {
        let graph = linear_graph();
        let reviews = btreemap! {100 => 7u64, 101 => 8u64, 102 => 9u64};
        let once =
            link_description("child\n\nDepends-On: 100", "http://swarm", &graph, &reviews, 101);
        let twice = link_description(&once, "http://swarm", &graph, &reviews, 101);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_stack_info_removes_block_and_warning() {
        let description = format!(
            "{STACK_WARNING} [Review 7](http://swarm/reviews/7)\n\nFix the \
             widget{STACK_MARKER_START}Prev: [Review 7](http://swarm/reviews/7){STACK_MARKER_END}"
        );
        assert_eq!(strip_stack_info(&description), "Fix the widget");
    }

    #[test]
    fn test_strip_stack_info_keeps_plain_descriptions() {
        assert_eq!(
            strip_stack_info("Fix the widget\n\nDepends-On: 100"),
            "Fix the widget\n\nDepends-On: 100"
        );
    }
}
