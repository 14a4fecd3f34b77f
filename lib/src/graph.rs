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

//! The forest of stacked pending changelists.
//!
//! Edges come from `Depends-On:` tags in changelist descriptions. The graph
//! is represented as companion maps (child → parent, parent → ordered
//! children) rather than a pointer tree, which keeps ordering explicit and
//! rules out cyclic references. It is rebuilt from a fresh server query for
//! every command, never cached.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use crate::depends::parse_depends_on;
use crate::vcs::ChangeNumber;
use crate::vcs::PendingChange;

/// A single-parent, acyclic forest over the user's pending changelists.
#[derive(Clone, Debug)]
pub struct StackGraph {
    nodes: BTreeMap<ChangeNumber, String>,
    parents: BTreeMap<ChangeNumber, ChangeNumber>,
    children: BTreeMap<ChangeNumber, Vec<ChangeNumber>>,
    roots: Vec<ChangeNumber>,
}

impl StackGraph {
    /// Builds the forest from the user's pending changelists.
    ///
    /// A `Depends-On:` reference to a changelist that is not in `changes`
    /// (submitted, deleted, or owned by someone else) is treated as absent
    /// and the child becomes a root. Cycles are broken by making the
    /// smallest-numbered member of each cycle a root.
    pub fn build(changes: &[PendingChange]) -> Self {
        let mut nodes = BTreeMap::new();
        for change in changes {
            nodes.insert(change.number, change.description.clone());
        }
        let mut parents = BTreeMap::new();
        for (&number, description) in &nodes {
            if let Some(parent) = parse_depends_on(description)
                && parent != number
                && nodes.contains_key(&parent)
            {
                parents.insert(number, parent);
            }
        }
        break_cycles(&mut parents);

        let mut children: BTreeMap<ChangeNumber, Vec<ChangeNumber>> = BTreeMap::new();
        // Ascending iteration keeps every child list sorted by number.
        for (&child, &parent) in &parents {
            children.entry(parent).or_default().push(child);
        }
        let roots = nodes
            .keys()
            .copied()
            .filter(|number| !parents.contains_key(number))
            .collect();
        Self {
            nodes,
            parents,
            children,
            roots,
        }
    }

    /// Whether `change` is one of the user's pending changelists.
    pub fn contains(&self, change: ChangeNumber) -> bool {
        self.nodes.contains_key(&change)
    }

    /// The full description of `change`.
    pub fn description(&self, change: ChangeNumber) -> Option<&str> {
        self.nodes.get(&change).map(String::as_str)
    }

    /// The parent of `change`, if it has one.
    pub fn parent_of(&self, change: ChangeNumber) -> Option<ChangeNumber> {
        self.parents.get(&change).copied()
    }

    /// The children of `change`, ascending by number.
    pub fn children_of(&self, change: ChangeNumber) -> &[ChangeNumber] {
        self.children.get(&change).map_or(&[], Vec::as_slice)
    }

    /// The forest's roots, ascending by number.
    pub fn roots(&self) -> &[ChangeNumber] {
        &self.roots
    }

    /// The highest-numbered changelist in the whole forest, if any. New
    /// changes stack on top of this.
    pub fn tip(&self) -> Option<ChangeNumber> {
        self.nodes.keys().next_back().copied()
    }

    /// `base` and all its descendants in breadth-first order: every parent
    /// precedes its children, siblings are visited ascending by number.
    ///
    /// Returns an empty list when `base` is not in the forest.
    pub fn descendants(&self, base: ChangeNumber) -> Vec<ChangeNumber> {
        if !self.contains(base) {
            return vec![];
        }
        let mut order = Vec::new();
        let mut queue = VecDeque::from([base]);
        while let Some(change) = queue.pop_front() {
            order.push(change);
            queue.extend(self.children_of(change));
        }
        order
    }

    /// The chain from the root of `change`'s stack down to `change`,
    /// inclusive, root first.
    pub fn ancestors(&self, change: ChangeNumber) -> Vec<ChangeNumber> {
        if !self.contains(change) {
            return vec![];
        }
        let mut chain = vec![change];
        let mut current = change;
        while let Some(parent) = self.parent_of(current) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }
}

/// Removes the parent edge of each cycle's smallest member, turning it into
/// a root. The description text keeps its tag; only the derived graph
/// changes.
fn break_cycles(parents: &mut BTreeMap<ChangeNumber, ChangeNumber>) {
    let mut acyclic: BTreeSet<ChangeNumber> = BTreeSet::new();
    let starts: Vec<ChangeNumber> = parents.keys().copied().collect();
    for start in starts {
        let mut path = Vec::new();
        let mut on_path: BTreeSet<ChangeNumber> = BTreeSet::new();
        let mut current = start;
        loop {
            if acyclic.contains(&current) {
                break;
            }
            if !on_path.insert(current) {
                let position = path
                    .iter()
                    .position(|&number| number == current)
                    .expect("cycle member should be on the walked path");
                let smallest = path[position..]
                    .iter()
                    .copied()
                    .min()
                    .expect("cycle should be non-empty");
                parents.remove(&smallest);
                break;
            }
            path.push(current);
            match parents.get(&current) {
                Some(&parent) => current = parent,
                None => break,
            }
        }
        acyclic.extend(path);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn change(number: ChangeNumber, description: &str) -> PendingChange {
        PendingChange {
            number,
            description: description.to_owned(),
        }
    }

    #[test]
    fn test_build_forest() {
        let graph = StackGraph::build(&[
            change(100, "base"),
            change(101, "child\n\nDepends-On: 100"),
            change(102, "grandchild\n\nDepends-On: 101"),
            change(200, "other root"),
        ]);
        assert_eq!(graph.roots(), [100, 200]);
        assert_eq!(graph.parent_of(101), Some(100));
        assert_eq!(graph.parent_of(102), Some(101));
        assert_eq!(graph.parent_of(100), None);
        assert_eq!(graph.children_of(100), [101]);
        assert!(graph.children_of(102).is_empty());
    }

    #[test]
    fn test_unknown_parent_makes_root() {
        // 199 is submitted (not among the pending changes), so 200 is a root.
        let graph = StackGraph::build(&[change(200, "orphan\n\nDepends-On: 199")]);
        assert_eq!(graph.roots(), [200]);
        assert_eq!(graph.parent_of(200), None);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let graph = StackGraph::build(&[change(300, "loop\n\nDepends-On: 300")]);
        assert_eq!(graph.roots(), [300]);
        assert_eq!(graph.parent_of(300), None);
    }

    #[test]
    fn test_cycle_broken_at_smallest() {
        let graph = StackGraph::build(&[
            change(10, "a\n\nDepends-On: 30"),
            change(20, "b\n\nDepends-On: 10"),
            change(30, "c\n\nDepends-On: 20"),
        ]);
        // 10 loses its parent edge and anchors the stack.
        assert_eq!(graph.roots(), [10]);
        assert_eq!(graph.parent_of(10), None);
        assert_eq!(graph.parent_of(20), Some(10));
        assert_eq!(graph.parent_of(30), Some(20));
    }

    #[test]
    fn test_children_ascending() {
        let graph = StackGraph::build(&[
            change(100, "base"),
            change(103, "late child\n\nDepends-On: 100"),
            change(101, "early child\n\nDepends-On: 100"),
        ]);
        assert_eq!(graph.children_of(100), [101, 103]);
    }

    #[test]
    fn test_descendants_breadth_first() {
        let graph = StackGraph::build(&[
            change(100, "base"),
            change(101, "left\n\nDepends-On: 100"),
            change(102, "right\n\nDepends-On: 100"),
            change(103, "left leaf\n\nDepends-On: 101"),
            change(104, "right leaf\n\nDepends-On: 102"),
        ]);
        let order = graph.descendants(100);
        assert_eq!(order, [100, 101, 102, 103, 104]);
        // Every parent precedes its children.
        for &(child, parent) in &[(101, 100), (102, 100), (103, 101), (104, 102)] {
            let child_idx = order.iter().position(|&n| n == child).unwrap();
            let parent_idx = order.iter().position(|&n| n == parent).unwrap();
            assert!(parent_idx < child_idx);
        }
    }

    #[test]
    fn test_descendants_of_unknown_change() {
        let graph = StackGraph::build(&[change(100, "base")]);
        assert!(graph.descendants(999).is_empty());
    }

    #[test]
    fn test_ancestors_root_first() {
        let graph = StackGraph::build(&[
            change(100, "base"),
            change(101, "child\n\nDepends-On: 100"),
            change(102, "grandchild\n\nDepends-On: 101"),
        ]);
        assert_eq!(graph.ancestors(102), [100, 101, 102]);
        assert_eq!(graph.ancestors(100), [100]);
    }

    #[test]
    fn test_tip_is_highest_number() {
        let graph = StackGraph::build(&[
            change(100, "base"),
            change(150, "unrelated root"),
            change(101, "child\n\nDepends-On: 100"),
        ]);
        assert_eq!(graph.tip(), Some(150));
        assert_eq!(StackGraph::build(&[]).tip(), None);
    }
}
