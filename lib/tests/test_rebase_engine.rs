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

use assert_matches::assert_matches;
use bstr::ByteSlice as _;
use p4stack_lib::editor::TextEditor;
use p4stack_lib::op_log::OpLogStore;
use p4stack_lib::op_log::OperationLog;
use p4stack_lib::rebase::RebaseEngine;
use p4stack_lib::rebase::RebaseError;
use p4stack_lib::rebase::RebaseStatus;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use testutils::TestVcs;
use testutils::new_temp_dir;
use testutils::write_editor_script;

struct TestEnv {
    vcs: TestVcs,
    state_dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            vcs: TestVcs::new(),
            state_dir: new_temp_dir(),
        }
    }

    fn log_store(&self) -> OpLogStore {
        OpLogStore::new_in(self.state_dir.path())
    }

    fn engine_with_editor(&self, script_body: &str) -> RebaseEngine<'_> {
        let script = write_editor_script(self.state_dir.path(), script_body);
        let editor = TextEditor::with_program(script.to_str().unwrap());
        RebaseEngine::new(&self.vcs, self.log_store(), editor)
    }
}

/// Appends a fixed line to every file handed to the editor.
const APPEND_FIX: &str = r#"for f in "$@"; do echo FIX >> "$f"; done"#;

#[test]
fn test_linear_propagate_without_conflicts() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "child\n\nDepends-On: 100");
    env.vcs.add_pending_change(102, "leaf\n\nDepends-On: 101");
    env.vcs.shelve_file(100, "//depot/base.txt", "line\n");
    env.vcs.shelve_file(101, "//depot/child.txt", "child line\n");
    env.vcs.shelve_file(102, "//depot/leaf.txt", "leaf line\n");

    let engine = env.engine_with_editor(APPEND_FIX);
    let status = engine.rebase_stack(100).unwrap();
    assert_eq!(
        status,
        RebaseStatus::Done {
            rebased: vec![100, 101, 102]
        }
    );

    // The fix landed in the base; disjoint descendants are untouched.
    assert_eq!(
        env.vcs.shelf_content(100, "//depot/base.txt").unwrap(),
        "line\nFIX\n"
    );
    assert_eq!(
        env.vcs.shelf_content(101, "//depot/child.txt").unwrap(),
        "child line\n"
    );
    assert_eq!(
        env.vcs.shelf_content(102, "//depot/leaf.txt").unwrap(),
        "leaf line\n"
    );
    assert!(!env.log_store().exists());
    assert_eq!(env.vcs.opened_paths(), Vec::<String>::new());
}

#[test]
fn test_clean_propagate_into_shared_file() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "child\n\nDepends-On: 100");
    env.vcs.shelve_file(100, "//depot/foo.txt", "one\ntwo\nthree\n");
    env.vcs
        .shelve_file(101, "//depot/foo.txt", "one\ntwo\nthree\nfour\n");

    // Rewrite the middle line of the base; the child only appended.
    let engine = env.engine_with_editor(r#"printf 'one\nTWO\nthree\n' > "$1""#);
    let status = engine.rebase_stack(100).unwrap();
    assert_eq!(
        status,
        RebaseStatus::Done {
            rebased: vec![100, 101]
        }
    );

    assert_eq!(
        env.vcs.shelf_content(100, "//depot/foo.txt").unwrap(),
        "one\nTWO\nthree\n"
    );
    // The child kept its own delta on top of the updated parent.
    assert_eq!(
        env.vcs.shelf_content(101, "//depot/foo.txt").unwrap(),
        "one\nTWO\nthree\nfour\n"
    );
    assert!(!env.log_store().exists());
}

#[test]
fn test_conflict_pauses_then_continues() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "child\n\nDepends-On: 100");
    env.vcs.shelve_file(100, "//depot/foo.txt", "A\n");
    env.vcs.shelve_file(101, "//depot/foo.txt", "A\nB\n");

    let engine = env.engine_with_editor(r#"printf 'A\nC\n' > "$1""#);
    let status = engine.rebase_stack(100).unwrap();
    assert_eq!(status, RebaseStatus::Conflict { change: 101 });

    // The conflicted shelf carries markers for the user to resolve.
    let conflicted = env.vcs.shelf_content(101, "//depot/foo.txt").unwrap();
    assert!(conflicted.contains_str("<<<<<<<"));
    assert!(conflicted.contains_str(">>>>>>>"));
    // The log records the pause and the completed base step.
    let log: OperationLog = env.log_store().load().unwrap().unwrap();
    assert_eq!(log.base_cl, 100);
    assert_eq!(log.stack_to_update, [100, 101]);
    assert_eq!(log.rebased_cls, [100]);
    assert_eq!(log.conflict_cl, Some(101));
    // The pause leaves no files opened.
    assert_eq!(env.vcs.opened_paths(), Vec::<String>::new());

    // The user rewrites the shelf without markers and continues.
    env.vcs.shelve_file(101, "//depot/foo.txt", "A\nCB\n");
    let status = engine.continue_rebase().unwrap();
    assert_eq!(
        status,
        RebaseStatus::Done {
            rebased: vec![100, 101]
        }
    );
    assert_eq!(
        env.vcs.shelf_content(101, "//depot/foo.txt").unwrap(),
        "A\nCB\n"
    );
    assert!(!env.log_store().exists());
}

#[test]
fn test_continue_rebases_changes_after_the_conflict() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "child\n\nDepends-On: 100");
    env.vcs.add_pending_change(102, "leaf\n\nDepends-On: 101");
    env.vcs.shelve_file(100, "//depot/foo.txt", "A\n");
    env.vcs.shelve_file(101, "//depot/foo.txt", "A\nB\n");
    env.vcs
        .shelve_file(102, "//depot/foo.txt", "A\nB\nfrom leaf\n");

    let engine = env.engine_with_editor(r#"printf 'A\nC\n' > "$1""#);
    let status = engine.rebase_stack(100).unwrap();
    assert_eq!(status, RebaseStatus::Conflict { change: 101 });

    env.vcs.shelve_file(101, "//depot/foo.txt", "A\nC\nB\n");
    let status = engine.continue_rebase().unwrap();
    assert_eq!(
        status,
        RebaseStatus::Done {
            rebased: vec![100, 101, 102]
        }
    );
    // The leaf was merged against its parent's pre-rebase content, so it
    // picked up the resolved parent while keeping its own trailing line.
    assert_eq!(
        env.vcs.shelf_content(102, "//depot/foo.txt").unwrap(),
        "A\nC\nB\nfrom leaf\n"
    );
    assert!(!env.log_store().exists());
}

#[test]
fn test_submitted_parent_is_treated_as_root() {
    let env = TestEnv::new();
    env.vcs.add_submitted_change(199, "already in");
    env.vcs.add_pending_change(200, "orphan\n\nDepends-On: 199");
    env.vcs.shelve_file(200, "//depot/file.txt", "content\n");

    let engine = env.engine_with_editor(APPEND_FIX);
    let status = engine.rebase_stack(200).unwrap();
    assert_eq!(status, RebaseStatus::Done { rebased: vec![200] });
    assert_eq!(
        env.vcs.shelf_content(200, "//depot/file.txt").unwrap(),
        "content\nFIX\n"
    );
}

#[test]
fn test_descendant_with_empty_shelf_stays_empty() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "empty child\n\nDepends-On: 100");
    env.vcs.shelve_file(100, "//depot/file.txt", "content\n");

    let engine = env.engine_with_editor(APPEND_FIX);
    let status = engine.rebase_stack(100).unwrap();
    assert_eq!(
        status,
        RebaseStatus::Done {
            rebased: vec![100, 101]
        }
    );
    // The child owns its own delta; the parent's files are not pushed in.
    assert!(env.vcs.shelf(101).is_empty());
}

#[test]
fn test_existing_log_refuses_new_rebase() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.shelve_file(100, "//depot/file.txt", "content\n");
    env.log_store()
        .save(&OperationLog::start(100, vec![100]))
        .unwrap();

    let engine = env.engine_with_editor(APPEND_FIX);
    let err = engine.rebase_stack(100).unwrap_err();
    assert_matches!(err, RebaseError::LogExists);
    // Nothing was touched.
    assert_eq!(
        env.vcs.shelf_content(100, "//depot/file.txt").unwrap(),
        "content\n"
    );
}

#[test]
fn test_continue_without_log_fails() {
    let env = TestEnv::new();
    let engine = env.engine_with_editor(APPEND_FIX);
    assert_matches!(engine.continue_rebase(), Err(RebaseError::NoLog));
}

#[test]
fn test_unknown_base_is_rejected() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    let engine = env.engine_with_editor(APPEND_FIX);
    assert_matches!(
        engine.rebase_stack(999),
        Err(RebaseError::ChangeNotInStack(999))
    );
    assert!(!env.log_store().exists());
}

#[test]
fn test_failing_editor_keeps_log_for_continue() {
    let env = TestEnv::new();
    env.vcs.add_pending_change(100, "base");
    env.vcs.add_pending_change(101, "child\n\nDepends-On: 100");
    env.vcs.shelve_file(100, "//depot/file.txt", "content\n");
    env.vcs.shelve_file(101, "//depot/other.txt", "child\n");

    let engine = env.engine_with_editor("exit 1");
    let err = engine.rebase_stack(100).unwrap_err();
    assert_matches!(err, RebaseError::Editor(_));
    // The log survives for `continue`, the workspace is reverted.
    assert!(env.log_store().exists());
    assert_eq!(env.vcs.opened_paths(), Vec::<String>::new());
}
