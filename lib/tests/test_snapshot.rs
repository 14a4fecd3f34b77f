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
use bstr::BString;
use p4stack_lib::snapshot;
use p4stack_lib::snapshot::Snapshot;
use p4stack_lib::snapshot::SnapshotError;
use pretty_assertions::assert_eq;
use testutils::TestVcs;

fn snapshot_of(entries: &[(&str, &str)]) -> Snapshot {
    entries
        .iter()
        .map(|&(basename, content)| (basename.to_owned(), BString::from(content)))
        .collect()
}

#[test]
fn test_read_empty_shelf() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "empty");
    let (snapshot, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    assert!(snapshot.is_empty());
    assert!(file_to_depot.is_empty());
}

#[test]
fn test_read_keys_by_basename() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "two files");
    vcs.shelve_file(100, "//depot/dir/file1.txt", "content 1");
    vcs.shelve_file(100, "//depot/file2.py", "content 2");

    let (snapshot, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    assert_eq!(
        snapshot,
        snapshot_of(&[("file1.txt", "content 1"), ("file2.py", "content 2")])
    );
    assert_eq!(file_to_depot["file1.txt"], "//depot/dir/file1.txt");
    assert_eq!(file_to_depot["file2.py"], "//depot/file2.py");
}

#[test]
fn test_read_rejects_basename_collision() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "colliding");
    vcs.shelve_file(100, "//depot/a/foo.txt", "from a");
    vcs.shelve_file(100, "//depot/b/foo.txt", "from b");

    let err = snapshot::read_snapshot(&vcs, 100).unwrap_err();
    assert_matches!(err, SnapshotError::BasenameCollision { change: 100, .. });
}

#[test]
fn test_write_read_roundtrip() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "roundtrip");
    vcs.shelve_file(100, "//depot/keep.txt", "same\n");
    vcs.shelve_file(100, "//depot/edit.txt", "old\n");
    vcs.shelve_file(100, "//depot/gone.txt", "doomed\n");

    let (previous, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    let desired = snapshot_of(&[("keep.txt", "same\n"), ("edit.txt", "new\n")]);
    snapshot::write_snapshot(&vcs, 100, &desired, &previous, &file_to_depot).unwrap();

    let (reread, _) = snapshot::read_snapshot(&vcs, 100).unwrap();
    assert_eq!(reread, desired);
    // The workspace is not a committed artifact; nothing stays opened.
    assert_eq!(vcs.opened_paths(), Vec::<String>::new());
}

#[test]
fn test_write_unchanged_snapshot_touches_nothing() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "unchanged");
    vcs.shelve_file(100, "//depot/file.txt", "content\n");

    let (previous, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    snapshot::write_snapshot(&vcs, 100, &previous.clone(), &previous, &file_to_depot).unwrap();

    assert_eq!(vcs.shelf_content(100, "//depot/file.txt").unwrap(), "content\n");
    assert_eq!(vcs.opened_paths(), Vec::<String>::new());
}

#[test]
fn test_write_empty_snapshot_deletes_shelf() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "emptied");
    vcs.shelve_file(100, "//depot/file.txt", "content\n");

    let (previous, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    snapshot::write_snapshot(&vcs, 100, &Snapshot::new(), &previous, &file_to_depot).unwrap();

    assert!(vcs.shelf(100).is_empty());
    assert_eq!(vcs.opened_paths(), Vec::<String>::new());
}

#[test]
fn test_write_rejects_unmapped_basename() {
    let vcs = TestVcs::new();
    vcs.add_pending_change(100, "unmapped");
    vcs.shelve_file(100, "//depot/file.txt", "content\n");

    let (previous, file_to_depot) = snapshot::read_snapshot(&vcs, 100).unwrap();
    let mut desired = previous.clone();
    desired.insert("surprise.txt".to_owned(), "new\n".into());

    let err =
        snapshot::write_snapshot(&vcs, 100, &desired, &previous, &file_to_depot).unwrap_err();
    assert_matches!(err, SnapshotError::UnknownDepotPath { change: 100, .. });
    // Nothing was shelved and the workspace is clean again.
    assert_eq!(vcs.shelf_content(100, "//depot/file.txt").unwrap(), "content\n");
    assert_eq!(vcs.opened_paths(), Vec::<String>::new());
}
