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

//! Per-file and per-folder three-way merge.
//!
//! File contents are merged by the system `diff3` utility; the folder-level
//! merge implements a closed case table for adds and deletes and falls
//! through to the file-level merge for everything else.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::io::Write as _;
use std::process::Command;

use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::snapshot::Snapshot;

const MERGE_TOOL: &str = "diff3";

/// Output of merging one file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MergeResult {
    /// The merged content. Contains conflict markers iff `has_conflict`.
    pub content: BString,
    /// Whether manual resolution is required.
    pub has_conflict: bool,
}

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Could not stage merge input")]
    StageInput(#[source] io::Error),
    #[error("Could not execute merge tool '{MERGE_TOOL}'")]
    SpawnTool(#[source] io::Error),
    #[error("Merge tool '{MERGE_TOOL}' failed: {details}")]
    ToolFailed { details: String },
}

/// Merges `ours` and `theirs` with respect to `base`.
///
/// Absent sides are passed to the merge tool as empty content; the folder
/// merge is responsible for the add/delete cases that shouldn't reach the
/// tool at all.
pub fn merge_files(
    base: Option<&BStr>,
    ours: Option<&BStr>,
    theirs: Option<&BStr>,
) -> Result<MergeResult, MergeError> {
    let base_file = stage_content(base)?;
    let ours_file = stage_content(ours)?;
    let theirs_file = stage_content(theirs)?;

    let output = Command::new(MERGE_TOOL)
        .arg("-m")
        .arg("-E")
        .arg(ours_file.path())
        .arg(base_file.path())
        .arg(theirs_file.path())
        .output()
        .map_err(MergeError::SpawnTool)?;
    match output.status.code() {
        Some(0) => Ok(MergeResult {
            content: output.stdout.into(),
            has_conflict: false,
        }),
        Some(1) => Ok(MergeResult {
            content: output.stdout.into(),
            has_conflict: true,
        }),
        _ => Err(MergeError::ToolFailed {
            details: format!(
                "{status}: {stderr}",
                status = output.status,
                stderr = String::from_utf8_lossy(&output.stderr).trim_end()
            ),
        }),
    }
}

fn stage_content(content: Option<&BStr>) -> Result<NamedTempFile, MergeError> {
    let mut file = NamedTempFile::new().map_err(MergeError::StageInput)?;
    if let Some(content) = content {
        file.write_all(content).map_err(MergeError::StageInput)?;
        file.flush().map_err(MergeError::StageInput)?;
    }
    Ok(file)
}

/// Merges three folder snapshots file by file.
///
/// The add/delete policy is a closed case table; any combination not listed
/// there (notably delete-vs-modify) is resolved by a file-level merge with
/// the missing side as empty content, so the user sees a conflict instead of
/// silently losing a change.
pub fn merge_folders(
    base: &Snapshot,
    ours: &Snapshot,
    theirs: &Snapshot,
) -> Result<BTreeMap<String, MergeResult>, MergeError> {
    let all_files: BTreeSet<&String> = base
        .keys()
        .chain(ours.keys())
        .chain(theirs.keys())
        .collect();

    let mut merged = BTreeMap::new();
    for &basename in &all_files {
        let base_content = base.get(basename);
        let ours_content = ours.get(basename);
        let theirs_content = theirs.get(basename);
        match (base_content, ours_content, theirs_content) {
            // Added on one side only.
            (None, Some(content), None) | (None, None, Some(content)) => {
                merged.insert(
                    basename.clone(),
                    MergeResult {
                        content: content.clone(),
                        has_conflict: false,
                    },
                );
            }
            // Deleted on one side, unchanged on the other.
            (Some(b), None, Some(t)) if t == b => {}
            (Some(b), Some(o), None) if o == b => {}
            // Deleted on both sides.
            (Some(_), None, None) => {}
            _ => {
                debug!(%basename, "file-level merge");
                let result = merge_files(
                    base_content.map(|b| b.as_bstr()),
                    ours_content.map(|o| o.as_bstr()),
                    theirs_content.map(|t| t.as_bstr()),
                )?;
                merged.insert(basename.clone(), result);
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use bstr::ByteSlice as _;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        entries
            .iter()
            .map(|&(basename, content)| (basename.to_owned(), BString::from(content)))
            .collect()
    }

    #[test]
    fn test_merge_files_clean() {
        let result = merge_files(
            Some(b"A\n".as_bstr()),
            Some(b"A\nB\n".as_bstr()),
            Some(b"A\n".as_bstr()),
        )
        .unwrap();
        assert!(!result.has_conflict);
        assert_eq!(result.content, "A\nB\n");
    }

    #[test]
    fn test_merge_files_takes_both_sides() {
        let result = merge_files(
            Some(b"A\nB\nC\n".as_bstr()),
            Some(b"a\nB\nC\n".as_bstr()),
            Some(b"A\nB\nc\n".as_bstr()),
        )
        .unwrap();
        assert!(!result.has_conflict);
        assert_eq!(result.content, "a\nB\nc\n");
    }

    #[test]
    fn test_merge_files_conflict() {
        let result = merge_files(
            Some(b"A\n".as_bstr()),
            Some(b"A\nB\n".as_bstr()),
            Some(b"A\nC\n".as_bstr()),
        )
        .unwrap();
        assert!(result.has_conflict);
        assert!(result.content.contains_str("<<<<<<<"));
        assert!(result.content.contains_str(">>>>>>>"));
    }

    #[test]
    fn test_merge_folders_add_ours_only() {
        let result = merge_folders(
            &snapshot(&[]),
            &snapshot(&[("new.txt", "content")]),
            &snapshot(&[]),
        )
        .unwrap();
        assert_eq!(
            result,
            btreemap! {
                "new.txt".to_owned() => MergeResult {
                    content: "content".into(),
                    has_conflict: false,
                },
            }
        );
    }

    #[test]
    fn test_merge_folders_add_theirs_only() {
        let result = merge_folders(
            &snapshot(&[]),
            &snapshot(&[]),
            &snapshot(&[("new.txt", "parent content")]),
        )
        .unwrap();
        assert_eq!(
            result,
            btreemap! {
                "new.txt".to_owned() => MergeResult {
                    content: "parent content".into(),
                    has_conflict: false,
                },
            }
        );
    }

    #[test]
    fn test_merge_folders_delete_accepted() {
        // Deleted in ours, unchanged in theirs.
        let result = merge_folders(
            &snapshot(&[("gone.txt", "content")]),
            &snapshot(&[]),
            &snapshot(&[("gone.txt", "content")]),
        )
        .unwrap();
        assert_eq!(result, btreemap! {});

        // Deleted in theirs, unchanged in ours.
        let result = merge_folders(
            &snapshot(&[("gone.txt", "content")]),
            &snapshot(&[("gone.txt", "content")]),
            &snapshot(&[]),
        )
        .unwrap();
        assert_eq!(result, btreemap! {});
    }

    #[test]
    fn test_merge_folders_delete_in_both() {
        let result = merge_folders(
            &snapshot(&[("gone.txt", "content")]),
            &snapshot(&[]),
            &snapshot(&[]),
        )
        .unwrap();
        assert_eq!(result, btreemap! {});
    }

    #[test]
    fn test_merge_folders_delete_vs_modify_conflicts() {
        let result = merge_folders(
            &snapshot(&[("file.txt", "A\n")]),
            &snapshot(&[]),
            &snapshot(&[("file.txt", "A\nB\n")]),
        )
        .unwrap();
        let merge = &result["file.txt"];
        assert!(merge.has_conflict);
    }

    #[test]
    fn test_merge_folders_identical_sides_unchanged() {
        let folder = snapshot(&[("a.txt", "one\n"), ("b.txt", "two\n")]);
        let result = merge_folders(&folder, &folder, &folder).unwrap();
        for (basename, content) in &folder {
            let merge = &result[basename];
            assert!(!merge.has_conflict);
            assert_eq!(&merge.content, content);
        }
    }
}
