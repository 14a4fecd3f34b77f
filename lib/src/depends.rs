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

//! Parsing and rewriting the `Depends-On:` tag embedded in changelist
//! descriptions.

use std::sync::LazyLock;

use regex::Regex;

use crate::vcs::ChangeNumber;

/// Matches `Depends-On: <CL#>` anywhere in a description, case-insensitively.
/// Only the first match is honored when parsing.
static DEPENDS_ON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Depends-On:\s*(\d+)").expect("regex should be valid"));

/// Extracts the parent changelist number from a description, if any.
pub fn parse_depends_on(description: &str) -> Option<ChangeNumber> {
    let captures = DEPENDS_ON_RE.captures(description)?;
    captures[1].parse().ok()
}

/// Adds or replaces the `Depends-On:` tag in a description.
///
/// Every existing occurrence of the tag is removed, trailing whitespace is
/// trimmed, and a single fresh tag is appended as the final paragraph. The
/// rest of the description is preserved verbatim, which makes the operation
/// idempotent.
pub fn set_depends_on(description: &str, new_parent: ChangeNumber) -> String {
    let clean = DEPENDS_ON_RE.replace_all(description, "");
    let clean = clean.trim_end();
    format!("{clean}\n\nDepends-On: {new_parent}")
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    fn strip_tags(text: &str) -> String {
        DEPENDS_ON_RE
            .replace_all(text, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_parse_missing() {
        assert_eq!(parse_depends_on(""), None);
        assert_eq!(parse_depends_on("Fix the frobnicator"), None);
        assert_eq!(parse_depends_on("Depends-On: not-a-number"), None);
    }

    #[test]
    fn test_parse_simple() {
        let description = indoc! {"
            Fix the frobnicator

            Depends-On: 42
        "};
        assert_eq!(parse_depends_on(description), Some(42));
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(parse_depends_on("depends-on: 7"), Some(7));
        assert_eq!(parse_depends_on("DEPENDS-ON:  7"), Some(7));
    }

    #[test]
    fn test_parse_first_match_wins() {
        let description = indoc! {"
            Depends-On: 10
            Depends-On: 20
        "};
        assert_eq!(parse_depends_on(description), Some(10));
    }

    #[test]
    fn test_parse_embedded_in_line() {
        // The tag doesn't have to start a line.
        assert_eq!(parse_depends_on("see Depends-On: 5 above"), Some(5));
    }

    #[test]
    fn test_set_on_untagged_description() {
        let result = set_depends_on("Fix bug", 77);
        assert_eq!(result, "Fix bug\n\nDepends-On: 77");
        assert_eq!(parse_depends_on(&result), Some(77));
    }

    #[test]
    fn test_set_replaces_existing_tag() {
        let description = "Fix bug\n\nDepends-On: 42\nextra trailing";
        let result = set_depends_on(description, 77);
        assert_eq!(parse_depends_on(&result), Some(77));
        assert_eq!(DEPENDS_ON_RE.find_iter(&result).count(), 1);
        assert!(result.contains("Fix bug"));
        assert!(result.contains("extra trailing"));
    }

    #[test]
    fn test_set_is_idempotent() {
        let description = "Fix bug\n\nDepends-On: 42";
        let once = set_depends_on(description, 77);
        let twice = set_depends_on(&once, 77);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_set_preserves_non_tag_content() {
        let description = indoc! {"
            Fix bug

            A longer explanation of the fix,
            Depends-On: 42
            spread over several lines.
        "};
        let result = set_depends_on(description, 77);
        // The non-tag words survive the rewrite untouched.
        assert_eq!(strip_tags(&result), strip_tags(description));
        assert_eq!(parse_depends_on(&result), Some(77));
    }
}
