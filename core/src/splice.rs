//! Pure, filesystem-free application of ordered hunks to a line buffer.
//!
//! Hunks are applied in ascending original-position order with a running
//! offset: each insertion or deletion shifts where later hunks land. Matching
//! is exact at the position the header declares; drift between the patch and
//! the buffer is a [`SpliceError`] (surfaced to callers as a context
//! mismatch), not something to paper over.

use crate::parser::Hunk;
use crate::parser::PartKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpliceError {
    /// 1-based line in the original buffer where the mismatch was found.
    pub line: usize,
    pub expected: String,
    pub actual: String,
}

pub(crate) const END_OF_FILE: &str = "<end of file>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpliceOutcome {
    /// `Some(false)` when a flagged context/insertion run leaves the patched
    /// file without a trailing newline, `Some(true)` when a flagged deletion
    /// removed the unterminated tail, `None` when the patch never touches the
    /// policy.
    pub trailing_newline: Option<bool>,
}

pub(crate) fn splice_hunks(
    lines: &mut Vec<String>,
    hunks: &[Hunk],
) -> Result<SpliceOutcome, SpliceError> {
    let mut offset: isize = 0;
    let mut trailing_newline: Option<bool> = None;

    for hunk in hunks {
        let original = &hunk.header.original;
        // `@@ -0,0 +1,N @@` addresses the position before line 1.
        let at = (original.start as isize + offset - 1).max(0) as usize;

        let old_run: Vec<&str> = hunk.original_lines().collect();
        let new_run: Vec<&str> = hunk.patched_lines().collect();

        for (i, expected) in old_run.iter().enumerate() {
            match lines.get(at + i) {
                Some(actual) if actual == expected => {}
                Some(actual) => {
                    return Err(SpliceError {
                        line: at + i + 1,
                        expected: (*expected).to_string(),
                        actual: actual.clone(),
                    });
                }
                None => {
                    return Err(SpliceError {
                        line: at + i + 1,
                        expected: (*expected).to_string(),
                        actual: END_OF_FILE.to_string(),
                    });
                }
            }
        }

        // A pure-insertion hunk may address the position one past the last
        // line to append; a header pointing further past the end is corrupt.
        if at > lines.len() {
            return Err(SpliceError {
                line: at + 1,
                expected: new_run.first().map_or(String::new(), |s| (*s).to_string()),
                actual: END_OF_FILE.to_string(),
            });
        }
        lines.splice(at..at + old_run.len(), new_run.iter().map(|s| s.to_string()));
        offset += new_run.len() as isize - old_run.len() as isize;

        for part in &hunk.parts {
            if part.no_newline_at_end_of_file {
                trailing_newline = Some(part.kind == PartKind::Deletion);
            }
        }
    }

    Ok(SpliceOutcome { trailing_newline })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::parser::HunkHeader;
    use crate::parser::HunkPart;
    use crate::parser::HunkRange;
    use pretty_assertions::assert_eq;

    fn to_lines(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    fn hunk(original: (usize, usize), patched: (usize, usize), body: &[(PartKind, &[&str])]) -> Hunk {
        Hunk {
            header: HunkHeader {
                original: HunkRange {
                    start: original.0,
                    len: original.1,
                },
                patched: HunkRange {
                    start: patched.0,
                    len: patched.1,
                },
            },
            parts: body
                .iter()
                .map(|(kind, lines)| HunkPart {
                    kind: *kind,
                    lines: to_lines(lines),
                    no_newline_at_end_of_file: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_single_replacement() {
        let mut lines = to_lines(&["a", "b", "c"]);
        let hunks = [hunk(
            (1, 3),
            (1, 3),
            &[
                (PartKind::Context, &["a"] as &[&str]),
                (PartKind::Deletion, &["b"]),
                (PartKind::Insertion, &["B"]),
                (PartKind::Context, &["c"]),
            ],
        )];
        let outcome = splice_hunks(&mut lines, &hunks).unwrap();
        assert_eq!(lines, to_lines(&["a", "B", "c"]));
        assert_eq!(outcome.trailing_newline, None);
    }

    #[test]
    fn test_offset_threads_through_later_hunks() {
        // First hunk grows the file by two lines; the second hunk's header
        // still addresses the original positions.
        let mut lines = to_lines(&["one", "two", "three", "four", "five"]);
        let hunks = [
            hunk(
                (2, 1),
                (2, 3),
                &[
                    (PartKind::Context, &["two"] as &[&str]),
                    (PartKind::Insertion, &["two.1", "two.2"]),
                ],
            ),
            hunk(
                (4, 2),
                (6, 1),
                &[
                    (PartKind::Deletion, &["four"] as &[&str]),
                    (PartKind::Context, &["five"]),
                ],
            ),
        ];
        splice_hunks(&mut lines, &hunks).unwrap();
        assert_eq!(
            lines,
            to_lines(&["one", "two", "two.1", "two.2", "three", "five"])
        );
    }

    #[test]
    fn test_shrinking_offset() {
        let mut lines = to_lines(&["a", "b", "c", "d", "e"]);
        let hunks = [
            hunk(
                (1, 2),
                (1, 1),
                &[
                    (PartKind::Deletion, &["a"] as &[&str]),
                    (PartKind::Context, &["b"]),
                ],
            ),
            hunk(
                (4, 2),
                (3, 2),
                &[
                    (PartKind::Context, &["d"] as &[&str]),
                    (PartKind::Deletion, &["e"]),
                    (PartKind::Insertion, &["E"]),
                ],
            ),
        ];
        splice_hunks(&mut lines, &hunks).unwrap();
        assert_eq!(lines, to_lines(&["b", "c", "d", "E"]));
    }

    #[test]
    fn test_context_drift_is_an_error() {
        let mut lines = to_lines(&["a", "DRIFTED", "c"]);
        let hunks = [hunk(
            (1, 3),
            (1, 3),
            &[
                (PartKind::Context, &["a"] as &[&str]),
                (PartKind::Deletion, &["b"]),
                (PartKind::Insertion, &["B"]),
                (PartKind::Context, &["c"]),
            ],
        )];
        let err = splice_hunks(&mut lines, &hunks).unwrap_err();
        assert_eq!(
            err,
            SpliceError {
                line: 2,
                expected: "b".to_string(),
                actual: "DRIFTED".to_string(),
            }
        );
    }

    #[test]
    fn test_hunk_past_end_of_file_is_an_error() {
        let mut lines = to_lines(&["only"]);
        let hunks = [hunk(
            (1, 2),
            (1, 2),
            &[(PartKind::Context, &["only", "missing"] as &[&str])],
        )];
        let err = splice_hunks(&mut lines, &hunks).unwrap_err();
        assert_eq!(err.actual, END_OF_FILE);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_insertion_at_line_zero() {
        let mut lines = to_lines(&["body"]);
        let hunks = [hunk(
            (0, 0),
            (1, 1),
            &[(PartKind::Insertion, &["header"] as &[&str])],
        )];
        splice_hunks(&mut lines, &hunks).unwrap();
        assert_eq!(lines, to_lines(&["header", "body"]));
    }

    #[test]
    fn test_insertion_past_end_of_file_is_an_error() {
        // Appending at the position one past the last line is fine.
        let mut lines = to_lines(&["only"]);
        let hunks = [hunk(
            (2, 0),
            (2, 1),
            &[(PartKind::Insertion, &["tail"] as &[&str])],
        )];
        splice_hunks(&mut lines, &hunks).unwrap();
        assert_eq!(lines, to_lines(&["only", "tail"]));

        // A header addressing a position beyond that is corrupt.
        let mut lines = to_lines(&["only"]);
        let hunks = [hunk(
            (5, 0),
            (5, 1),
            &[(PartKind::Insertion, &["tail"] as &[&str])],
        )];
        let err = splice_hunks(&mut lines, &hunks).unwrap_err();
        assert_eq!(err.actual, END_OF_FILE);
        assert_eq!(err.line, 5);
        assert_eq!(lines, to_lines(&["only"]));
    }

    #[test]
    fn test_no_newline_flag_governs_trailing_policy() {
        let mut lines = to_lines(&["first", "old"]);
        let mut h = hunk(
            (1, 2),
            (1, 2),
            &[
                (PartKind::Context, &["first"] as &[&str]),
                (PartKind::Deletion, &["old"]),
                (PartKind::Insertion, &["new"]),
            ],
        );
        h.parts[2].no_newline_at_end_of_file = true;
        let outcome = splice_hunks(&mut lines, &[h]).unwrap();
        assert_eq!(outcome.trailing_newline, Some(false));

        // A flagged deletion means the unterminated tail went away, so the
        // patched file regains its newline.
        let mut lines = to_lines(&["first", "old"]);
        let mut h = hunk(
            (1, 2),
            (1, 1),
            &[
                (PartKind::Context, &["first"] as &[&str]),
                (PartKind::Deletion, &["old"]),
            ],
        );
        h.parts[1].no_newline_at_end_of_file = true;
        let outcome = splice_hunks(&mut lines, &[h]).unwrap();
        assert_eq!(outcome.trailing_newline, Some(true));
        assert_eq!(lines, to_lines(&["first"]));
    }
}
