//! Logical-line tokenizer and classifier for unified-diff text.
//!
//! `\n` is the record separator; a `\r` immediately before it is part of the
//! line content and must survive into the parsed document verbatim. Structural
//! lines (file headers, hunk headers, mode lines) are CR-insensitive so that a
//! CRLF patch parses the same as its LF twin.

/// A physical line of the patch, without its trailing `\n` but with any `\r`
/// intact. `number` is 1-based.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Line<'a> {
    pub number: usize,
    pub text: &'a str,
}

pub(crate) fn logical_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines: Vec<Line> = text
        .split('\n')
        .enumerate()
        .map(|(i, text)| Line {
            number: i + 1,
            text,
        })
        .collect();
    // A trailing newline yields one empty slice past the last record.
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// Classification of a single patch line. Payloads for structural kinds have
/// any trailing `\r` stripped; body payloads keep theirs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind<'a> {
    DiffGit(&'a str),
    Index(&'a str),
    OldFile(&'a str),
    NewFile(&'a str),
    HunkHeader(&'a str),
    OldMode(&'a str),
    NewMode(&'a str),
    SimilarityIndex,
    RenameFrom(&'a str),
    RenameTo(&'a str),
    NewFileMode(&'a str),
    DeletedFileMode(&'a str),
    /// The `patch-package` banner preceding old-style patches. Ignored.
    Banner,
    Context(&'a str),
    Insertion(&'a str),
    Deletion(&'a str),
    /// `\ No newline at end of file`
    NoNewlineMarker,
    /// A zero-character line: the tolerated spelling of a blank context line.
    Blank,
    Other,
}

fn strip_cr(s: &str) -> &str {
    s.strip_suffix('\r').unwrap_or(s)
}

pub(crate) fn classify(text: &str) -> LineKind<'_> {
    let structural = strip_cr(text);
    if structural.is_empty() {
        return LineKind::Blank;
    }
    if let Some(rest) = structural.strip_prefix("diff --git ") {
        return LineKind::DiffGit(rest);
    }
    if let Some(rest) = structural.strip_prefix("index ") {
        return LineKind::Index(rest);
    }
    if let Some(rest) = structural.strip_prefix("--- ") {
        return LineKind::OldFile(rest);
    }
    if let Some(rest) = structural.strip_prefix("+++ ") {
        return LineKind::NewFile(rest);
    }
    if structural.starts_with("@@") {
        return LineKind::HunkHeader(structural);
    }
    // `new file mode` and `deleted file mode` must be checked before the
    // plain mode-change prefixes.
    if let Some(rest) = structural.strip_prefix("new file mode ") {
        return LineKind::NewFileMode(rest);
    }
    if let Some(rest) = structural.strip_prefix("deleted file mode ") {
        return LineKind::DeletedFileMode(rest);
    }
    if let Some(rest) = structural.strip_prefix("old mode ") {
        return LineKind::OldMode(rest);
    }
    if let Some(rest) = structural.strip_prefix("new mode ") {
        return LineKind::NewMode(rest);
    }
    if structural.starts_with("similarity index") {
        return LineKind::SimilarityIndex;
    }
    if let Some(rest) = structural.strip_prefix("rename from ") {
        return LineKind::RenameFrom(rest);
    }
    if let Some(rest) = structural.strip_prefix("rename to ") {
        return LineKind::RenameTo(rest);
    }
    if structural.starts_with("patch-package") {
        return LineKind::Banner;
    }
    match text.as_bytes()[0] {
        b' ' => LineKind::Context(&text[1..]),
        b'+' => LineKind::Insertion(&text[1..]),
        b'-' => LineKind::Deletion(&text[1..]),
        b'\\' => LineKind::NoNewlineMarker,
        _ => LineKind::Other,
    }
}

/// Classification for a line inside a hunk body whose declared counts are not
/// yet satisfied. Only the first byte decides: a deleted line whose content
/// begins with `-- ` arrives as the physical line `--- ...` and must remain a
/// deletion, not a file header. Structural prefixes only apply outside bodies.
pub(crate) fn classify_body(text: &str) -> LineKind<'_> {
    if strip_cr(text).is_empty() {
        return LineKind::Blank;
    }
    match text.as_bytes()[0] {
        b' ' => LineKind::Context(&text[1..]),
        b'+' => LineKind::Insertion(&text[1..]),
        b'-' => LineKind::Deletion(&text[1..]),
        b'\\' => LineKind::NoNewlineMarker,
        _ => LineKind::Other,
    }
}

/// True for lines that open a new structural element and therefore terminate
/// a hunk body once its declared line counts have been consumed.
pub(crate) fn is_structural(text: &str) -> bool {
    matches!(
        classify(text),
        LineKind::DiffGit(_)
            | LineKind::Index(_)
            | LineKind::OldFile(_)
            | LineKind::NewFile(_)
            | LineKind::HunkHeader(_)
            | LineKind::OldMode(_)
            | LineKind::NewMode(_)
            | LineKind::SimilarityIndex
            | LineKind::RenameFrom(_)
            | LineKind::RenameTo(_)
            | LineKind::NewFileMode(_)
            | LineKind::DeletedFileMode(_)
    )
}
