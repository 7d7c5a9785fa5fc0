//! Parses unified-diff text into a validated [`PatchDocument`].
//!
//! Two dialects are accepted:
//!
//! * git-style: `diff --git a/X b/Y` entries with `index`, `---`/`+++`,
//!   optional `rename from`/`rename to`, `old mode`/`new mode`,
//!   `new file mode`/`deleted file mode` metadata and `@@` hunks. A single
//!   entry may emit several [`PatchPart`]s (rename, then mode change, then
//!   the content part), in that order.
//! * old-style: bare `--- a/P` / `+++ b/P` / `@@` blocks with no git
//!   metadata, optionally preceded by a `patch-package` banner. These carry
//!   no content hashes.
//!
//! Every hunk is checked against its declared line counts before it is
//! accepted; any violation fails the whole parse. No partial document is
//! ever returned.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::lines::Line;
use crate::lines::LineKind;
use crate::lines::classify;
use crate::lines::classify_body;
use crate::lines::is_structural;
use crate::lines::logical_lines;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed header at line {line_number}: {message}")]
    MalformedHeader { message: String, line_number: usize },
    #[error(
        "inconsistent hunk counts at line {line_number}: header declares \
         -{expected_original} +{expected_patched} but body has {actual_original} \
         original and {actual_patched} patched lines"
    )]
    InconsistentHunkCounts {
        line_number: usize,
        expected_original: usize,
        actual_original: usize,
        expected_patched: usize,
        actual_patched: usize,
    },
    #[error("unexpected end of patch at line {line_number}: {message}")]
    UnexpectedEof { message: String, line_number: usize },
    #[error("unknown line prefix at line {line_number}: {line:?}")]
    UnknownLinePrefix { line: String, line_number: usize },
}

/// File executable-permission state, as carried by git mode strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    Executable,
    NonExecutable,
}

impl FileMode {
    /// Derive the mode from a git mode string by its execute bits
    /// (`100755` is executable, `100644` is not).
    pub fn from_git_mode(mode: &str) -> Option<FileMode> {
        let bits = u32::from_str_radix(mode.trim(), 8).ok()?;
        Some(if bits & 0o111 != 0 {
            FileMode::Executable
        } else {
            FileMode::NonExecutable
        })
    }

    pub fn is_executable(self) -> bool {
        matches!(self, FileMode::Executable)
    }

    pub fn as_git_mode(self) -> &'static str {
        match self {
            FileMode::Executable => "100755",
            FileMode::NonExecutable => "100644",
        }
    }
}

/// A 1-based start line and length as written in an `@@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkRange {
    pub start: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkHeader {
    pub original: HunkRange,
    pub patched: HunkRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Context,
    Insertion,
    Deletion,
}

/// A maximal run of same-kind body lines within a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkPart {
    pub kind: PartKind,
    pub lines: Vec<String>,
    /// Set when the run is followed by `\ No newline at end of file`.
    pub no_newline_at_end_of_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub header: HunkHeader,
    pub parts: Vec<HunkPart>,
}

impl Hunk {
    /// Lines of the original file covered by this hunk (context + deletions),
    /// in body order.
    pub fn original_lines(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter(|part| part.kind != PartKind::Insertion)
            .flat_map(|part| part.lines.iter().map(String::as_str))
    }

    /// Lines of the patched file produced by this hunk (context + insertions),
    /// in body order.
    pub fn patched_lines(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter(|part| part.kind != PartKind::Deletion)
            .flat_map(|part| part.lines.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchPart {
    FileCreation {
        path: PathBuf,
        mode: FileMode,
        /// `None` when the new file is empty (git emits no hunk for it).
        hunk: Option<Hunk>,
        hash: Option<String>,
    },
    FileDeletion {
        path: PathBuf,
        mode: FileMode,
        hunk: Option<Hunk>,
        hash: Option<String>,
    },
    FileRename {
        from_path: PathBuf,
        to_path: PathBuf,
    },
    FileModeChange {
        path: PathBuf,
        old_mode: FileMode,
        new_mode: FileMode,
    },
    FilePatch {
        path: PathBuf,
        hunks: Vec<Hunk>,
        before_hash: Option<String>,
        after_hash: Option<String>,
    },
}

/// A parsed patch: ordered parts, one or more per file entry, in textual
/// order. Pure value; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDocument {
    pub parts: Vec<PatchPart>,
}

pub fn parse(text: &str) -> Result<PatchDocument, ParseError> {
    let lines = logical_lines(text);
    let mut parts = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        match classify(line.text) {
            LineKind::Blank | LineKind::Banner => idx += 1,
            LineKind::DiffGit(payload) => {
                idx += parse_git_entry(&lines[idx..], payload, &mut parts)?;
            }
            LineKind::OldFile(_) => {
                idx += parse_legacy_entry(&lines[idx..], &mut parts)?;
            }
            _ => {
                return Err(ParseError::UnknownLinePrefix {
                    line: line.text.to_string(),
                    line_number: line.number,
                });
            }
        }
    }
    Ok(PatchDocument { parts })
}

/// Metadata gathered between a `diff --git` line and its first hunk.
#[derive(Default)]
struct EntryMeta {
    old_mode: Option<FileMode>,
    new_mode: Option<FileMode>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    new_file_mode: Option<FileMode>,
    deleted_file_mode: Option<FileMode>,
    before_hash: Option<String>,
    after_hash: Option<String>,
}

/// Parses one `diff --git` entry, pushing the part(s) it denotes. Returns the
/// number of lines consumed.
fn parse_git_entry(
    lines: &[Line],
    header_payload: &str,
    parts: &mut Vec<PatchPart>,
) -> Result<usize, ParseError> {
    let entry_line = lines[0].number;
    let (old_path, new_path) = parse_diff_git_paths(header_payload, entry_line)?;

    let mut meta = EntryMeta::default();
    let mut idx = 1;
    while idx < lines.len() {
        let line = lines[idx];
        match classify(line.text) {
            LineKind::OldMode(mode) => {
                meta.old_mode = Some(parse_mode(mode, line.number)?);
            }
            LineKind::NewMode(mode) => {
                meta.new_mode = Some(parse_mode(mode, line.number)?);
            }
            LineKind::NewFileMode(mode) => {
                meta.new_file_mode = Some(parse_mode(mode, line.number)?);
            }
            LineKind::DeletedFileMode(mode) => {
                meta.deleted_file_mode = Some(parse_mode(mode, line.number)?);
            }
            LineKind::RenameFrom(path) => meta.rename_from = Some(path.to_string()),
            LineKind::RenameTo(path) => meta.rename_to = Some(path.to_string()),
            LineKind::SimilarityIndex => {}
            LineKind::Index(payload) => {
                let (before, after) = parse_index_hashes(payload);
                meta.before_hash = before;
                meta.after_hash = after;
            }
            // Paths were already taken from the `diff --git` line; the
            // `---`/`+++` pair only needs to be consumed.
            LineKind::OldFile(_) | LineKind::NewFile(_) => {}
            _ => break,
        }
        idx += 1;
    }

    let mut hunks = Vec::new();
    while idx < lines.len() {
        let LineKind::HunkHeader(_) = classify(lines[idx].text) else {
            break;
        };
        let (hunk, consumed) = parse_hunk(&lines[idx..])?;
        hunks.push(hunk);
        idx += consumed;
    }

    let emitted_before = parts.len();
    let renamed = match (meta.rename_from, meta.rename_to) {
        (Some(from), Some(to)) => {
            parts.push(PatchPart::FileRename {
                from_path: PathBuf::from(from),
                to_path: PathBuf::from(to.clone()),
            });
            Some(to)
        }
        (None, None) => None,
        (Some(_), None) | (None, Some(_)) => {
            return Err(ParseError::UnexpectedEof {
                message: "file entry has `rename from` without `rename to` (or vice versa)"
                    .to_string(),
                line_number: entry_line,
            });
        }
    };
    // A rename redirects the remaining parts of this entry to the new path.
    let path = renamed.unwrap_or(new_path);

    if let (Some(old_mode), Some(new_mode)) = (meta.old_mode, meta.new_mode) {
        parts.push(PatchPart::FileModeChange {
            path: PathBuf::from(path.clone()),
            old_mode,
            new_mode,
        });
    }

    if let Some(mode) = meta.new_file_mode {
        if hunks.len() > 1 {
            return Err(ParseError::MalformedHeader {
                message: format!("file creation for '{path}' carries more than one hunk"),
                line_number: entry_line,
            });
        }
        parts.push(PatchPart::FileCreation {
            path: PathBuf::from(path),
            mode,
            hunk: hunks.into_iter().next(),
            hash: meta.after_hash,
        });
    } else if let Some(mode) = meta.deleted_file_mode {
        if hunks.len() > 1 {
            return Err(ParseError::MalformedHeader {
                message: format!("file deletion for '{old_path}' carries more than one hunk"),
                line_number: entry_line,
            });
        }
        parts.push(PatchPart::FileDeletion {
            path: PathBuf::from(old_path),
            mode,
            hunk: hunks.into_iter().next(),
            hash: meta.before_hash,
        });
    } else if !hunks.is_empty() {
        parts.push(PatchPart::FilePatch {
            path: PathBuf::from(path),
            hunks,
            before_hash: meta.before_hash,
            after_hash: meta.after_hash,
        });
    } else if parts.len() == emitted_before {
        return Err(ParseError::UnexpectedEof {
            message: format!("file entry for '{path}' has no content"),
            line_number: entry_line,
        });
    }
    Ok(idx)
}

/// Parses one old-style entry (`--- a/P` / `+++ b/P` / hunks) into a
/// [`PatchPart::FilePatch`] with no hashes. Returns the lines consumed.
fn parse_legacy_entry(lines: &[Line], parts: &mut Vec<PatchPart>) -> Result<usize, ParseError> {
    let entry_line = lines[0].number;
    let new_file = match lines.get(1).map(|line| classify(line.text)) {
        Some(LineKind::NewFile(payload)) => payload,
        _ => {
            return Err(ParseError::UnexpectedEof {
                message: "`---` file header without a matching `+++` line".to_string(),
                line_number: entry_line,
            });
        }
    };
    let path = strip_path_prefix(new_file);

    let mut idx = 2;
    let mut hunks = Vec::new();
    while idx < lines.len() {
        let LineKind::HunkHeader(_) = classify(lines[idx].text) else {
            break;
        };
        let (hunk, consumed) = parse_hunk(&lines[idx..])?;
        hunks.push(hunk);
        idx += consumed;
    }
    if hunks.is_empty() {
        return Err(ParseError::UnexpectedEof {
            message: format!("file header for '{path}' is not followed by any hunks"),
            line_number: entry_line,
        });
    }

    parts.push(PatchPart::FilePatch {
        path: PathBuf::from(path),
        hunks,
        before_hash: None,
        after_hash: None,
    });
    Ok(idx)
}

/// Parses one hunk: the `@@` header line plus its body. Returns the hunk and
/// the number of lines consumed. The count validator runs before returning.
fn parse_hunk(lines: &[Line]) -> Result<(Hunk, usize), ParseError> {
    let header_line = lines[0];
    let header = parse_hunk_header(header_line.text, header_line.number)?;

    let mut parts: Vec<HunkPart> = Vec::new();
    let mut original_seen = 0usize;
    let mut patched_seen = 0usize;
    let mut idx = 1;
    while idx < lines.len() {
        let text = lines[idx].text;
        let satisfied =
            original_seen >= header.original.len && patched_seen >= header.patched.len;
        if satisfied && is_structural(text) {
            break;
        }
        // Until the declared counts are met, only the first byte decides what
        // a body line is; structural prefixes like `--- ` or `+++ ` can occur
        // inside deleted or inserted content.
        let kind = if satisfied {
            classify(text)
        } else {
            classify_body(text)
        };
        match kind {
            LineKind::Blank => {
                if satisfied {
                    break;
                }
                // Some producers drop the single space prefix from blank
                // context lines; treat the bare line as blank context.
                push_body_line(&mut parts, PartKind::Context, text.to_string());
                original_seen += 1;
                patched_seen += 1;
            }
            LineKind::Context(payload) => {
                push_body_line(&mut parts, PartKind::Context, payload.to_string());
                original_seen += 1;
                patched_seen += 1;
            }
            LineKind::Insertion(payload) => {
                push_body_line(&mut parts, PartKind::Insertion, payload.to_string());
                patched_seen += 1;
            }
            LineKind::Deletion(payload) => {
                push_body_line(&mut parts, PartKind::Deletion, payload.to_string());
                original_seen += 1;
            }
            LineKind::NoNewlineMarker => match parts.last_mut() {
                Some(part) => part.no_newline_at_end_of_file = true,
                None => {
                    return Err(ParseError::UnknownLinePrefix {
                        line: text.to_string(),
                        line_number: lines[idx].number,
                    });
                }
            },
            _ => break,
        }
        idx += 1;
    }

    validate_hunk_counts(
        &header,
        original_seen,
        patched_seen,
        header_line.number,
    )?;
    Ok((Hunk { header, parts }, idx))
}

fn push_body_line(parts: &mut Vec<HunkPart>, kind: PartKind, line: String) {
    match parts.last_mut() {
        // Extend the current run, unless a no-newline marker closed it.
        Some(part) if part.kind == kind && !part.no_newline_at_end_of_file => {
            part.lines.push(line);
        }
        _ => parts.push(HunkPart {
            kind,
            lines: vec![line],
            no_newline_at_end_of_file: false,
        }),
    }
}

/// The numeric consistency check: total context+deletion lines must equal the
/// declared original length, and context+insertion the declared patched
/// length. Exact, not best-effort.
fn validate_hunk_counts(
    header: &HunkHeader,
    actual_original: usize,
    actual_patched: usize,
    line_number: usize,
) -> Result<(), ParseError> {
    if actual_original != header.original.len || actual_patched != header.patched.len {
        return Err(ParseError::InconsistentHunkCounts {
            line_number,
            expected_original: header.original.len,
            actual_original,
            expected_patched: header.patched.len,
            actual_patched,
        });
    }
    Ok(())
}

/// Parses `@@ -<start>(,<len>)? +<start>(,<len>)? @@` with optional trailing
/// section text. A missing `,<len>` defaults the length to 1.
fn parse_hunk_header(text: &str, line_number: usize) -> Result<HunkHeader, ParseError> {
    let malformed = |message: &str| ParseError::MalformedHeader {
        message: format!("{message} in {text:?}"),
        line_number,
    };
    let text = text.strip_suffix('\r').unwrap_or(text);
    let rest = text
        .strip_prefix("@@ -")
        .ok_or_else(|| malformed("hunk header must start with `@@ -`"))?;
    let (original, rest) = parse_hunk_range(rest)
        .ok_or_else(|| malformed("non-numeric original range"))?;
    let rest = rest
        .strip_prefix(" +")
        .ok_or_else(|| malformed("expected ` +` after the original range"))?;
    let (patched, rest) = parse_hunk_range(rest)
        .ok_or_else(|| malformed("non-numeric patched range"))?;
    let rest = rest
        .strip_prefix(" @@")
        .ok_or_else(|| malformed("missing closing `@@`"))?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return Err(malformed("malformed closing `@@`"));
    }
    Ok(HunkHeader { original, patched })
}

fn parse_hunk_range(s: &str) -> Option<(HunkRange, &str)> {
    let (start, rest) = parse_number(s)?;
    let (len, rest) = match rest.strip_prefix(',') {
        Some(rest) => parse_number(rest)?,
        None => (1, rest),
    };
    Some((HunkRange { start, len }, rest))
}

fn parse_number(s: &str) -> Option<(usize, &str)> {
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let value = s[..digits].parse().ok()?;
    Some((value, &s[digits..]))
}

/// Splits the payload of `diff --git a/X b/Y` into the two paths.
fn parse_diff_git_paths(
    payload: &str,
    line_number: usize,
) -> Result<(String, String), ParseError> {
    if let Some(rest) = payload.strip_prefix("a/") {
        if let Some(pos) = rest.find(" b/") {
            return Ok((rest[..pos].to_string(), rest[pos + 3..].to_string()));
        }
    }
    // Quoted or prefix-less paths: fall back to whitespace splitting.
    let mut fields = payload.split_whitespace();
    if let (Some(old), Some(new)) = (fields.next(), fields.next()) {
        return Ok((
            strip_path_prefix(old).to_string(),
            strip_path_prefix(new).to_string(),
        ));
    }
    Err(ParseError::MalformedHeader {
        message: format!("unparsable `diff --git` paths in {payload:?}"),
        line_number,
    })
}

/// Strips the `a/`/`b/` prefix from a `---`/`+++` path and drops any
/// trailing tab-separated annotation.
fn strip_path_prefix(path: &str) -> &str {
    let path = path.split('\t').next().unwrap_or(path);
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

fn parse_mode(mode: &str, line_number: usize) -> Result<FileMode, ParseError> {
    FileMode::from_git_mode(mode).ok_or_else(|| ParseError::MalformedHeader {
        message: format!("invalid file mode {mode:?}"),
        line_number,
    })
}

/// Splits `index <before>..<after> <mode>` hashes, normalizing the all-zero
/// placeholder to `None`.
fn parse_index_hashes(payload: &str) -> (Option<String>, Option<String>) {
    let hashes = payload.split_whitespace().next().unwrap_or(payload);
    let Some((before, after)) = hashes.split_once("..") else {
        return (None, None);
    };
    (normalize_hash(before), normalize_hash(after))
}

fn normalize_hash(hash: &str) -> Option<String> {
    if hash.is_empty() || hash.bytes().all(|b| b == b'0') {
        None
    } else {
        Some(hash.to_string())
    }
}

impl PatchDocument {
    /// Re-renders the document as git-style unified-diff text. Content lines
    /// round-trip byte for byte; multi-part entries render as separate
    /// `diff --git` entries.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                PatchPart::FileCreation {
                    path,
                    mode,
                    hunk,
                    hash,
                } => {
                    let path = path.display();
                    let _ = writeln!(out, "diff --git a/{path} b/{path}");
                    let _ = writeln!(out, "new file mode {}", mode.as_git_mode());
                    if let Some(hash) = hash {
                        let _ = writeln!(out, "index 0000000..{hash}");
                    }
                    let _ = writeln!(out, "--- /dev/null");
                    let _ = writeln!(out, "+++ b/{path}");
                    if let Some(hunk) = hunk {
                        render_hunk(&mut out, hunk);
                    }
                }
                PatchPart::FileDeletion {
                    path,
                    mode,
                    hunk,
                    hash,
                } => {
                    let path = path.display();
                    let _ = writeln!(out, "diff --git a/{path} b/{path}");
                    let _ = writeln!(out, "deleted file mode {}", mode.as_git_mode());
                    if let Some(hash) = hash {
                        let _ = writeln!(out, "index {hash}..0000000");
                    }
                    let _ = writeln!(out, "--- a/{path}");
                    let _ = writeln!(out, "+++ /dev/null");
                    if let Some(hunk) = hunk {
                        render_hunk(&mut out, hunk);
                    }
                }
                PatchPart::FileRename { from_path, to_path } => {
                    let from = from_path.display();
                    let to = to_path.display();
                    let _ = writeln!(out, "diff --git a/{from} b/{to}");
                    let _ = writeln!(out, "rename from {from}");
                    let _ = writeln!(out, "rename to {to}");
                }
                PatchPart::FileModeChange {
                    path,
                    old_mode,
                    new_mode,
                } => {
                    let path = path.display();
                    let _ = writeln!(out, "diff --git a/{path} b/{path}");
                    let _ = writeln!(out, "old mode {}", old_mode.as_git_mode());
                    let _ = writeln!(out, "new mode {}", new_mode.as_git_mode());
                }
                PatchPart::FilePatch {
                    path,
                    hunks,
                    before_hash,
                    after_hash,
                } => {
                    let path = path.display();
                    if before_hash.is_some() || after_hash.is_some() {
                        let _ = writeln!(out, "diff --git a/{path} b/{path}");
                        let _ = writeln!(
                            out,
                            "index {}..{}",
                            before_hash.as_deref().unwrap_or("0000000"),
                            after_hash.as_deref().unwrap_or("0000000"),
                        );
                    }
                    let _ = writeln!(out, "--- a/{path}");
                    let _ = writeln!(out, "+++ b/{path}");
                    for hunk in hunks {
                        render_hunk(&mut out, hunk);
                    }
                }
            }
        }
        out
    }
}

fn render_hunk(out: &mut String, hunk: &Hunk) {
    let _ = writeln!(
        out,
        "@@ -{},{} +{},{} @@",
        hunk.header.original.start,
        hunk.header.original.len,
        hunk.header.patched.start,
        hunk.header.patched.len,
    );
    for part in &hunk.parts {
        let marker = match part.kind {
            PartKind::Context => ' ',
            PartKind::Insertion => '+',
            PartKind::Deletion => '-',
        };
        for line in &part.lines {
            let _ = writeln!(out, "{marker}{line}");
        }
        if part.no_newline_at_end_of_file {
            let _ = writeln!(out, "\\ No newline at end of file");
        }
    }
}

/// The on-disk contents a creation hunk materializes: every insertion line
/// followed by the record separator, except the last when the hunk is flagged
/// as having no newline at end of file.
pub(crate) fn creation_contents(hunk: Option<&Hunk>) -> String {
    let Some(hunk) = hunk else {
        return String::new();
    };
    let mut no_trailing_newline = false;
    let mut lines: Vec<&str> = Vec::new();
    for part in &hunk.parts {
        if part.kind != PartKind::Insertion {
            continue;
        }
        lines.extend(part.lines.iter().map(String::as_str));
        no_trailing_newline = part.no_newline_at_end_of_file;
    }
    let mut contents = lines.join("\n");
    if !lines.is_empty() && !no_trailing_newline {
        contents.push('\n');
    }
    contents
}
