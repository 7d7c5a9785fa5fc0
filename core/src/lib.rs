//! Unified-diff parsing and application.
//!
//! [`parse`] turns patch text (git-style or legacy old-style) into a
//! [`PatchDocument`]; [`apply_patch`] applies one to a target directory.
//! Parsing is pure and reentrant. Applying performs filesystem I/O and wants
//! exclusive access to its target directory; a failure aborts the remaining
//! parts without rolling back the ones already applied, so callers that need
//! atomicity should snapshot the directory first.

mod lines;
mod parser;
mod splice;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

pub use parser::FileMode;
pub use parser::Hunk;
pub use parser::HunkHeader;
pub use parser::HunkPart;
pub use parser::HunkRange;
pub use parser::ParseError;
pub use parser::PartKind;
pub use parser::PatchDocument;
pub use parser::PatchPart;
pub use parser::parse;

use similar::TextDiff;
use thiserror::Error;
use tracing::debug;
use tracing::info;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("{}: no such file or directory", .path.display())]
    PathNotFound { path: PathBuf },
    #[error("{}: already exists with different content", .path.display())]
    AlreadyExists { path: PathBuf },
    #[error(
        "{}:{line}: patch context mismatch: expected {expected:?}, found {actual:?}",
        .path.display()
    )]
    ContextMismatch {
        path: PathBuf,
        line: usize,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Error)]
#[error("{context}: {source}")]
pub struct IoError {
    context: String,
    #[source]
    source: std::io::Error,
}

fn with_io_context<T>(
    result: std::io::Result<T>,
    context: impl FnOnce() -> String,
) -> Result<T, ApplyError> {
    result.map_err(|source| {
        ApplyError::Io(IoError {
            context: context(),
            source,
        })
    })
}

/// File paths affected by applying a patch, relative to the target directory.
#[derive(Debug, Default)]
pub struct AffectedPaths {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub renamed: Vec<(PathBuf, PathBuf)>,
}

/// Parses `patch` and applies it under `target_dir`. Fails fast on parse
/// errors; apply errors abort the remaining parts without rollback.
pub fn apply_patch(patch: &str, target_dir: &Path) -> Result<AffectedPaths, ApplyError> {
    let document = parse(patch)?;
    apply_document(&document, target_dir)
}

pub fn apply_document(
    document: &PatchDocument,
    target_dir: &Path,
) -> Result<AffectedPaths, ApplyError> {
    let mut affected = AffectedPaths::default();
    for part in &document.parts {
        match part {
            PatchPart::FileRename { from_path, to_path } => {
                let from = target_dir.join(from_path);
                let to = target_dir.join(to_path);
                debug!("rename {} -> {}", from.display(), to.display());
                if !from.exists() {
                    return Err(ApplyError::PathNotFound { path: from });
                }
                ensure_parent(&to)?;
                with_io_context(fs::rename(&from, &to), || {
                    format!("failed to rename {}", from.display())
                })?;
                affected.renamed.push((from_path.clone(), to_path.clone()));
            }
            PatchPart::FileModeChange { path, new_mode, .. } => {
                let target = target_dir.join(path);
                debug!("chmod {} to {:?}", target.display(), new_mode);
                if !target.exists() {
                    return Err(ApplyError::PathNotFound { path: target });
                }
                set_executable(&target, new_mode.is_executable())?;
                affected.modified.push(path.clone());
            }
            PatchPart::FileCreation {
                path, mode, hunk, ..
            } => {
                let target = target_dir.join(path);
                debug!("create {}", target.display());
                let contents = parser::creation_contents(hunk.as_ref());
                if target.exists() {
                    let existing = with_io_context(fs::read(&target), || {
                        format!("failed to read {}", target.display())
                    })?;
                    // Recreating a file is allowed only when it is a no-op.
                    if existing != contents.as_bytes() {
                        return Err(ApplyError::AlreadyExists { path: target });
                    }
                } else {
                    ensure_parent(&target)?;
                    with_io_context(fs::write(&target, &contents), || {
                        format!("failed to write {}", target.display())
                    })?;
                }
                if mode.is_executable() {
                    set_executable(&target, true)?;
                }
                affected.added.push(path.clone());
            }
            PatchPart::FileDeletion { path, .. } => {
                let target = target_dir.join(path);
                debug!("delete {}", target.display());
                if !target.exists() {
                    return Err(ApplyError::PathNotFound { path: target });
                }
                with_io_context(fs::remove_file(&target), || {
                    format!("failed to delete {}", target.display())
                })?;
                affected.deleted.push(path.clone());
            }
            PatchPart::FilePatch { path, hunks, .. } => {
                let target = target_dir.join(path);
                debug!("patch {} ({} hunks)", target.display(), hunks.len());
                if !target.exists() {
                    return Err(ApplyError::PathNotFound { path: target });
                }
                let original = with_io_context(fs::read_to_string(&target), || {
                    format!("failed to read {}", target.display())
                })?;
                let patched = patched_contents(&original, hunks, path)?;
                with_io_context(fs::write(&target, patched), || {
                    format!("failed to write {}", target.display())
                })?;
                affected.modified.push(path.clone());
            }
        }
    }
    info!(
        added = affected.added.len(),
        modified = affected.modified.len(),
        deleted = affected.deleted.len(),
        renamed = affected.renamed.len(),
        "patch applied"
    );
    Ok(affected)
}

/// Applies `hunks` to `original` in memory, returning the patched contents.
/// The trailing-newline policy follows the last no-newline flag in the hunks,
/// or the original file's policy when the patch does not touch the tail.
fn patched_contents(original: &str, hunks: &[Hunk], path: &Path) -> Result<String, ApplyError> {
    let had_trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut lines: Vec<String> = if original.is_empty() {
        Vec::new()
    } else {
        let mut lines: Vec<String> = original.split('\n').map(str::to_string).collect();
        if original.ends_with('\n') {
            lines.pop();
        }
        lines
    };

    let outcome = splice::splice_hunks(&mut lines, hunks).map_err(|err| {
        ApplyError::ContextMismatch {
            path: path.to_path_buf(),
            line: err.line,
            expected: err.expected,
            actual: err.actual,
        }
    })?;

    let trailing_newline = outcome.trailing_newline.unwrap_or(had_trailing_newline);
    let mut contents = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        contents.push('\n');
    }
    Ok(contents)
}

/// Renders the changes a document would make under `target_dir` as unified
/// diffs, without touching the filesystem.
pub fn preview(document: &PatchDocument, target_dir: &Path) -> Result<String, ApplyError> {
    let mut out = String::new();
    for part in &document.parts {
        match part {
            PatchPart::FilePatch { path, hunks, .. } => {
                let target = target_dir.join(path);
                if !target.exists() {
                    return Err(ApplyError::PathNotFound { path: target });
                }
                let original = with_io_context(fs::read_to_string(&target), || {
                    format!("failed to read {}", target.display())
                })?;
                let patched = patched_contents(&original, hunks, path)?;
                render_file_diff(&mut out, path, &original, &patched);
            }
            PatchPart::FileCreation { path, hunk, .. } => {
                let contents = parser::creation_contents(hunk.as_ref());
                let diff = TextDiff::from_lines("", &contents);
                out.push_str(
                    &diff
                        .unified_diff()
                        .header("/dev/null", &format!("b/{}", path.display()))
                        .to_string(),
                );
            }
            PatchPart::FileDeletion { path, .. } => {
                let target = target_dir.join(path);
                if !target.exists() {
                    return Err(ApplyError::PathNotFound { path: target });
                }
                let original = with_io_context(fs::read_to_string(&target), || {
                    format!("failed to read {}", target.display())
                })?;
                let diff = TextDiff::from_lines(original.as_str(), "");
                out.push_str(
                    &diff
                        .unified_diff()
                        .header(&format!("a/{}", path.display()), "/dev/null")
                        .to_string(),
                );
            }
            PatchPart::FileRename { from_path, to_path } => {
                let _ = writeln!(
                    out,
                    "rename {} -> {}",
                    from_path.display(),
                    to_path.display()
                );
            }
            PatchPart::FileModeChange {
                path,
                old_mode,
                new_mode,
            } => {
                let _ = writeln!(
                    out,
                    "mode change {}: {} -> {}",
                    path.display(),
                    old_mode.as_git_mode(),
                    new_mode.as_git_mode()
                );
            }
        }
    }
    Ok(out)
}

fn render_file_diff(out: &mut String, path: &Path, original: &str, patched: &str) {
    let diff = TextDiff::from_lines(original, patched);
    out.push_str(
        &diff
            .unified_diff()
            .context_radius(3)
            .header(
                &format!("a/{}", path.display()),
                &format!("b/{}", path.display()),
            )
            .to_string(),
    );
}

fn ensure_parent(path: &Path) -> Result<(), ApplyError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            with_io_context(fs::create_dir_all(parent), || {
                format!("failed to create parent directories for {}", path.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), ApplyError> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = with_io_context(fs::metadata(path), || {
        format!("failed to stat {}", path.display())
    })?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    let new_mode = if executable {
        mode | 0o111
    } else {
        mode & !0o111
    };
    if new_mode != mode {
        permissions.set_mode(new_mode);
        with_io_context(fs::set_permissions(path, permissions), || {
            format!("failed to set permissions on {}", path.display())
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<(), ApplyError> {
    Ok(())
}

/// Writes the summary of changes in git-style `A`/`M`/`D`/`R` format.
pub fn print_summary(
    affected: &AffectedPaths,
    out: &mut impl std::io::Write,
) -> std::io::Result<()> {
    writeln!(out, "Success. Updated the following files:")?;
    for path in &affected.added {
        writeln!(out, "A {}", path.display())?;
    }
    for path in &affected.modified {
        writeln!(out, "M {}", path.display())?;
    }
    for path in &affected.deleted {
        writeln!(out, "D {}", path.display())?;
    }
    for (from, to) in &affected.renamed {
        writeln!(out, "R {} -> {}", from.display(), to.display())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const BANANA_PATCH: &str = "diff --git a/banana.ts b/banana.ts\nindex 2de83dd..842652c 100644\n--- a/banana.ts\n+++ b/banana.ts\n@@ -1,5 +1,5 @@\n this\n is\n \n-a\n+\n file\n";

    #[test]
    fn test_apply_file_patch_round_trips() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("banana.ts");
        fs::write(&target, "this\nis\n\na\nfile\n").unwrap();

        let affected = apply_patch(BANANA_PATCH, dir.path()).unwrap();
        assert_eq!(affected.modified, vec![PathBuf::from("banana.ts")]);

        let expected = "this\nis\n\n\nfile\n";
        assert_eq!(fs::read_to_string(&target).unwrap(), expected);

        // Applying did exactly what the patch intended: a fresh diff against
        // the intended result is empty.
        let actual = fs::read_to_string(&target).unwrap();
        let diff = TextDiff::from_lines(expected, &actual);
        assert_eq!(diff.ratio(), 1.0);
    }

    #[test]
    fn test_apply_creation_and_deletion() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("gone.txt"), "abc\ndef\n").unwrap();

        let patch = "diff --git a/nested/new.txt b/nested/new.txt\nnew file mode 100644\nindex 0000000..1234567\n--- /dev/null\n+++ b/nested/new.txt\n@@ -0,0 +1,2 @@\n+alpha\n+beta\ndiff --git a/gone.txt b/gone.txt\ndeleted file mode 100644\nindex 8baef1b..0000000\n--- a/gone.txt\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-abc\n-def\n";
        let affected = apply_patch(patch, dir.path()).unwrap();

        assert_eq!(affected.added, vec![PathBuf::from("nested/new.txt")]);
        assert_eq!(affected.deleted, vec![PathBuf::from("gone.txt")]);
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/new.txt")).unwrap(),
            "alpha\nbeta\n"
        );
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn test_recreation_is_idempotent_only_for_identical_content() {
        let dir = tempdir().unwrap();
        let patch = "diff --git a/new.txt b/new.txt\nnew file mode 100644\nindex 0000000..1234567\n--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+hello\n";

        apply_patch(patch, dir.path()).unwrap();
        // Identical content: applying again succeeds.
        apply_patch(patch, dir.path()).unwrap();

        fs::write(dir.path().join("new.txt"), "different\n").unwrap();
        assert!(matches!(
            apply_patch(patch, dir.path()),
            Err(ApplyError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_apply_rename_mode_change_and_patch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.sh"), "#!/bin/sh\necho old\n").unwrap();

        let patch = "diff --git a/old.sh b/new.sh\nold mode 100644\nnew mode 100755\nrename from old.sh\nrename to new.sh\nindex 1111111..2222222\n--- a/old.sh\n+++ b/new.sh\n@@ -1,2 +1,2 @@\n #!/bin/sh\n-echo old\n+echo new\n";
        let affected = apply_patch(patch, dir.path()).unwrap();

        assert!(!dir.path().join("old.sh").exists());
        let renamed = dir.path().join("new.sh");
        assert_eq!(
            fs::read_to_string(&renamed).unwrap(),
            "#!/bin/sh\necho new\n"
        );
        assert_eq!(
            affected.renamed,
            vec![(PathBuf::from("old.sh"), PathBuf::from("new.sh"))]
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&renamed).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0, "expected new.sh to be executable");
        }
    }

    #[test]
    fn test_drifted_file_is_a_context_mismatch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("banana.ts"), "this\nhas\ndrifted\nbadly\nnow\n").unwrap();

        match apply_patch(BANANA_PATCH, dir.path()) {
            Err(ApplyError::ContextMismatch {
                path,
                line,
                expected,
                actual,
            }) => {
                assert_eq!(path, PathBuf::from("banana.ts"));
                assert_eq!(line, 2);
                assert_eq!(expected, "is");
                assert_eq!(actual, "has");
            }
            result => panic!("expected ContextMismatch, got {result:?}"),
        }
    }

    #[test]
    fn test_missing_target_is_path_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            apply_patch(BANANA_PATCH, dir.path()),
            Err(ApplyError::PathNotFound { .. })
        ));

        let rename = "diff --git a/a.txt b/b.txt\nrename from a.txt\nrename to b.txt\n";
        assert!(matches!(
            apply_patch(rename, dir.path()),
            Err(ApplyError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_failure_does_not_roll_back_earlier_parts() {
        let dir = tempdir().unwrap();
        let patch = "diff --git a/first.txt b/first.txt\nnew file mode 100644\nindex 0000000..1234567\n--- /dev/null\n+++ b/first.txt\n@@ -0,0 +1 @@\n+created\ndiff --git a/missing.txt b/missing.txt\ndeleted file mode 100644\nindex 1234567..0000000\n--- a/missing.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-nope\n";

        assert!(apply_patch(patch, dir.path()).is_err());
        // The creation from the first part is still on disk.
        assert_eq!(
            fs::read_to_string(dir.path().join("first.txt")).unwrap(),
            "created\n"
        );
    }

    #[test]
    fn test_no_newline_patch_strips_trailing_newline() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tail.txt"), "first\nold\n").unwrap();

        let patch = "--- a/tail.txt\n+++ b/tail.txt\n@@ -1,2 +1,2 @@\n first\n-old\n+new\n\\ No newline at end of file\n";
        apply_patch(patch, dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("tail.txt")).unwrap(),
            "first\nnew"
        );
    }

    #[test]
    fn test_crlf_content_round_trips_through_apply() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("crlf.txt"), "keep\r\nold\r\n").unwrap();

        let patch = "--- a/crlf.txt\n+++ b/crlf.txt\n@@ -1,2 +1,2 @@\n keep\r\n-old\r\n+new\r\n";
        apply_patch(patch, dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("crlf.txt")).unwrap(),
            "keep\r\nnew\r\n"
        );
    }

    #[test]
    fn test_preview_reports_changes_without_applying() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("banana.ts"), "this\nis\n\na\nfile\n").unwrap();

        let document = parse(BANANA_PATCH).unwrap();
        let rendered = preview(&document, dir.path()).unwrap();
        assert!(rendered.contains("--- a/banana.ts"));
        assert!(rendered.contains("-a"));

        // Nothing was written.
        assert_eq!(
            fs::read_to_string(dir.path().join("banana.ts")).unwrap(),
            "this\nis\n\na\nfile\n"
        );
    }
}
