use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Parse and apply unified-diff patches.
#[derive(Debug, Parser)]
#[clap(author, version)]
struct Cli {
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Parse a patch and print the resulting document.
    Parse(ParseCommand),
    /// Apply a patch to a target directory.
    Apply(ApplyCommand),
}

#[derive(Debug, Parser)]
struct ParseCommand {
    /// Patch file to read, or `-` for stdin.
    patch_file: PathBuf,

    /// Print the document as JSON instead of re-rendered diff text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ApplyCommand {
    /// Patch file to read, or `-` for stdin.
    patch_file: PathBuf,

    /// Directory the patch paths are resolved against.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Print the changes that would be made without touching the filesystem.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let default_level = "error";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.subcommand {
        Subcommand::Parse(cmd) => run_parse(cmd),
        Subcommand::Apply(cmd) => run_apply(cmd),
    }
}

fn read_patch(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read patch from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

fn run_parse(cmd: ParseCommand) -> anyhow::Result<()> {
    let patch = read_patch(&cmd.patch_file)?;
    let document = patchkit_core::parse(&patch)?;
    debug!("parsed {} part(s)", document.parts.len());
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print!("{}", document.render());
    }
    Ok(())
}

fn run_apply(cmd: ApplyCommand) -> anyhow::Result<()> {
    let patch = read_patch(&cmd.patch_file)?;
    let document = patchkit_core::parse(&patch)?;
    debug!(
        "applying {} part(s) under {}",
        document.parts.len(),
        cmd.dir.display()
    );
    if cmd.dry_run {
        print!("{}", patchkit_core::preview(&document, &cmd.dir)?);
        return Ok(());
    }
    let affected = patchkit_core::apply_document(&document, &cmd.dir)?;
    patchkit_core::print_summary(&affected, &mut std::io::stdout())?;
    Ok(())
}
