//! `bds` command-line tool for inspecting BDS containers on disk.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bds::handler::ChecksumHandler;
use bds::storage::{Directory, ReadOnly};
use bds::structure::{DataStructure, DataStructureConfig, DataStructureError, ReadOnlyHandle};

#[derive(Parser)]
#[command(name = "bds", about = "Inspect and check BDS data containers", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print version, format, metadata and contents of a container
    Inspect(ContainerArgs),
    /// Check that all mandatory items are present
    Validate(ContainerArgs),
    /// Recompute the checksums of the original data
    Verify(ContainerArgs),
}

#[derive(Args)]
struct ContainerArgs {
    /// Container root directory
    path: PathBuf,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Inspect(args) => cmd_inspect(&args.path),
        Command::Validate(args) => cmd_validate(&args.path),
        Command::Verify(args) => cmd_verify(&args.path),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Opening a filesystem container creates its root, so refuse paths that
/// don't exist instead of leaving an empty directory behind.
fn container(path: &Path) -> Result<DataStructure> {
    if !path.is_dir() {
        bail!("no container directory at {}", path.display());
    }
    DataStructure::on_filesystem(path, DataStructureConfig::new())
        .with_context(|| format!("failed to open {}", path.display()))
}

fn count_files(dir: Result<Directory<ReadOnly>, DataStructureError>) -> Result<usize> {
    match dir {
        Ok(dir) => Ok(dir.list_files(None, true)?.len()),
        Err(DataStructureError::Storage(e)) if e.is_not_found() => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn print_or_unset<T: std::fmt::Display>(label: &str, value: Option<T>) {
    match value {
        Some(value) => println!("{:<24}{}", label, value),
        None => println!("{:<24}<unset>", label),
    }
}

fn cmd_inspect(path: &Path) -> Result<ExitCode> {
    let handle = container(path)?.open_read_only(false)?;
    describe(&handle)?;
    handle.close()?;
    Ok(ExitCode::SUCCESS)
}

fn describe(handle: &ReadOnlyHandle) -> Result<()> {
    print_or_unset("version", handle.version());
    print_or_unset("format", handle.format());

    let parameters = handle.format_parameters();
    println!("parameters ({})", parameters.len());
    for parameter in parameters {
        println!("  {}", parameter);
    }

    print_or_unset("experiment", handle.try_experiment_identifier()?);
    print_or_unset("registered", handle.try_experiment_registration_timestamp()?);
    print_or_unset("registrator", handle.try_experiment_registrator()?);
    print_or_unset(
        "sample",
        handle
            .try_sample()?
            .map(|s| format!("{} ({}: {})", s.code, s.type_code, s.type_description)),
    );
    print_or_unset(
        "data set",
        handle.try_data_set()?.map(|d| {
            let kind = if d.is_measured { "measured" } else { "derived" };
            format!("{} ({}, {})", d.code, d.observable_type, kind)
        }),
    );

    println!("{:<24}{}", "original files", count_files(handle.original_data())?);
    println!("{:<24}{}", "standard files", count_files(handle.standard_data())?);

    let references = handle.references();
    println!("references ({})", references.len());
    for reference in references.values() {
        println!("  {}", reference);
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<ExitCode> {
    match container(path)?.open_read_only(true) {
        Ok(handle) => {
            handle.close()?;
            println!("{}: valid", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if !e.is_structural() {
                tracing::debug!(error = ?e, "container could not be opened");
            }
            println!("{}: invalid: {}", path.display(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_verify(path: &Path) -> Result<ExitCode> {
    let handle = container(path)?.open_read_only(false)?;
    if ChecksumHandler::load(&handle.root())?.is_none() {
        handle.close()?;
        println!("{}: no checksums recorded", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mismatches = handle.verify_checksums()?;
    handle.close()?;
    if mismatches.is_empty() {
        println!("{}: checksums match", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    for mismatch in &mismatches {
        println!("{}", mismatch);
    }
    println!("{}: {} mismatch(es)", path.display(), mismatches.len());
    Ok(ExitCode::FAILURE)
}
