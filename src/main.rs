//! CLI front-end binding to the ingest core (§6). Thin by design: argument
//! parsing and process-exit handling only, no ingest logic of its own.
//!
//! Grounded on `cognitod/src/main.rs`'s `clap::Parser` derive plus
//! `anyhow::Context` usage at the fallible-setup boundary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use towl_ingest::ingest;

#[derive(Parser)]
#[command(name = "towl-ingest", about = "Build a queryable store from an instrumented runtime log")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a fresh store from a log file.
    Create {
        #[command(subcommand)]
        action: CreateAction,
    },
    /// Maintenance operations on an existing store.
    Maintain {
        #[command(subcommand)]
        action: MaintainAction,
    },
}

#[derive(Subcommand)]
enum CreateAction {
    /// Ingest a single log file into `--output`.
    FromLogFile {
        path: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        #[arg(short = 'f', long)]
        overwrite: bool,

        #[arg(short, long)]
        copy: bool,
    },
}

#[derive(Subcommand)]
enum MaintainAction {
    /// Re-run ingest over a store directory's preserved input log.
    Recreate {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Create {
            action: CreateAction::FromLogFile {
                path,
                output,
                overwrite,
                copy,
            },
        } => {
            ingest::create_from_log_file(&path, &output, overwrite, copy)
                .with_context(|| format!("ingesting {}", path.display()))?;
        }
        Command::Maintain {
            action: MaintainAction::Recreate { path },
        } => {
            ingest::maintain_recreate(&path).with_context(|| format!("recreating store at {}", path.display()))?;
        }
    }

    Ok(())
}
