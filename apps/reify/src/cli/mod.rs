//! # Reify CLI Module
//!
//! This module implements the CLI interface for Reify.
//!
//! ## Available Commands
//!
//! - `run` - Load a program, settle its effects and print its queries
//! - `stats` - Load a program and print store statistics
//! - `describe` - List the installed operators, aggregations and effects
//! - `check` - Parse and validate a program without running it

mod commands;

use clap::{Parser, Subcommand};
use reify_core::GraphError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Reify - a self-describing quad store
///
/// Facts, rules, aggregations and effects all live in one store of
/// `(entity, attribute, value, context)` quads.
#[derive(Parser, Debug)]
#[command(name = "reify")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a program, settle async effects and print its named queries
    Run {
        /// Program file (TOML, or JSON with a `.json` extension)
        file: PathBuf,

        /// Also print every quad in insertion order
        #[arg(long)]
        dump: bool,

        /// Do not wait for asynchronous effects
        #[arg(long)]
        no_settle: bool,
    },

    /// Load a program and print store statistics
    Stats {
        /// Program file (TOML, or JSON with a `.json` extension)
        file: PathBuf,
    },

    /// List installed productions through their self-description facts
    Describe {
        /// Only show one kind (operation, effect, aggregation, rule, type)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Parse and validate a program without running it
    Check {
        /// Program file (TOML, or JSON with a `.json` extension)
        file: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GraphError> {
    let json_mode = cli.json_mode;
    let verbose = cli.verbose;

    match cli.command {
        Some(Commands::Run {
            file,
            dump,
            no_settle,
        }) => {
            let options = RunOptions {
                json_mode,
                verbose,
                dump,
                settle: !no_settle,
            };
            cmd_run(&file, options).await
        }
        Some(Commands::Stats { file }) => cmd_stats(&file, json_mode).await,
        Some(Commands::Describe { kind }) => cmd_describe(kind.as_deref(), json_mode),
        Some(Commands::Check { file }) => cmd_check(&file, json_mode),
        None => {
            // No subcommand - list the standard productions by default
            cmd_describe(None, json_mode)
        }
    }
}
