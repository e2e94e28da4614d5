//! # Reify
//!
//! The command-line runner for the Reify quad store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/reify (THE BINARY)           │
//! │                                              │
//! │  ┌─────────────┐        ┌────────────────┐   │
//! │  │   CLI       │        │ Runtime effects│   │
//! │  │  (clap)     │        │ (tokio: SLEEP) │   │
//! │  └──────┬──────┘        └───────┬────────┘   │
//! │         └───────────┬───────────┘            │
//! │                     ▼                        │
//! │             ┌───────────────┐                │
//! │             │  reify-core   │                │
//! │             │  (THE LOGIC)  │                │
//! │             └───────────────┘                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! reify run family.toml
//! reify --json-mode run family.toml --dump
//! reify describe --kind operation
//! reify check family.toml
//! ```

use clap::Parser;
use reify::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // REIFY_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("REIFY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reify=info,reify_core=info".into());

    // Logs go to stderr so `--json-mode` output stays parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the one-line startup banner.
fn print_banner() {
    println!("reify v{} - quads all the way down", env!("CARGO_PKG_VERSION"));
    println!();
}
