//! # Tessera
//!
//! Operator CLI for a tessera graph.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │             apps/tessera (THE BINARY)         │
//! │                                               │
//! │   ┌──────────────┐      ┌─────────────────┐   │
//! │   │  CLI (clap)  │ ───▶ │  config (TOML)  │   │
//! │   └──────┬───────┘      └─────────────────┘   │
//! │          ▼                                    │
//! │   ┌──────────────────┐                        │
//! │   │   tessera-core   │                        │
//! │   │   (THE KERNEL)   │                        │
//! │   └──────────────────┘                        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tessera init -D graph.redb
//! tessera apply -f mutations.json -a public
//! tessera get -t vertex v1 -a public,secret
//! tessera history --vertex v1
//! tessera scan -t edge --prefix e
//! ```

use clap::Parser;
use tessera::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // TESSERA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TESSERA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "tessera=debug,tessera_core=debug"
    } else {
        "tessera=info,tessera_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so command output stays parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
