//! # Tessera CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create a graph and optionally write its config
//! - `status` - Show backend, element counts and metadata
//! - `apply` - Commit element mutations from a JSON file
//! - `get` - Read one element as the caller sees it
//! - `history` - Read the historical events of elements
//! - `scan` - Read every element of a row range
//! - `extended` - Read the extended-data rows of an element
//! - `metadata` - Read or write a graph metadata entry

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tessera_core::{Authorizations, ElementType, TesseraError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessera - temporal, visibility-filtered property graph
///
/// Every element is a stream of timestamped mutations; reads fold that
/// stream into what one caller may see at one instant.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Graph config file (TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config path
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend, overriding the config: "columnar" or "in_memory"
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<String>,

    /// Authorization labels of the caller (comma-separated)
    #[arg(short = 'a', long, global = true, value_delimiter = ',')]
    pub auths: Vec<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    #[must_use]
    pub fn authorizations(&self) -> Authorizations {
        Authorizations::new(self.auths.iter().filter(|label| !label.is_empty()))
    }
}

/// Element kind selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElementKindArg {
    Vertex,
    Edge,
}

impl From<ElementKindArg> for ElementType {
    fn from(kind: ElementKindArg) -> Self {
        match kind {
            ElementKindArg::Vertex => ElementType::Vertex,
            ElementKindArg::Edge => ElementType::Edge,
        }
    }
}

/// Read flags shared by `get` and `scan`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ReadArgs {
    /// Read the element as it was at this timestamp (milliseconds)
    #[arg(long)]
    pub as_of: Option<i64>,

    /// Keep at most this many versions per column
    #[arg(long)]
    pub max_versions: Option<usize>,

    /// Only fetch these properties (comma-separated); all when absent
    #[arg(short = 'p', long, value_delimiter = ',')]
    pub properties: Vec<String>,

    /// Return hidden elements and properties too
    #[arg(long)]
    pub include_hidden: bool,

    /// Bypass the element visibility gate (requires --include-hidden)
    #[arg(long, requires = "include_hidden")]
    pub admin: bool,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new graph
    Init {
        /// Force initialization even if the database exists
        #[arg(short, long)]
        force: bool,

        /// Also write the effective config to this TOML file
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Show graph status
    Status,

    /// Commit element mutations from a JSON file (one object or an array)
    Apply {
        /// Path to the mutation file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Read one element
    Get {
        /// Element kind
        #[arg(short = 't', long, value_enum, default_value = "vertex")]
        element_type: ElementKindArg,

        /// Element id
        id: String,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Read the historical events of elements, merged in event order
    History {
        /// Vertex ids
        #[arg(long = "vertex")]
        vertices: Vec<String>,

        /// Edge ids
        #[arg(long = "edge")]
        edges: Vec<String>,

        /// Inclusive lower time bound
        #[arg(long)]
        start: Option<i64>,

        /// Inclusive upper time bound
        #[arg(long)]
        end: Option<i64>,

        /// Maximum number of events
        #[arg(short, long)]
        limit: Option<usize>,

        /// Omit property values from property events
        #[arg(long)]
        without_values: bool,

        /// Resume after this event id (JSON, as printed by a previous call)
        #[arg(long)]
        after: Option<String>,
    },

    /// Read every element of a row range
    Scan {
        /// Element kind
        #[arg(short = 't', long, value_enum, default_value = "vertex")]
        element_type: ElementKindArg,

        /// Only rows starting with this prefix
        #[arg(long, conflicts_with_all = ["start", "end"])]
        prefix: Option<String>,

        /// First row (inclusive)
        #[arg(long)]
        start: Option<String>,

        /// Last row (exclusive)
        #[arg(long)]
        end: Option<String>,

        /// Stop after this many elements
        #[arg(short, long)]
        limit: Option<usize>,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Read the extended-data rows of an element
    Extended {
        /// Element kind
        #[arg(short = 't', long, value_enum, default_value = "vertex")]
        element_type: ElementKindArg,

        /// Element id
        id: String,

        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Read or write a graph metadata entry
    Metadata {
        /// Entry key
        key: String,

        /// New value (UTF-8); reads when absent
        value: Option<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), TesseraError> {
    let config = resolve_config(
        cli.config.as_deref(),
        cli.database.as_deref(),
        cli.backend.as_deref(),
    )?;
    let auths = cli.authorizations();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Init {
            force,
            write_config,
        }) => cmd_init(&config, force, write_config.as_deref()),
        Some(Commands::Status) => cmd_status(&config, &auths, json_mode),
        Some(Commands::Apply { file }) => cmd_apply(&config, &auths, json_mode, &file),
        Some(Commands::Get {
            element_type,
            id,
            read,
        }) => cmd_get(&config, &auths, json_mode, element_type.into(), &id, &read),
        Some(Commands::History {
            vertices,
            edges,
            start,
            end,
            limit,
            without_values,
            after,
        }) => {
            let request = HistoryRequest {
                vertices,
                edges,
                start,
                end,
                limit,
                include_property_values: !without_values,
                after,
            };
            cmd_history(&config, &auths, json_mode, &request)
        }
        Some(Commands::Scan {
            element_type,
            prefix,
            start,
            end,
            limit,
            read,
        }) => {
            let range = row_range(prefix, start, end);
            cmd_scan(
                &config,
                &auths,
                json_mode,
                element_type.into(),
                &range,
                limit,
                &read,
            )
        }
        Some(Commands::Extended {
            element_type,
            id,
            table,
        }) => cmd_extended(
            &config,
            &auths,
            json_mode,
            element_type.into(),
            &id,
            table.as_deref(),
        ),
        Some(Commands::Metadata { key, value }) => {
            cmd_metadata(&config, json_mode, &key, value.as_deref())
        }
        None => {
            // No subcommand - show status by default
            cmd_status(&config, &auths, json_mode)
        }
    }
}
