//! Command-line surface (spec §6 "CLI / scripting surface"), grounded on
//! the teacher's `clap`-derived argument struct and subcommand split.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "syncengine", version, about = "Sub-millisecond server clock synchronization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the server registry / sync-history store.
    #[arg(long, global = true)]
    pub store: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a new server target.
    Add { url: String },

    /// List registered server targets.
    List,

    /// Remove a registered server target.
    Remove { id: String },

    /// Run the four-phase sync against a registered target.
    Sync {
        id: String,

        #[arg(long)]
        sample_count: Option<u32>,
    },

    /// Request cancellation of an in-progress sync for a target.
    Cancel { id: String },

    /// Show past sync results for a target.
    History {
        id: String,

        #[arg(long)]
        limit: Option<usize>,
    },
}
