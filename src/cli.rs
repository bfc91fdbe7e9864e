use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "podvoice",
    version,
    about = "Play podcasts and radio on MPD from spoken-style commands"
)]
pub struct Cli {
    /// Config file with podcast and radio mappings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Episode catalog database.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch configured feeds into the catalog once.
    Sync {
        #[arg(long)]
        podcast: Option<String>,
    },
    /// Run a single voice command, e.g. `command podcast previous news`.
    Command {
        #[arg(value_enum)]
        module: ModuleArg,
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
    /// Sync in the background and read commands from stdin, one per line.
    Listen,
    /// Show the cached episode for a podcast without playing it.
    Latest {
        podcast: String,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Show every cached episode of one podcast, newest first.
    Episodes { podcast: String },
    /// Show the newest cached episode of every configured podcast.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModuleArg {
    Music,
    Radio,
    Podcast,
}
