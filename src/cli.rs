use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::OverlayStyle;

#[derive(Debug, Parser)]
#[command(
    name = "plprog",
    version,
    about = "Track which playlist videos you have finished and overlay completion on the list"
)]
pub struct Cli {
    /// Debug-level logging on stderr (honours RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine against a scripted page fixture.
    Session {
        page: PathBuf,
        /// Overrides PLPROG_STYLE.
        #[arg(long, value_enum)]
        style: Option<OverlayStyle>,
        /// Print the rendered playlist markup.
        #[arg(long)]
        html: bool,
        /// Keep progress in memory instead of the database.
        #[arg(long)]
        memory: bool,
    },
    /// Show progress for the playlist in a URL.
    Status {
        url: String,
        /// Page fixture to count items from.
        #[arg(long)]
        page: Option<PathBuf>,
    },
    /// Forget all progress for a playlist (URL or list id).
    Reset { target: String },
    /// List playlists with stored progress.
    List,
    Tui,
}
