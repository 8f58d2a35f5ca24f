use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "diary")]
#[command(about = "Log voiding events from the command line, offline-first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log an event (now, or at a given local time)
    #[command(alias = "new")]
    Add {
        /// Local time of day as HH:MM (defaults to the current instant)
        #[arg(long, value_name = "HH:MM")]
        at: Option<String>,

        /// Local date for --at (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD", requires = "at")]
        date: Option<NaiveDate>,

        /// Optional memo
        #[arg(short, long)]
        memo: Option<String>,
    },
    /// Soft-delete an event
    Delete {
        /// Event ID
        id: String,
    },
    /// Replace an event's memo (empty clears it)
    Memo {
        /// Event ID
        id: String,
        /// New memo text
        text: Vec<String>,
    },
    /// List one day's events
    List {
        /// Date to list (defaults to today)
        #[arg(value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-day counts for one month
    Month {
        /// Month as YYYY-MM
        #[arg(value_name = "YYYY-MM")]
        month: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show session and pending-sync status
    Status,
    /// Push pending local changes to the backend
    Sync,
    /// Pull the full remote history and merge it locally
    Pull,
    /// Sign in with a Supabase refresh token
    Login {
        /// Refresh token issued for this user
        refresh_token: String,
    },
    /// Forget the stored session
    Logout,
}
