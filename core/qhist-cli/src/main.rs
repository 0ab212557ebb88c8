//! qhist: command-line access to the query-run history.
//!
//! ## Subcommands
//!
//! - `list`: Print every run in display order
//! - `label`: Set or clear a run's label
//! - `remove`: Remove runs and delete their local artifacts
//! - `scrub`: Run one retention pass over the artifact roots
//! - `compare`: Check that two runs can be compared

mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use qhist_core::{SortOrder, StorageConfig};

#[derive(Parser)]
#[command(name = "qhist")]
#[command(about = "Query-run history and artifact retention")]
#[command(version)]
struct Cli {
    /// Storage root (default: ~/.qhist)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List runs as `id  status  label`
    List {
        #[arg(long, value_enum, default_value_t = SortArg::DateAsc)]
        sort: SortArg,

        /// Only show runs in this query language
        #[arg(long, value_name = "LANG")]
        language: Option<String>,
    },

    /// Set a run's label; omit LABEL to restore the default
    Label {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(value_name = "LABEL")]
        label: Option<String>,
    },

    /// Remove runs from history
    Remove {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,

        /// Also remove remote runs that are still executing
        #[arg(long)]
        yes: bool,
    },

    /// Delete expired artifact directories
    Scrub {
        /// Ignore the throttle lease
        #[arg(long)]
        force: bool,
    },

    /// Resolve which of two runs a comparison would run from
    Compare {
        #[arg(value_name = "ID")]
        from: String,

        #[arg(value_name = "ID")]
        to: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortArg {
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
    CountAsc,
    CountDesc,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::NameAsc => SortOrder::NameAsc,
            SortArg::NameDesc => SortOrder::NameDesc,
            SortArg::DateAsc => SortOrder::DateAsc,
            SortArg::DateDesc => SortOrder::DateDesc,
            SortArg::CountAsc => SortOrder::CountAsc,
            SortArg::CountDesc => SortOrder::CountDesc,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let storage = cli
        .root
        .map(StorageConfig::with_root)
        .unwrap_or_default();
    let _logging_guard = logging::init(&storage.logs_dir());

    let mut stdout = std::io::stdout().lock();
    let result = match cli.command {
        Commands::List { sort, language } => {
            commands::list(&storage, sort.into(), language.as_deref(), &mut stdout)
        }
        Commands::Label { id, label } => commands::label(&storage, &id, label, &mut stdout),
        Commands::Remove { ids, yes } => commands::remove(&storage, &ids, yes, &mut stdout),
        Commands::Scrub { force } => commands::scrub(&storage, force, &mut stdout),
        Commands::Compare { from, to } => commands::compare(&storage, &from, &to, &mut stdout),
    };

    if let Err(e) = result {
        tracing::info!(error = %e, "qhist command failed");
        eprintln!("qhist: {}", e);
        std::process::exit(1);
    }
}
