//! gradecalc CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "gradecalc",
    version,
    about = "Gradebook formula and recalculation engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check ledger TOML files for invalid formulas and unknown references
    Validate {
        /// Path to a ledger file or a directory of them
        #[arg(long)]
        ledger: PathBuf,
    },

    /// Load ledger TOML files into a state snapshot
    Load {
        /// Path to a ledger file or a directory of them
        #[arg(long)]
        ledger: PathBuf,

        /// State snapshot (created if missing)
        #[arg(long)]
        state: PathBuf,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Resolve stale dependencies and recalculate changed scores
    Recalc {
        /// State snapshot
        #[arg(long)]
        state: PathBuf,

        /// Keep running passes until interrupted
        #[arg(long)]
        repeat: bool,

        /// Seconds between passes in repeat mode (default: from config)
        #[arg(long)]
        delay: Option<f64>,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Force recalculation of every calculated score in a ledger
    Requeue {
        /// State snapshot
        #[arg(long)]
        state: PathBuf,

        /// Ledger slug
        #[arg(long)]
        ledger: String,

        /// Rebuild dependency edges right away
        #[arg(long)]
        deps: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Count or list scores awaiting recalculation
    Changed {
        /// State snapshot
        #[arg(long)]
        state: PathBuf,

        /// List the scores instead of counting them
        #[arg(long)]
        list: bool,
    },

    /// Enter a score value
    Set {
        /// State snapshot
        #[arg(long)]
        state: PathBuf,

        /// Ledger slug
        #[arg(long)]
        ledger: String,

        /// Task slug
        #[arg(long)]
        task: String,

        /// Person id, student number or name
        #[arg(long)]
        person: String,

        /// New value; an empty string clears the score
        #[arg(long, allow_hyphen_values = true)]
        value: String,

        /// Run a recalculation pass afterwards
        #[arg(long)]
        recalc: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List stored formulas or the registered formula types
    Formulas {
        /// State snapshot
        #[arg(long, required_unless_present = "types")]
        state: Option<PathBuf>,

        /// List formula type codes instead
        #[arg(long)]
        types: bool,
    },

    /// Show a ledger's scores as a table
    Scores {
        /// State snapshot
        #[arg(long)]
        state: PathBuf,

        /// Ledger slug
        #[arg(long)]
        ledger: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config and sample ledger
    Init,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "gradecalc=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { ledger } => commands::validate::execute(ledger),
        Commands::Load {
            ledger,
            state,
            config,
        } => commands::load::execute(ledger, state, config),
        Commands::Recalc {
            state,
            repeat,
            delay,
            json,
            config,
        } => commands::recalc::execute(state, repeat, delay, json, config).await,
        Commands::Requeue {
            state,
            ledger,
            deps,
            config,
        } => commands::requeue::execute(state, ledger, deps, config),
        Commands::Changed { state, list } => commands::changed::execute(state, list),
        Commands::Set {
            state,
            ledger,
            task,
            person,
            value,
            recalc,
            config,
        } => commands::set::execute(state, ledger, task, person, value, recalc, config),
        Commands::Formulas { state, types } => commands::formulas::execute(state, types),
        Commands::Scores {
            state,
            ledger,
            config,
        } => commands::scores::execute(state, ledger, config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
