//! The `gradecalc load` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use gradecalc_core::parser;
use gradecalc_core::store::MemoryStore;

use super::{driver, open_state, save_state};

pub fn execute(ledger_path: PathBuf, state: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let driver = driver(config_path.as_deref())?;
    let ledgers = parser::parse_ledger_path(&ledger_path)?;
    anyhow::ensure!(
        !ledgers.is_empty(),
        "no ledger files found in {}",
        ledger_path.display()
    );

    let mut store = if state.exists() {
        open_state(&state)?
    } else {
        MemoryStore::new()
    };

    for ledger in &ledgers {
        let warnings = parser::validate_ledger(ledger, driver.registry());
        for w in &warnings {
            eprintln!("Warning: {}: {}", ledger.slug, w.message);
        }
        let summary = parser::load_ledger(
            &mut store,
            driver.registry(),
            ledger,
            driver.config().skip_matched_responses,
        )
        .with_context(|| format!("failed to load ledger {}", ledger.slug))?;
        println!(
            "Loaded {}: {} tasks, {} people, {} scores ({} entered), {} responses",
            ledger.slug,
            summary.tasks,
            summary.people,
            summary.scores,
            summary.entered,
            summary.responses
        );
    }

    save_state(&store, &state)?;
    println!("State saved to: {}", state.display());
    Ok(())
}
