//! The `gradecalc requeue` command.

use std::path::PathBuf;

use anyhow::Result;

use gradecalc_core::staleness::requeue_ledger;

use super::{driver, find_ledger, open_state, save_state};

pub fn execute(
    state: PathBuf,
    ledger_slug: String,
    deps: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let driver = driver(config_path.as_deref())?;
    let mut store = open_state(&state)?;
    let ledger = find_ledger(&store, &ledger_slug)?;

    let flagged = requeue_ledger(
        &mut store,
        driver.registry(),
        ledger.id,
        deps,
        driver.config().skip_matched_responses,
    )?;
    save_state(&store, &state)?;

    println!("Requeued {flagged} score(s) in {}", ledger.slug);
    Ok(())
}
