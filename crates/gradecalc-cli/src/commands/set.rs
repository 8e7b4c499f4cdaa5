//! The `gradecalc set` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use gradecalc_core::engine::NoopReporter;
use gradecalc_core::staleness;
use gradecalc_core::store::Store;
use gradecalc_core::value::Value;

use super::{driver, find_ledger, find_member, open_state, save_state};

pub fn execute(
    state: PathBuf,
    ledger_slug: String,
    task_slug: String,
    person: String,
    value: String,
    recalc: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let driver = driver(config_path.as_deref())?;
    let mut store = open_state(&state)?;
    let ledger = find_ledger(&store, &ledger_slug)?;
    let task = store
        .task_by_slug(ledger.id, &task_slug)
        .with_context(|| format!("task '{task_slug}' not found in {}", ledger.slug))?;
    let person = find_member(&store, &ledger, &person)?;
    let score = store
        .score_for(task.id, person)
        .with_context(|| format!("no score for person {person} on {task_slug}"))?;

    if task.formula.is_some() || score.formula.is_some() {
        eprintln!("Warning: {task_slug} is calculated; the entered value will be recalculated");
    }

    let value = Value::from(value.as_str());
    staleness::set_score_value(&mut store, score.id, value.clone())?;
    let pending = store.changed_scores().len();

    if recalc {
        let report = driver.run_pass(&mut store, &NoopReporter);
        println!(
            "Set {task_slug} for person {person} to '{value}'; recalculated {} (+{} downstream)",
            report.calculated, report.cascaded
        );
    } else {
        println!(
            "Set {task_slug} for person {person} to '{value}'; {pending} score(s) awaiting recalculation"
        );
    }

    save_state(&store, &state)?;
    Ok(())
}
