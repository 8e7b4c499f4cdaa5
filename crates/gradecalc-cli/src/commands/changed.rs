//! The `gradecalc changed` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use gradecalc_core::store::Store;
use gradecalc_core::value::Value;

use super::open_state;

pub fn execute(state: PathBuf, list: bool) -> Result<()> {
    let store = open_state(&state)?;
    let changed = store.changed_scores();

    if !list {
        println!("{}", changed.len());
        return Ok(());
    }
    if changed.is_empty() {
        println!("No scores awaiting recalculation.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Score", "Ledger", "Task", "Person", "Value", "Committed"]);
    for id in changed {
        let Some(score) = store.score(id) else {
            continue;
        };
        let task = store.task(score.task);
        let ledger = task
            .as_ref()
            .and_then(|t| store.ledger(t.ledger))
            .map(|l| l.slug)
            .unwrap_or_default();
        let person = store
            .person(score.person)
            .map(|p| p.name)
            .unwrap_or_default();
        let committed = if score.old_value == Value::FORCED_RECALC {
            "(forced)".to_string()
        } else {
            score.old_value.to_string()
        };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(ledger),
            Cell::new(task.map(|t| t.slug).unwrap_or_default()),
            Cell::new(person),
            Cell::new(&score.value),
            Cell::new(committed),
        ]);
    }
    println!("{table}");
    Ok(())
}
