//! The `gradecalc scores` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Table};

use gradecalc_core::store::Store;

use super::{config, find_ledger, open_state};

pub fn execute(state: PathBuf, ledger_slug: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = config(config_path.as_deref())?;
    let store = open_state(&state)?;
    let ledger = find_ledger(&store, &ledger_slug)?;

    let tasks: Vec<_> = store
        .tasks_of_ledger(ledger.id)
        .into_iter()
        .filter_map(|id| store.task(id))
        .collect();

    let mut table = Table::new();
    let mut header = vec![Cell::new("Person")];
    header.extend(tasks.iter().map(|t| Cell::new(&t.slug)));
    table.set_header(header);

    for person in ledger.members.iter().filter_map(|id| store.person(*id)) {
        if !person.active {
            continue;
        }
        let mut row = vec![Cell::new(&person.name)];
        for task in &tasks {
            let text = store
                .score_for(task.id, person.id)
                .map(|s| config.render(&s))
                .unwrap_or_default();
            row.push(Cell::new(text).set_alignment(CellAlignment::Right));
        }
        table.add_row(row);
    }

    println!("{} ({})", ledger.name, ledger.slug);
    println!("{table}");
    Ok(())
}
