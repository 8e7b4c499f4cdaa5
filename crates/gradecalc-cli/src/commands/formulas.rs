//! The `gradecalc formulas` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use gradecalc_core::model::Formula;
use gradecalc_core::registry::FormulaRegistry;
use gradecalc_core::store::Store;

use super::open_state;

pub fn execute(state: Option<PathBuf>, types: bool) -> Result<()> {
    if types {
        let mut table = Table::new();
        table.set_header(vec!["Code", "Name"]);
        for (tag, name) in FormulaRegistry::with_defaults().choices() {
            table.add_row(vec![tag, name]);
        }
        println!("{table}");
        return Ok(());
    }

    let Some(state) = state else {
        anyhow::bail!("--state is required unless --types is given");
    };
    let store = open_state(&state)?;
    let formulas = store.formulas();
    if formulas.is_empty() {
        println!("No formulas stored.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Id", "Type", "Arguments", "Label"]);
    for formula in &formulas {
        table.add_row(vec![
            Cell::new(formula.id),
            Cell::new(formula.kind),
            Cell::new(Formula::canonical_args(&formula.args)),
            Cell::new(formula.label()),
        ]);
    }
    println!("{table}");
    Ok(())
}
