//! The `gradecalc validate` command.

use std::path::PathBuf;

use anyhow::Result;

use gradecalc_core::parser;
use gradecalc_core::registry::FormulaRegistry;

pub fn execute(ledger_path: PathBuf) -> Result<()> {
    let ledgers = parser::parse_ledger_path(&ledger_path)?;
    let registry = FormulaRegistry::with_defaults();

    let mut total_warnings = 0;

    for ledger in &ledgers {
        println!(
            "Ledger: {} ({} tasks, {} people)",
            ledger.name,
            ledger.tasks.len(),
            ledger.people.len()
        );

        let warnings = parser::validate_ledger(ledger, &registry);
        for w in &warnings {
            let prefix = w
                .subject
                .as_ref()
                .map(|s| format!("  [{s}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All ledgers valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
