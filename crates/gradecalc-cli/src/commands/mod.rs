//! One module per subcommand, plus the state handling they share.

pub mod changed;
pub mod formulas;
pub mod init;
pub mod load;
pub mod recalc;
pub mod requeue;
pub mod scores;
pub mod set;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use gradecalc_core::config::{load_config_from, EngineConfig};
use gradecalc_core::engine::RecalcDriver;
use gradecalc_core::model::{Ledger, PersonId};
use gradecalc_core::registry::FormulaRegistry;
use gradecalc_core::store::{MemoryStore, Store};

/// Read a state snapshot.
pub fn open_state(path: &Path) -> Result<MemoryStore> {
    anyhow::ensure!(
        path.exists(),
        "state file not found: {} (create one with `gradecalc load`)",
        path.display()
    );
    MemoryStore::load_json(path)
}

pub fn save_state(store: &MemoryStore, path: &Path) -> Result<()> {
    store.save_json(path)
}

pub fn driver(config_path: Option<&Path>) -> Result<RecalcDriver> {
    let config = load_config_from(config_path)?;
    Ok(RecalcDriver::new(FormulaRegistry::with_defaults(), config))
}

pub fn config(config_path: Option<&Path>) -> Result<EngineConfig> {
    load_config_from(config_path)
}

pub fn find_ledger(store: &MemoryStore, slug: &str) -> Result<Ledger> {
    store.ledger_by_slug(slug).with_context(|| {
        let known: Vec<&str> = store.ledgers().map(|l| l.slug.as_str()).collect();
        format!("ledger '{slug}' not found. Available: {known:?}")
    })
}

/// Find a ledger member by id, student number or exact name.
pub fn find_member(store: &MemoryStore, ledger: &Ledger, needle: &str) -> Result<PersonId> {
    let people: Vec<_> = ledger
        .members
        .iter()
        .filter_map(|id| store.person(*id))
        .collect();

    if let Ok(raw) = needle.parse::<u64>() {
        if let Some(p) = people.iter().find(|p| p.id == PersonId(raw)) {
            return Ok(p.id);
        }
    }
    people
        .iter()
        .find(|p| p.student_number.as_deref() == Some(needle))
        .or_else(|| people.iter().find(|p| p.name == needle))
        .map(|p| p.id)
        .with_context(|| format!("no member of {} matches '{needle}'", ledger.slug))
}
