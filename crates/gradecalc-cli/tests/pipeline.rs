//! End-to-end tests over the sample ledger: parse, load, recalculate,
//! edit and snapshot, driven through the library the CLI is built on.

use std::path::Path;

use gradecalc_core::config::EngineConfig;
use gradecalc_core::engine::{NoopReporter, RecalcDriver};
use gradecalc_core::model::{LedgerId, ScoreId};
use gradecalc_core::parser::{load_ledger, parse_ledger};
use gradecalc_core::registry::FormulaRegistry;
use gradecalc_core::staleness;
use gradecalc_core::store::{MemoryStore, NewTask, Store};
use gradecalc_core::value::Value;

fn settled() -> (MemoryStore, RecalcDriver, LedgerId) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../ledgers/chem-101.toml");
    let def = parse_ledger(&path).unwrap();
    let driver = RecalcDriver::new(FormulaRegistry::with_defaults(), EngineConfig::default());
    let mut store = MemoryStore::new();
    let summary = load_ledger(&mut store, driver.registry(), &def, true).unwrap();

    let report = driver.run_pass(&mut store, &NoopReporter);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    (store, driver, summary.ledger)
}

fn score_id(store: &MemoryStore, ledger: LedgerId, task: &str, person: &str) -> ScoreId {
    let task = store.task_by_slug(ledger, task).unwrap();
    store
        .scores_of_task(task.id)
        .into_iter()
        .find(|id| {
            let score = store.score(*id).unwrap();
            store.person(score.person).unwrap().name.starts_with(person)
        })
        .unwrap()
}

fn value(store: &MemoryStore, ledger: LedgerId, task: &str, person: &str) -> Value {
    store
        .score(score_id(store, ledger, task, person))
        .unwrap()
        .value
}

#[test]
fn sample_ledger_calculates_every_formula_type_used() {
    let (store, _, ledger) = settled();

    assert_eq!(value(&store, ledger, "labs", "Ada"), Value::Number(85.0));
    assert_eq!(value(&store, ledger, "quizzes", "Ada"), Value::Number(82.5));
    assert_eq!(value(&store, ledger, "course", "Ada"), Value::Number(82.25));
    assert_eq!(value(&store, ledger, "letter", "Ada"), Value::Text("A".into()));
    assert_eq!(value(&store, ledger, "clicker", "Ada"), Value::Number(4.0));

    assert_eq!(value(&store, ledger, "labs", "Bo"), Value::Number(55.0));
    // two responses from the same device
    assert_eq!(value(&store, ledger, "clicker", "Bo"), Value::Empty);
    assert_eq!(value(&store, ledger, "clicker", "Cy"), Value::Empty);
}

#[test]
fn second_pass_is_idle() {
    let (mut store, driver, _) = settled();
    let writes = store.write_count();

    let report = driver.run_pass(&mut store, &NoopReporter);
    assert!(report.is_idle());
    assert_eq!(store.write_count(), writes);
}

#[test]
fn edit_reaches_the_letter_grade() {
    let (mut store, driver, ledger) = settled();
    let midterm = score_id(&store, ledger, "midterm", "Bo");
    staleness::set_score_value(&mut store, midterm, Value::Number(50.0)).unwrap();

    // 16.5 + 24 + 40
    driver.run_pass(&mut store, &NoopReporter);
    assert_eq!(value(&store, ledger, "course", "Bo"), Value::Number(80.5));
    assert_eq!(value(&store, ledger, "letter", "Bo"), Value::Text("A".into()));
    assert!(store.changed_scores().is_empty());
}

#[test]
fn requeue_recomputes_the_same_values() {
    let (mut store, driver, ledger) = settled();
    let before: Vec<Value> = store.all_scores().map(|s| s.value.clone()).collect();

    let flagged =
        staleness::requeue_ledger(&mut store, driver.registry(), ledger, true, true).unwrap();
    assert_eq!(flagged, 14);
    let report = driver.run_pass(&mut store, &NoopReporter);
    assert!(report.failures.is_empty());

    let after: Vec<Value> = store.all_scores().map(|s| s.value.clone()).collect();
    assert_eq!(before, after);
}

#[test]
fn new_category_member_updates_aggregates() {
    let (mut store, driver, ledger) = settled();
    staleness::add_task(
        &mut store,
        driver.registry(),
        NewTask {
            ledger,
            slug: "lab3".into(),
            name: "Lab 3".into(),
            category: "lab".into(),
            full_marks: Value::Number(10.0),
            formula: None,
        },
        true,
    )
    .unwrap();
    staleness::pad_scores(&mut store, driver.registry(), ledger, true).unwrap();

    let report = driver.run_pass(&mut store, &NoopReporter);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    // 17 out of 30
    assert_eq!(value(&store, ledger, "labs", "Ada"), Value::Number(56.67));
}

#[test]
fn snapshot_roundtrip_keeps_the_ledger_settled() {
    let (store, driver, ledger) = settled();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    store.save_json(&path).unwrap();

    let mut restored = MemoryStore::load_json(&path).unwrap();
    let report = driver.run_pass(&mut restored, &NoopReporter);
    assert!(report.is_idle());
    assert_eq!(value(&restored, ledger, "course", "Ada"), Value::Number(82.25));

    let lab2 = score_id(&restored, ledger, "lab2", "Ada");
    staleness::set_score_value(&mut restored, lab2, Value::Number(10.0)).unwrap();
    driver.run_pass(&mut restored, &NoopReporter);
    assert_eq!(value(&restored, ledger, "labs", "Ada"), Value::Number(90.0));
}
