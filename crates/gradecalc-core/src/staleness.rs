//! Staleness tracking.
//!
//! Two flags drive the recalculation pass: a score is *dirty* when its
//! value differs from its committed `old_value`, and an entity is *stale*
//! when `dependencies_resolved` is false. Every mutation that can change a
//! calculated result goes through this module so both flags stay correct.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::model::{
    Category, DependencyKey, Formula, FormulaId, FormulaKind, LedgerId, PersonId, ScoreId, TaskId,
};
use crate::registry::FormulaRegistry;
use crate::store::{NewFormula, NewTask, Store};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Return the stored formula for `(kind, args)`, creating it if needed.
///
/// Invalid arguments are rejected before anything is stored. Arguments
/// with the same canonical encoding map to the same record.
pub fn get_or_create_formula<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    kind: FormulaKind,
    args: serde_json::Value,
) -> Result<FormulaId> {
    let args = if args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        args
    };
    if !registry.is_valid(kind, &args) {
        registry.get(kind)?;
        return Err(EngineError::InvalidArguments {
            kind,
            reason: format!(
                "arguments {} do not fit this formula type",
                Formula::canonical_args(&args)
            ),
        });
    }
    let digest = Formula::digest_of(&args);
    if let Some(existing) = store.formula_by_digest(kind, &digest) {
        return Ok(existing.id);
    }
    debug!(%kind, %digest, "creating formula");
    store.create_formula(NewFormula {
        kind,
        args,
        digest,
        short_description: String::new(),
        applies_to: String::new(),
    })
}

fn references_category<S: Store + ?Sized>(
    store: &S,
    registry: &FormulaRegistry,
    formula: Option<FormulaId>,
    category: &str,
) -> bool {
    let Some(formula) = formula.and_then(|id| store.formula(id)) else {
        return false;
    };
    registry
        .dependencies(&formula)
        .map(|keys| keys.contains(&DependencyKey::category(category)))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Dirty propagation
// ---------------------------------------------------------------------------

/// Force every transitive reverse dependency of `score` to recalculate.
///
/// Walks breadth-first with a visited set, so long chains and cycles are
/// both safe. Returns the number of scores marked.
pub fn dirty_reverse_deps<S: Store>(store: &mut S, score: ScoreId) -> Result<usize> {
    let mut visited: HashSet<ScoreId> = HashSet::from([score]);
    let mut queue: VecDeque<ScoreId> = VecDeque::from([score]);
    let mut marked = Vec::new();

    while let Some(current) = queue.pop_front() {
        for next in store.score_reverse_dependencies(current) {
            if visited.insert(next) {
                marked.push(next);
                queue.push_back(next);
            }
        }
    }
    if marked.is_empty() {
        return Ok(0);
    }
    debug!(score = %score, downstream = marked.len(), "marking reverse dependencies dirty");
    store.set_old_values(&marked, Value::FORCED_RECALC)
}

/// Flag scores for recalculation by forcing their committed value.
///
/// With `skip_matched_responses`, device-matched response scores that
/// already hold a value are left alone: once matched they are never
/// re-matched automatically.
pub fn update_for_recalc<S: Store>(
    store: &mut S,
    scores: &[ScoreId],
    skip_matched_responses: bool,
) -> Result<usize> {
    let ids: Vec<ScoreId> = scores
        .iter()
        .copied()
        .filter(|id| {
            if !skip_matched_responses {
                return true;
            }
            let Some(score) = store.score(*id) else {
                return false;
            };
            let is_device_match = store
                .effective_formula(&score)
                .and_then(|f| store.formula(f))
                .is_some_and(|f| f.kind == FormulaKind::Clicker);
            !(is_device_match && !score.value.is_empty())
        })
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }
    store.set_old_values(&ids, Value::FORCED_RECALC)
}

/// Flag scores for dependency rebuilding.
pub fn update_for_redep<S: Store>(store: &mut S, scores: &[ScoreId]) -> Result<()> {
    for id in scores {
        store.set_score_resolved(*id, false)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entity edits
// ---------------------------------------------------------------------------

/// Change a task's formula. The task and all its scores become stale and
/// the scores are forced to recalculate.
pub fn set_task_formula<S: Store>(
    store: &mut S,
    task: TaskId,
    formula: Option<FormulaId>,
    skip_matched_responses: bool,
) -> Result<()> {
    store.set_task_formula(task, formula)?;
    store.set_task_resolved(task, false)?;
    let scores = store.scores_of_task(task);
    update_for_redep(store, &scores)?;
    update_for_recalc(store, &scores, skip_matched_responses)?;
    mark_downstream(store, &scores)
}

/// Change a task's full marks, forcing its scores and everything that
/// reads them to recalculate.
pub fn set_task_full_marks<S: Store>(
    store: &mut S,
    task: TaskId,
    full_marks: Value,
    skip_matched_responses: bool,
) -> Result<()> {
    store.set_task_full_marks(task, full_marks)?;
    let scores = store.scores_of_task(task);
    update_for_recalc(store, &scores, skip_matched_responses)?;
    mark_downstream(store, &scores)
}

/// Pre-mark the readers of every dirty score in `scores`.
fn mark_downstream<S: Store>(store: &mut S, scores: &[ScoreId]) -> Result<()> {
    for id in scores {
        after_score_save(store, *id)?;
    }
    Ok(())
}

fn after_score_save<S: Store>(store: &mut S, id: ScoreId) -> Result<()> {
    let score = store
        .score(id)
        .ok_or_else(|| EngineError::not_found("score", id))?;
    if score.is_dirty() {
        dirty_reverse_deps(store, id)?;
    }
    Ok(())
}

/// Override a score's formula. The score becomes stale and dirty, and so
/// does everything downstream of it.
pub fn set_score_formula<S: Store>(
    store: &mut S,
    score: ScoreId,
    formula: Option<FormulaId>,
) -> Result<()> {
    store.set_score_formula(score, formula)?;
    store.set_score_resolved(score, false)?;
    store.set_old_values(&[score], Value::FORCED_RECALC)?;
    after_score_save(store, score)
}

/// Override a score's full marks, forcing recalculation.
pub fn set_score_full_marks<S: Store>(
    store: &mut S,
    score: ScoreId,
    full_marks: Value,
) -> Result<()> {
    store.set_score_full_marks(score, full_marks)?;
    store.set_old_values(&[score], Value::FORCED_RECALC)?;
    after_score_save(store, score)
}

/// An external edit of a score's value.
pub fn set_score_value<S: Store>(store: &mut S, score: ScoreId, value: Value) -> Result<()> {
    store.set_score_value(score, value)?;
    after_score_save(store, score)
}

// ---------------------------------------------------------------------------
// Category membership
// ---------------------------------------------------------------------------

/// React to `category` gaining or losing members in `ledger`.
///
/// Every score (of `person`, if given) and every task whose effective
/// formula aggregates the category becomes stale; the scores are also
/// forced to recalculate. Returns the number of scores flagged.
pub fn category_membership_changed<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    ledger: LedgerId,
    person: Option<PersonId>,
    category: &str,
    skip_matched_responses: bool,
) -> Result<usize> {
    let tasks: Vec<TaskId> = store
        .tasks_of_ledger(ledger)
        .into_iter()
        .filter(|id| {
            store
                .task(*id)
                .is_some_and(|t| references_category(&*store, registry, t.formula, category))
        })
        .collect();
    for task in &tasks {
        store.set_task_resolved(*task, false)?;
    }

    let scores: Vec<ScoreId> = store
        .scores_of_ledger(ledger)
        .into_iter()
        .filter_map(|id| store.score(id))
        .filter(|s| person.map_or(true, |p| s.person == p))
        .filter(|s| {
            references_category(&*store, registry, store.effective_formula(s), category)
        })
        .map(|s| s.id)
        .collect();
    if scores.is_empty() {
        return Ok(0);
    }
    debug!(%category, scores = scores.len(), "category membership changed");
    update_for_redep(store, &scores)?;
    update_for_recalc(store, &scores, skip_matched_responses)
}

/// Create a category unless one with the slug already exists.
pub fn ensure_category<S: Store>(store: &mut S, slug: &str, name: &str) -> Result<()> {
    if store.category(slug).is_some() {
        return Ok(());
    }
    store.create_category(Category {
        slug: slug.to_string(),
        name: name.to_string(),
        active: true,
    })
}

/// Create a task and tell aggregates over its category.
pub fn add_task<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    task: NewTask,
    skip_matched_responses: bool,
) -> Result<TaskId> {
    let ledger = task.ledger;
    let category = task.category.clone();
    let id = store.create_task(task)?;
    category_membership_changed(store, registry, ledger, None, &category, skip_matched_responses)?;
    Ok(id)
}

/// Deactivate a task.
///
/// Scores that read it, by name or through its category, get their edges
/// rebuilt and are forced to recalculate.
pub fn remove_task<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    id: TaskId,
    skip_matched_responses: bool,
) -> Result<()> {
    let task = store
        .task(id)
        .ok_or_else(|| EngineError::not_found("task", id))?;
    // Readers are collected while the removed task's scores are still live.
    let mut readers: BTreeSet<ScoreId> = BTreeSet::new();
    for score in store.scores_of_task(id) {
        readers.extend(store.score_reverse_dependencies(score));
    }
    for dependent in &task.reverse_dependencies {
        store.set_task_resolved(*dependent, false)?;
        readers.extend(store.scores_of_task(*dependent));
    }
    store.set_task_active(id, false)?;

    let readers: Vec<ScoreId> = readers.into_iter().collect();
    if !readers.is_empty() {
        debug!(task = %id, readers = readers.len(), "task removed");
        update_for_redep(store, &readers)?;
        update_for_recalc(store, &readers, skip_matched_responses)?;
        mark_downstream(store, &readers)?;
    }
    category_membership_changed(
        store,
        registry,
        task.ledger,
        None,
        &task.category,
        skip_matched_responses,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulk maintenance
// ---------------------------------------------------------------------------

/// Create an empty score for every (active task, ledger member) pair that
/// lacks one. Returns the number of scores created.
pub fn pad_scores<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    ledger: LedgerId,
    skip_matched_responses: bool,
) -> Result<usize> {
    let members = store
        .ledger(ledger)
        .ok_or_else(|| EngineError::not_found("ledger", ledger))?
        .members;
    let mut created = 0;
    let mut touched: BTreeSet<(PersonId, String)> = BTreeSet::new();

    for task_id in store.tasks_of_ledger(ledger) {
        let Some(task) = store.task(task_id) else {
            continue;
        };
        for person in &members {
            if !store.person(*person).is_some_and(|p| p.active) {
                continue;
            }
            if store.score_for(task_id, *person).is_some() {
                continue;
            }
            let id = store.create_score(task_id, *person)?;
            if task.formula.is_some() {
                store.set_old_values(&[id], Value::FORCED_RECALC)?;
            }
            touched.insert((*person, task.category.clone()));
            created += 1;
        }
    }

    for (person, category) in touched {
        category_membership_changed(
            store,
            registry,
            ledger,
            Some(person),
            &category,
            skip_matched_responses,
        )?;
    }
    if created > 0 {
        debug!(ledger = %ledger, created, "padded scores");
    }
    Ok(created)
}

/// Force recalculation of every formula score in a ledger, optionally
/// rebuilding their edges first. Returns the number of scores flagged.
pub fn requeue_ledger<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    ledger: LedgerId,
    redo_dependencies: bool,
    skip_matched_responses: bool,
) -> Result<usize> {
    let scores: Vec<ScoreId> = store
        .scores_of_ledger(ledger)
        .into_iter()
        .filter(|id| {
            store
                .score(*id)
                .is_some_and(|s| store.effective_formula(&s).is_some())
        })
        .collect();
    if redo_dependencies {
        for id in &scores {
            if let Err(e) = crate::depgraph::resolve_score(store, registry, *id) {
                warn!(score = %id, "dependency resolution failed during requeue: {e}");
            }
        }
    }
    update_for_recalc(store, &scores, skip_matched_responses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{NoopReporter, RecalcDriver};
    use crate::model::Person;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store_with_chain(len: usize) -> (MemoryStore, Vec<ScoreId>) {
        let mut store = MemoryStore::new();
        let ledger = store.create_ledger("l", "L").unwrap();
        let person = store
            .create_person(Person {
                id: PersonId(0),
                name: "P".into(),
                student_number: None,
                device_ids: vec![],
                active: true,
            })
            .unwrap();
        store.add_ledger_member(ledger, person).unwrap();
        ensure_category(&mut store, "c", "C").unwrap();
        let mut ids = Vec::new();
        for i in 0..len {
            let task = store
                .create_task(NewTask {
                    ledger,
                    slug: format!("t{i}"),
                    name: format!("T{i}"),
                    category: "c".into(),
                    full_marks: Value::Number(10.0),
                    formula: None,
                })
                .unwrap();
            let score = store.create_score(task, person).unwrap();
            if let Some(prev) = ids.last() {
                store.set_score_dependencies(score, vec![*prev]).unwrap();
            }
            ids.push(score);
        }
        (store, ids)
    }

    /// Tasks `a` = 3/10 and `b` = 4/10 read by a settled `total` task.
    fn store_with_total(
        kind: FormulaKind,
        args: serde_json::Value,
    ) -> (MemoryStore, RecalcDriver, ScoreId) {
        let (mut store, _) = store_with_chain(0);
        let driver = RecalcDriver::new(FormulaRegistry::with_defaults(), EngineConfig::default());
        let ledger = store.ledger_by_slug("l").unwrap().id;
        let person = store.ledger(ledger).unwrap().members[0];
        for (slug, value) in [("a", 3.0), ("b", 4.0)] {
            let task = store
                .create_task(NewTask {
                    ledger,
                    slug: slug.into(),
                    name: slug.into(),
                    category: "c".into(),
                    full_marks: Value::Number(10.0),
                    formula: None,
                })
                .unwrap();
            let score = store.create_score(task, person).unwrap();
            store
                .set_score_values(score, Value::Number(value), Value::Number(value))
                .unwrap();
        }
        let formula = get_or_create_formula(&mut store, driver.registry(), kind, args).unwrap();
        ensure_category(&mut store, "totals", "Totals").unwrap();
        let total = store
            .create_task(NewTask {
                ledger,
                slug: "total".into(),
                name: "Total".into(),
                category: "totals".into(),
                full_marks: Value::Empty,
                formula: Some(formula),
            })
            .unwrap();
        pad_scores(&mut store, driver.registry(), ledger, true).unwrap();
        driver.run_pass(&mut store, &NoopReporter);
        let total_score = store.score_for(total, person).unwrap().id;
        (store, driver, total_score)
    }

    fn task_id(store: &MemoryStore, slug: &str) -> TaskId {
        let ledger = store.ledger_by_slug("l").unwrap().id;
        store.task_by_slug(ledger, slug).unwrap().id
    }

    #[test]
    fn formula_dedup_by_canonical_args() {
        let mut store = MemoryStore::new();
        let registry = FormulaRegistry::with_defaults();
        let a: serde_json::Value =
            serde_json::from_str(r#"{"src_category":"quiz","drop_count":1}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"drop_count":1, "src_category":"quiz"}"#).unwrap();
        let first = get_or_create_formula(&mut store, &registry, FormulaKind::Drop, a).unwrap();
        let second = get_or_create_formula(&mut store, &registry, FormulaKind::Drop, b).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.formulas().len(), 1);

        let other = get_or_create_formula(
            &mut store,
            &registry,
            FormulaKind::Drop,
            json!({"src_category": "quiz", "drop_count": 2}),
        )
        .unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn invalid_formula_is_not_stored() {
        let mut store = MemoryStore::new();
        let registry = FormulaRegistry::with_defaults();
        let err = get_or_create_formula(&mut store, &registry, FormulaKind::Sum, json!({"x": 1}))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArguments { .. }));
        assert!(store.formulas().is_empty());

        let err = get_or_create_formula(
            &mut store,
            &FormulaRegistry::new(),
            FormulaKind::Sum,
            json!({"src_category": "quiz"}),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnregisteredType(_)));
    }

    #[test]
    fn external_edit_marks_whole_downstream_chain() {
        let (mut store, ids) = store_with_chain(2_000);
        for id in &ids {
            store.set_score_values(*id, Value::Number(1.0), Value::Number(1.0)).unwrap();
        }
        set_score_value(&mut store, ids[0], Value::Number(5.0)).unwrap();
        let changed = store.changed_scores();
        assert_eq!(changed.len(), ids.len());
        assert_eq!(store.score(ids[1999]).unwrap().old_value, Value::FORCED_RECALC);
        assert_eq!(store.score(ids[0]).unwrap().old_value, Value::Number(1.0));
    }

    #[test]
    fn dirty_walk_terminates_on_cycles() {
        let (mut store, ids) = store_with_chain(3);
        store.set_score_dependencies(ids[0], vec![ids[2]]).unwrap();
        assert_eq!(dirty_reverse_deps(&mut store, ids[0]).unwrap(), 2);
    }

    #[test]
    fn matched_device_scores_are_not_requeued() {
        let (mut store, ids) = store_with_chain(2);
        let registry = FormulaRegistry::with_defaults();
        let icli = get_or_create_formula(&mut store, &registry, FormulaKind::Clicker, json!({}))
            .unwrap();
        store.set_score_formula(ids[0], Some(icli)).unwrap();
        store.set_score_formula(ids[1], Some(icli)).unwrap();
        store.set_score_values(ids[0], Value::Number(3.0), Value::Number(3.0)).unwrap();

        assert_eq!(update_for_recalc(&mut store, &ids, true).unwrap(), 1);
        assert_eq!(store.changed_scores(), vec![ids[1]]);
        assert_eq!(update_for_recalc(&mut store, &ids, false).unwrap(), 2);
    }

    #[test]
    fn task_formula_change_flags_scores() {
        let (mut store, ids) = store_with_chain(1);
        let registry = FormulaRegistry::with_defaults();
        let task = store.score(ids[0]).unwrap().task;
        store.set_score_resolved(ids[0], true).unwrap();
        let noop = get_or_create_formula(&mut store, &registry, FormulaKind::Noop, json!({}))
            .unwrap();
        set_task_formula(&mut store, task, Some(noop), true).unwrap();

        let score = store.score(ids[0]).unwrap();
        assert!(!score.dependencies_resolved);
        assert!(score.is_dirty());
        assert!(!store.task(task).unwrap().dependencies_resolved);
    }

    #[test]
    fn new_category_member_flags_aggregates() {
        let (mut store, ids) = store_with_chain(1);
        let registry = FormulaRegistry::with_defaults();
        let ledger = store.ledger_by_slug("l").unwrap().id;
        let sum = get_or_create_formula(
            &mut store,
            &registry,
            FormulaKind::Sum,
            json!({"src_category": "c"}),
        )
        .unwrap();
        ensure_category(&mut store, "totals", "Totals").unwrap();
        let total = store
            .create_task(NewTask {
                ledger,
                slug: "total".into(),
                name: "Total".into(),
                category: "totals".into(),
                full_marks: Value::Number(100.0),
                formula: Some(sum),
            })
            .unwrap();
        let person = store.score(ids[0]).unwrap().person;
        let total_score = store.create_score(total, person).unwrap();
        store.set_task_resolved(total, true).unwrap();
        store.set_score_resolved(total_score, true).unwrap();

        add_task(
            &mut store,
            &registry,
            NewTask {
                ledger,
                slug: "t-new".into(),
                name: "New".into(),
                category: "c".into(),
                full_marks: Value::Number(10.0),
                formula: None,
            },
            true,
        )
        .unwrap();

        assert!(!store.task(total).unwrap().dependencies_resolved);
        let score = store.score(total_score).unwrap();
        assert!(!score.dependencies_resolved);
        assert!(score.is_dirty());
    }

    #[test]
    fn removing_a_task_recalculates_its_readers() {
        let (mut store, driver, total) =
            store_with_total(FormulaKind::Add, json!({"src_tasks": ["a", "b"]}));
        assert_eq!(store.score(total).unwrap().value, Value::Number(7.0));

        let b = task_id(&store, "b");
        remove_task(&mut store, driver.registry(), b, true).unwrap();
        let score = store.score(total).unwrap();
        assert!(score.is_dirty());
        assert!(!score.dependencies_resolved);

        driver.run_pass(&mut store, &NoopReporter);
        assert_eq!(store.score(total).unwrap().value, Value::Number(3.0));
        assert!(driver.run_pass(&mut store, &NoopReporter).is_idle());
    }

    #[test]
    fn removing_a_category_member_recalculates_the_aggregate() {
        let (mut store, driver, total) =
            store_with_total(FormulaKind::Sum, json!({"src_category": "c"}));
        assert_eq!(store.score(total).unwrap().value, Value::Number(7.0));

        let a = task_id(&store, "a");
        remove_task(&mut store, driver.registry(), a, true).unwrap();
        driver.run_pass(&mut store, &NoopReporter);
        assert_eq!(store.score(total).unwrap().value, Value::Number(4.0));
    }

    #[test]
    fn full_marks_change_recalculates_weighted_readers() {
        let (mut store, driver, total) =
            store_with_total(FormulaKind::Weight, json!({"weights": [["a", 50], ["b", 50]]}));
        assert_eq!(store.score(total).unwrap().value, Value::Number(35.0));

        let a = task_id(&store, "a");
        set_task_full_marks(&mut store, a, Value::Number(5.0), true).unwrap();
        assert!(store.score(total).unwrap().is_dirty());

        driver.run_pass(&mut store, &NoopReporter);
        assert_eq!(store.score(total).unwrap().value, Value::Number(50.0));
    }

    #[test]
    fn full_marks_change_flags_bin_readers() {
        let (mut store, driver, total) = store_with_total(
            FormulaKind::Bin,
            json!({"src_task": "a", "bins": [[2, "low"], [5, "high"]]}),
        );
        assert!(!store.score(total).unwrap().is_dirty());

        let a = task_id(&store, "a");
        set_task_full_marks(&mut store, a, Value::Number(20.0), true).unwrap();
        assert!(store.score(total).unwrap().is_dirty());
        driver.run_pass(&mut store, &NoopReporter);
        assert!(!store.score(total).unwrap().is_dirty());
    }

    #[test]
    fn pad_creates_missing_scores_once() {
        let (mut store, _) = store_with_chain(3);
        let registry = FormulaRegistry::with_defaults();
        let ledger = store.ledger_by_slug("l").unwrap().id;
        let extra = store
            .create_person(Person {
                id: PersonId(0),
                name: "Q".into(),
                student_number: None,
                device_ids: vec![],
                active: true,
            })
            .unwrap();
        store.add_ledger_member(ledger, extra).unwrap();

        assert_eq!(pad_scores(&mut store, &registry, ledger, true).unwrap(), 3);
        assert_eq!(pad_scores(&mut store, &registry, ledger, true).unwrap(), 0);
    }
}
