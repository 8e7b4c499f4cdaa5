//! Dependency graph builder.
//!
//! Turns a formula's slug references into concrete edges. Tasks resolve
//! against their ledger; scores resolve against their ledger and person.
//! Edge sets are always replaced wholesale.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::{DependencyKind, FormulaId, ScoreId, TaskId};
use crate::registry::FormulaRegistry;
use crate::store::Store;

/// Slug references of a formula, split by kind.
#[derive(Debug, Default, PartialEq)]
struct Scope {
    task_slugs: Vec<String>,
    category_slugs: Vec<String>,
}

impl Scope {
    fn is_empty(&self) -> bool {
        self.task_slugs.is_empty() && self.category_slugs.is_empty()
    }
}

fn scope_of<S: Store + ?Sized>(
    store: &S,
    registry: &FormulaRegistry,
    formula: Option<FormulaId>,
) -> Result<Scope> {
    let Some(id) = formula else {
        return Ok(Scope::default());
    };
    let formula = store
        .formula(id)
        .ok_or_else(|| EngineError::not_found("formula", id))?;
    let mut scope = Scope::default();
    for key in registry.dependencies(&formula)? {
        match key.kind {
            DependencyKind::Task => scope.task_slugs.push(key.slug),
            DependencyKind::Category => scope.category_slugs.push(key.slug),
        }
    }
    Ok(scope)
}

/// Rebuild a task's edges and propagate them to its formula-less scores.
///
/// Returns the number of edges set on the task.
pub fn update_task_dependencies<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    id: TaskId,
) -> Result<usize> {
    let task = store
        .task(id)
        .ok_or_else(|| EngineError::not_found("task", id))?;
    let scope = scope_of(store, registry, task.formula)?;
    if scope.is_empty() {
        store.set_task_dependencies(id, Vec::new())?;
        debug!(task = %task.slug, "no references, edges cleared");
        return Ok(0);
    }

    let deps = store.tasks_in_scope(task.ledger, &scope.task_slugs, &scope.category_slugs);
    let count = deps.len();
    store.set_task_dependencies(id, deps)?;
    debug!(task = %task.slug, edges = count, "task dependencies updated");

    for score_id in store.scores_of_task(id) {
        let Some(score) = store.score(score_id) else {
            continue;
        };
        if score.formula.is_none() {
            update_score_from_task(store, score_id)?;
        }
    }
    Ok(count)
}

/// Map a task's edges onto one of its scores: the same person's scores of
/// whatever the task depends on.
pub fn update_score_from_task<S: Store>(store: &mut S, id: ScoreId) -> Result<()> {
    let score = store
        .score(id)
        .ok_or_else(|| EngineError::not_found("score", id))?;
    if score.formula.is_some() {
        return Ok(());
    }
    let task = store
        .task(score.task)
        .ok_or_else(|| EngineError::not_found("task", score.task))?;
    let deps = store.scores_of_person(score.person, &task.dependencies);
    store.set_score_dependencies(id, deps)
}

/// Rebuild a score's edges from its effective formula.
///
/// Returns the number of edges set.
pub fn update_score_dependencies<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    id: ScoreId,
) -> Result<usize> {
    let score = store
        .score(id)
        .ok_or_else(|| EngineError::not_found("score", id))?;
    let scope = scope_of(store, registry, store.effective_formula(&score))?;
    if scope.is_empty() {
        store.set_score_dependencies(id, Vec::new())?;
        return Ok(0);
    }
    let task = store
        .task(score.task)
        .ok_or_else(|| EngineError::not_found("task", score.task))?;
    let deps = store.scores_in_scope(
        task.ledger,
        score.person,
        &scope.task_slugs,
        &scope.category_slugs,
    );
    let count = deps.len();
    store.set_score_dependencies(id, deps)?;
    debug!(score = %id, edges = count, "score dependencies updated");
    Ok(count)
}

/// Rebuild a task's edges and mark them resolved.
pub fn resolve_task<S: Store>(store: &mut S, registry: &FormulaRegistry, id: TaskId) -> Result<()> {
    update_task_dependencies(store, registry, id)?;
    store.set_task_resolved(id, true)
}

/// Rebuild a score's edges and mark them resolved.
pub fn resolve_score<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    id: ScoreId,
) -> Result<()> {
    update_score_dependencies(store, registry, id)?;
    store.set_score_resolved(id, true)
}
