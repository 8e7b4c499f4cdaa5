//! Topological cascade.
//!
//! When a score changes, everything reachable from it over reverse edges
//! must be recalculated, each entity strictly after all of its inputs.
//! Ordering is an iterative depth-first search with three-colour marking;
//! meeting an in-progress node means the edges contain a cycle, which
//! aborts the cascade with [`EngineError::CycleDetected`].

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::formula::Outcome;
use crate::model::ScoreId;
use crate::registry::FormulaRegistry;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Every score reachable from `root` over reverse edges, `root` included.
pub fn collect_nodes<F>(root: ScoreId, mut reverse_deps: F) -> BTreeSet<ScoreId>
where
    F: FnMut(ScoreId) -> Vec<ScoreId>,
{
    let mut nodes = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        for next in reverse_deps(current) {
            if nodes.insert(next) {
                queue.push_back(next);
            }
        }
    }
    nodes
}

/// Order `nodes` so that every node precedes all of its reverse
/// dependents, starting from `root`.
///
/// Fails with [`EngineError::CycleDetected`] on a cycle, with
/// [`EngineError::IncompleteOrder`] if the walk leaves `nodes` or misses
/// some of them, and with [`EngineError::CascadeRootMismatch`] if `root`
/// does not come first.
pub fn topological_order<F>(
    root: ScoreId,
    nodes: &BTreeSet<ScoreId>,
    mut reverse_deps: F,
) -> Result<Vec<ScoreId>>
where
    F: FnMut(ScoreId) -> Vec<ScoreId>,
{
    let mut marks: HashMap<ScoreId, Mark> = HashMap::with_capacity(nodes.len());
    let mut finished: Vec<ScoreId> = Vec::with_capacity(nodes.len());
    let incomplete = |ordered: usize| EngineError::IncompleteOrder {
        collected: nodes.len(),
        ordered,
    };

    let starts = std::iter::once(root).chain(nodes.iter().copied().filter(|n| *n != root));
    for start in starts {
        if marks.contains_key(&start) {
            continue;
        }
        // (node, its reverse deps, next index to visit)
        let mut stack: Vec<(ScoreId, Vec<ScoreId>, usize)> = Vec::new();
        marks.insert(start, Mark::InProgress);
        stack.push((start, reverse_deps(start), 0));

        while let Some((node, children, index)) = stack.last_mut() {
            let Some(&child) = children.get(*index) else {
                let node = *node;
                marks.insert(node, Mark::Done);
                finished.push(node);
                stack.pop();
                continue;
            };
            *index += 1;

            if !nodes.contains(&child) {
                return Err(incomplete(finished.len()));
            }
            match marks.get(&child) {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let from = stack
                        .iter()
                        .position(|(n, _, _)| *n == child)
                        .unwrap_or(0);
                    let mut path: Vec<ScoreId> = stack[from..].iter().map(|(n, _, _)| *n).collect();
                    path.push(child);
                    return Err(EngineError::CycleDetected { path });
                }
                None => {
                    marks.insert(child, Mark::InProgress);
                    let grandchildren = reverse_deps(child);
                    stack.push((child, grandchildren, 0));
                }
            }
        }
    }

    if finished.len() != nodes.len() {
        return Err(incomplete(finished.len()));
    }
    finished.reverse();
    match finished.first() {
        Some(first) if *first == root => Ok(finished),
        Some(first) => Err(EngineError::CascadeRootMismatch {
            expected: root,
            found: *first,
        }),
        None => Err(incomplete(0)),
    }
}

/// The full cascade order for a change of `root`, `root` first.
pub fn cascade_order<S: Store + ?Sized>(store: &S, root: ScoreId) -> Result<Vec<ScoreId>> {
    let nodes = collect_nodes(root, |id| store.score_reverse_dependencies(id));
    topological_order(root, &nodes, |id| store.score_reverse_dependencies(id))
}

/// What one call to [`calculate_score`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalcSummary {
    /// The score's value changed, or it has no formula and was committed as
    /// edited.
    pub updated: bool,
    /// Downstream scores recalculated by the cascade.
    pub cascaded: usize,
}

/// Recalculate one score, commit it, and with `cascade` recalculate
/// everything downstream in dependency order.
///
/// With `cascade`, a changed score is committed only once its downstream
/// order is known; a cycle leaves it untouched.
pub fn calculate_score<S: Store>(
    store: &mut S,
    registry: &FormulaRegistry,
    id: ScoreId,
    precision: u32,
    cascade: bool,
) -> Result<CalcSummary> {
    let score = store
        .score(id)
        .ok_or_else(|| EngineError::not_found("score", id))?;

    let mut value = score.value.clone();
    let mut updated = false;
    if store.effective_formula(&score).is_none() {
        updated = true;
    } else if let Outcome::Value(computed) = registry.calculate(store, &score, precision)? {
        if computed != score.value {
            value = computed;
            updated = true;
        }
    }

    // A failed ordering leaves the score uncommitted, so it stays dirty and
    // the next pass reports the same failure.
    let order = if updated && cascade {
        Some(cascade_order(&*store, id)?)
    } else {
        None
    };
    store.set_score_values(id, value.clone(), value)?;

    let mut summary = CalcSummary {
        updated,
        cascaded: 0,
    };
    let Some(order) = order else {
        return Ok(summary);
    };

    debug!(score = %id, downstream = order.len() - 1, "cascading");
    for next in order.into_iter().skip(1) {
        calculate_score(store, registry, next, precision, false)?;
        summary.cascaded += 1;
    }
    Ok(summary)
}
