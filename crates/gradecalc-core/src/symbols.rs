//! Per-calculation value resolution.
//!
//! A [`SymbolTable`] is built once for one score from its stored dependency
//! edges, keyed by the formula's declared [`DependencyKey`]s. Task keys hold
//! a single `(value, full marks, task full marks)` triple, category keys a
//! list of them.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::model::{DependencyKey, DependencyKind, Score, Task};
use crate::store::Store;
use crate::value::{Coerce, Value};

/// Stored values of one dependency score.
#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub value: Value,
    pub full_marks: Value,
    pub task_full_marks: Value,
}

impl Triple {
    fn from_pair(score: &Score, task: &Task) -> Self {
        Self {
            value: score.value.clone(),
            full_marks: score.full_marks.clone(),
            task_full_marks: task.full_marks.clone(),
        }
    }

    /// The score's own full marks, else the task's.
    pub fn effective_full_marks(&self) -> &Value {
        if self.full_marks.is_empty() {
            &self.task_full_marks
        } else {
            &self.full_marks
        }
    }
}

/// A coerced `(value, full marks)` pair.
pub type Pair = (Option<f64>, Option<f64>);

#[derive(Debug, Clone)]
enum Entry {
    /// `None` when no dependency score matched the task slug.
    Task(Option<Triple>),
    Category(Vec<Triple>),
}

/// Resolved symbol: one item for a task key, a list for a category key.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol<T> {
    Single(T),
    Aggregate(Vec<T>),
}

impl<T> Symbol<T> {
    /// Collapse into a list; a single entry becomes a one-element list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Symbol::Single(item) => vec![item],
            Symbol::Aggregate(items) => items,
        }
    }

    fn map<U>(self, mut f: impl FnMut(T) -> U) -> Symbol<U> {
        match self {
            Symbol::Single(item) => Symbol::Single(f(item)),
            Symbol::Aggregate(items) => Symbol::Aggregate(items.into_iter().map(f).collect()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: BTreeMap<DependencyKey, Entry>,
}

impl SymbolTable {
    /// Build a table from `(dependency score, its task)` pairs.
    ///
    /// A task key takes the first pair whose task slug matches; a category
    /// key takes every pair whose task belongs to the category.
    pub fn build(keys: &[DependencyKey], deps: &[(Score, Task)]) -> Self {
        let mut entries = BTreeMap::new();
        for key in keys {
            let entry = match key.kind {
                DependencyKind::Task => Entry::Task(
                    deps.iter()
                        .find(|(_, task)| task.slug == key.slug)
                        .map(|(score, task)| Triple::from_pair(score, task)),
                ),
                DependencyKind::Category => Entry::Category(
                    deps.iter()
                        .filter(|(_, task)| task.category == key.slug)
                        .map(|(score, task)| Triple::from_pair(score, task))
                        .collect(),
                ),
            };
            entries.insert(key.clone(), entry);
        }
        Self { entries }
    }

    /// Build the table for `score` from its stored, active dependency edges.
    pub fn for_score<S: Store + ?Sized>(store: &S, score: &Score, keys: &[DependencyKey]) -> Self {
        let deps: Vec<(Score, Task)> = score
            .dependencies
            .iter()
            .filter_map(|id| store.score(*id))
            .filter(|dep| dep.active)
            .filter_map(|dep| store.task(dep.task).map(|task| (dep, task)))
            .filter(|(_, task)| task.active)
            .collect();
        Self::build(keys, &deps)
    }

    fn entry(&self, key: &DependencyKey) -> Result<&Entry> {
        self.entries
            .get(key)
            .ok_or_else(|| EngineError::UnknownSymbol(key.to_string()))
    }

    /// Raw stored triple for a task key; `None` when not found.
    pub fn raw_task(&self, slug: &str) -> Result<Option<&Triple>> {
        match self.entry(&DependencyKey::task(slug))? {
            Entry::Task(triple) => Ok(triple.as_ref()),
            Entry::Category(_) => Err(EngineError::UnknownSymbol(slug.to_string())),
        }
    }

    /// Coerced `(value, full marks)` pairs for `key`.
    ///
    /// With `normalize`, each value becomes `value / full marks` (`None` on
    /// a zero or unusable divisor) and each full marks becomes `1.0`.
    pub fn get_value_full(
        &self,
        key: &DependencyKey,
        coerce: Coerce,
        normalize: bool,
    ) -> Result<Symbol<Pair>> {
        let resolve = |triple: Option<&Triple>| -> Pair {
            let (value, full) = match triple {
                Some(t) => (coerce.apply(&t.value), coerce.apply(t.effective_full_marks())),
                None => {
                    let missing = Value::Empty;
                    (coerce.apply(&missing), coerce.apply(&missing))
                }
            };
            if normalize {
                (normalized(value, full), Some(1.0))
            } else {
                (value, full)
            }
        };
        Ok(match self.entry(key)? {
            Entry::Task(triple) => Symbol::Single(resolve(triple.as_ref())),
            Entry::Category(triples) => {
                Symbol::Aggregate(triples.iter().map(|t| resolve(Some(t))).collect())
            }
        })
    }

    /// Coerced values for `key`, without their full marks.
    pub fn get_value(
        &self,
        key: &DependencyKey,
        coerce: Coerce,
        normalize: bool,
    ) -> Result<Symbol<Option<f64>>> {
        Ok(self.get_value_full(key, coerce, normalize)?.map(|(v, _)| v))
    }

    /// Shorthand for a single task value.
    pub fn task_value(&self, slug: &str, coerce: Coerce) -> Result<Option<f64>> {
        let symbol = self.get_value(&DependencyKey::task(slug), coerce, false)?;
        Ok(symbol.into_vec().into_iter().next().flatten())
    }

    /// Shorthand for category `(value, full marks)` pairs.
    pub fn category_full(&self, slug: &str, coerce: Coerce, normalize: bool) -> Result<Vec<Pair>> {
        Ok(self
            .get_value_full(&DependencyKey::category(slug), coerce, normalize)?
            .into_vec())
    }
}

fn normalized(value: Option<f64>, full: Option<f64>) -> Option<f64> {
    match (value, full) {
        (Some(v), Some(f)) if f != 0.0 => Some(v / f),
        _ => None,
    }
}
