//! In-memory arena store with JSON snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{NewFormula, NewTask, ResponseStore, Store};
use crate::error::{EngineError, Result};
use crate::model::{
    Category, Formula, FormulaId, FormulaKind, Ledger, LedgerId, Person, PersonId, Response,
    ResponseId, Score, ScoreId, Task, TaskId,
};
use crate::value::Value;

/// Serialized form of a [`MemoryStore`].
///
/// Reverse edges are derived data and are rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub ledgers: Vec<Ledger>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub scores: Vec<Score>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub responses: Vec<Response>,
}

/// Arena of entities indexed by id. Each task and score holds both its
/// forward and reverse edge lists.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledgers: BTreeMap<LedgerId, Ledger>,
    people: BTreeMap<PersonId, Person>,
    categories: BTreeMap<String, Category>,
    tasks: BTreeMap<TaskId, Task>,
    scores: BTreeMap<ScoreId, Score>,
    score_index: HashMap<(TaskId, PersonId), ScoreId>,
    formulas: BTreeMap<FormulaId, Formula>,
    responses: BTreeMap<ResponseId, Response>,
    next_id: u64,
    writes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Number of write operations performed since construction.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Every score, active or not, in id order.
    pub fn all_scores(&self) -> impl Iterator<Item = &Score> {
        self.scores.values()
    }

    /// Every task, active or not, in id order.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &Ledger> {
        self.ledgers.values()
    }

    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values()
    }

    /// Rebuild a store from a snapshot, deriving reverse edges and the id
    /// counter.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut store = MemoryStore::new();
        let mut max_id = 0u64;

        for ledger in snapshot.ledgers {
            max_id = max_id.max(ledger.id.0);
            store.ledgers.insert(ledger.id, ledger);
        }
        for person in snapshot.people {
            max_id = max_id.max(person.id.0);
            store.people.insert(person.id, person);
        }
        for category in snapshot.categories {
            store.categories.insert(category.slug.clone(), category);
        }
        for mut task in snapshot.tasks {
            max_id = max_id.max(task.id.0);
            task.reverse_dependencies.clear();
            store.tasks.insert(task.id, task);
        }
        for mut score in snapshot.scores {
            max_id = max_id.max(score.id.0);
            score.reverse_dependencies.clear();
            store.score_index.insert((score.task, score.person), score.id);
            store.scores.insert(score.id, score);
        }
        for formula in snapshot.formulas {
            max_id = max_id.max(formula.id.0);
            store.formulas.insert(formula.id, formula);
        }
        for response in snapshot.responses {
            max_id = max_id.max(response.id.0);
            store.responses.insert(response.id, response);
        }

        let task_edges: Vec<(TaskId, TaskId)> = store
            .tasks
            .values()
            .flat_map(|t| t.dependencies.iter().map(move |d| (*d, t.id)))
            .collect();
        for (dep, owner) in task_edges {
            if let Some(task) = store.tasks.get_mut(&dep) {
                task.reverse_dependencies.push(owner);
            }
        }
        let score_edges: Vec<(ScoreId, ScoreId)> = store
            .scores
            .values()
            .flat_map(|s| s.dependencies.iter().map(move |d| (*d, s.id)))
            .collect();
        for (dep, owner) in score_edges {
            if let Some(score) = store.scores.get_mut(&dep) {
                score.reverse_dependencies.push(owner);
            }
        }

        store.next_id = max_id + 1;
        store
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            ledgers: self.ledgers.values().cloned().collect(),
            people: self.people.values().cloned().collect(),
            categories: self.categories.values().cloned().collect(),
            tasks: self.tasks.values().cloned().collect(),
            scores: self.scores.values().cloned().collect(),
            formulas: self.formulas.values().cloned().collect(),
            responses: self.responses.values().cloned().collect(),
        }
    }

    /// Save the store as a JSON snapshot.
    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(&self.to_snapshot()).context("failed to serialize store")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
        Ok(())
    }

    /// Load a store from a JSON snapshot.
    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot from {}", path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).context("failed to parse snapshot JSON")?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.writes += 1;
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("task", id))
    }

    fn score_mut(&mut self, id: ScoreId) -> Result<&mut Score> {
        self.writes += 1;
        self.scores
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("score", id))
    }

    fn active_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id).filter(|t| t.active)
    }

    /// Active scores whose task is active, paired with that task.
    fn live_scores(&self) -> impl Iterator<Item = (&Score, &Task)> {
        self.scores
            .values()
            .filter(|s| s.active)
            .filter_map(|s| self.active_task(s.task).map(|t| (s, t)))
    }
}

fn matches_scope(task: &Task, task_slugs: &[String], category_slugs: &[String]) -> bool {
    task_slugs.iter().any(|s| *s == task.slug) || category_slugs.iter().any(|c| *c == task.category)
}

fn sorted_unique<T: Ord + Copy>(ids: Vec<T>) -> Vec<T> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

impl ResponseStore for MemoryStore {
    fn responses_for(&self, task: TaskId, owners: &[String]) -> Vec<Response> {
        self.responses
            .values()
            .filter(|r| r.active && r.task == task && owners.iter().any(|o| *o == r.owner))
            .cloned()
            .collect()
    }

    fn mark_response_scored(&mut self, id: ResponseId) -> Result<()> {
        self.writes += 1;
        let response = self
            .responses
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("response", id))?;
        response.scored = true;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn ledger(&self, id: LedgerId) -> Option<Ledger> {
        self.ledgers.get(&id).cloned()
    }

    fn ledger_by_slug(&self, slug: &str) -> Option<Ledger> {
        self.ledgers.values().find(|l| l.slug == slug).cloned()
    }

    fn person(&self, id: PersonId) -> Option<Person> {
        self.people.get(&id).cloned()
    }

    fn category(&self, slug: &str) -> Option<Category> {
        self.categories.get(slug).cloned()
    }

    fn task(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).cloned()
    }

    fn task_by_slug(&self, ledger: LedgerId, slug: &str) -> Option<Task> {
        self.tasks
            .values()
            .find(|t| t.ledger == ledger && t.slug == slug)
            .cloned()
    }

    fn score(&self, id: ScoreId) -> Option<Score> {
        self.scores.get(&id).cloned()
    }

    fn score_for(&self, task: TaskId, person: PersonId) -> Option<Score> {
        self.score_index
            .get(&(task, person))
            .and_then(|id| self.scores.get(id))
            .cloned()
    }

    fn formula(&self, id: FormulaId) -> Option<Formula> {
        self.formulas.get(&id).cloned()
    }

    fn formula_by_digest(&self, kind: FormulaKind, digest: &str) -> Option<Formula> {
        self.formulas
            .values()
            .find(|f| f.kind == kind && f.digest == digest)
            .cloned()
    }

    fn formulas(&self) -> Vec<Formula> {
        self.formulas.values().filter(|f| f.active).cloned().collect()
    }

    fn tasks_in_scope(
        &self,
        ledger: LedgerId,
        task_slugs: &[String],
        category_slugs: &[String],
    ) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.active && t.ledger == ledger)
            .filter(|t| matches_scope(t, task_slugs, category_slugs))
            .map(|t| t.id)
            .collect()
    }

    fn scores_in_scope(
        &self,
        ledger: LedgerId,
        person: PersonId,
        task_slugs: &[String],
        category_slugs: &[String],
    ) -> Vec<ScoreId> {
        self.live_scores()
            .filter(|(s, t)| s.person == person && t.ledger == ledger)
            .filter(|(_, t)| matches_scope(t, task_slugs, category_slugs))
            .map(|(s, _)| s.id)
            .collect()
    }

    fn scores_of_person(&self, person: PersonId, tasks: &[TaskId]) -> Vec<ScoreId> {
        self.live_scores()
            .filter(|(s, _)| s.person == person && tasks.contains(&s.task))
            .map(|(s, _)| s.id)
            .collect()
    }

    fn tasks_of_ledger(&self, ledger: LedgerId) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.active && t.ledger == ledger)
            .map(|t| t.id)
            .collect()
    }

    fn scores_of_task(&self, task: TaskId) -> Vec<ScoreId> {
        self.scores
            .values()
            .filter(|s| s.active && s.task == task)
            .map(|s| s.id)
            .collect()
    }

    fn scores_of_ledger(&self, ledger: LedgerId) -> Vec<ScoreId> {
        self.live_scores()
            .filter(|(_, t)| t.ledger == ledger)
            .map(|(s, _)| s.id)
            .collect()
    }

    fn score_reverse_dependencies(&self, score: ScoreId) -> Vec<ScoreId> {
        self.scores
            .get(&score)
            .map(|s| {
                s.reverse_dependencies
                    .iter()
                    .copied()
                    .filter(|id| self.scores.get(id).is_some_and(|r| r.active))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn stale_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.active && !t.dependencies_resolved)
            .map(|t| t.id)
            .collect()
    }

    fn stale_scores(&self) -> Vec<ScoreId> {
        self.live_scores()
            .filter(|(s, _)| !s.dependencies_resolved)
            .map(|(s, _)| s.id)
            .collect()
    }

    fn changed_scores(&self) -> Vec<ScoreId> {
        self.live_scores()
            .filter(|(s, _)| s.is_dirty())
            .map(|(s, _)| s.id)
            .collect()
    }

    fn create_ledger(&mut self, slug: &str, name: &str) -> Result<LedgerId> {
        if self.ledgers.values().any(|l| l.slug == slug) {
            return Err(EngineError::Duplicate {
                entity: "ledger",
                key: slug.to_string(),
            });
        }
        let id = LedgerId(self.allocate());
        self.writes += 1;
        self.ledgers.insert(
            id,
            Ledger {
                id,
                slug: slug.to_string(),
                name: name.to_string(),
                members: Vec::new(),
                active: true,
            },
        );
        Ok(id)
    }

    fn create_person(&mut self, mut person: Person) -> Result<PersonId> {
        let id = PersonId(self.allocate());
        person.id = id;
        self.writes += 1;
        self.people.insert(id, person);
        Ok(id)
    }

    fn add_ledger_member(&mut self, ledger: LedgerId, person: PersonId) -> Result<()> {
        if !self.people.contains_key(&person) {
            return Err(EngineError::not_found("person", person));
        }
        let entry = self
            .ledgers
            .get_mut(&ledger)
            .ok_or_else(|| EngineError::not_found("ledger", ledger))?;
        if !entry.members.contains(&person) {
            self.writes += 1;
            entry.members.push(person);
        }
        Ok(())
    }

    fn create_category(&mut self, category: Category) -> Result<()> {
        if self.categories.contains_key(&category.slug) {
            return Err(EngineError::Duplicate {
                entity: "category",
                key: category.slug,
            });
        }
        self.writes += 1;
        self.categories.insert(category.slug.clone(), category);
        Ok(())
    }

    fn create_task(&mut self, task: NewTask) -> Result<TaskId> {
        if !self.ledgers.contains_key(&task.ledger) {
            return Err(EngineError::not_found("ledger", task.ledger));
        }
        if !self.categories.contains_key(&task.category) {
            return Err(EngineError::not_found("category", &task.category));
        }
        if self
            .tasks
            .values()
            .any(|t| t.ledger == task.ledger && t.slug == task.slug)
        {
            return Err(EngineError::Duplicate {
                entity: "task",
                key: task.slug,
            });
        }
        let id = TaskId(self.allocate());
        self.writes += 1;
        self.tasks.insert(
            id,
            Task {
                id,
                ledger: task.ledger,
                slug: task.slug,
                name: task.name,
                category: task.category,
                full_marks: task.full_marks,
                formula: task.formula,
                dependencies: Vec::new(),
                reverse_dependencies: Vec::new(),
                dependencies_resolved: task.formula.is_none(),
                active: true,
            },
        );
        Ok(id)
    }

    fn create_score(&mut self, task: TaskId, person: PersonId) -> Result<ScoreId> {
        if !self.tasks.contains_key(&task) {
            return Err(EngineError::not_found("task", task));
        }
        if !self.people.contains_key(&person) {
            return Err(EngineError::not_found("person", person));
        }
        if self.score_index.contains_key(&(task, person)) {
            return Err(EngineError::Duplicate {
                entity: "score",
                key: format!("task {task} / person {person}"),
            });
        }
        let id = ScoreId(self.allocate());
        self.writes += 1;
        self.score_index.insert((task, person), id);
        self.scores.insert(
            id,
            Score {
                id,
                task,
                person,
                value: Value::Empty,
                old_value: Value::Empty,
                full_marks: Value::Empty,
                formula: None,
                dependencies: Vec::new(),
                reverse_dependencies: Vec::new(),
                dependencies_resolved: false,
                active: true,
            },
        );
        Ok(id)
    }

    fn create_formula(&mut self, formula: NewFormula) -> Result<FormulaId> {
        if let Some(existing) = self.formula_by_digest(formula.kind, &formula.digest) {
            return Err(EngineError::Duplicate {
                entity: "formula",
                key: existing.digest,
            });
        }
        let id = FormulaId(self.allocate());
        self.writes += 1;
        self.formulas.insert(
            id,
            Formula {
                id,
                kind: formula.kind,
                args: formula.args,
                digest: formula.digest,
                short_description: formula.short_description,
                applies_to: formula.applies_to,
                active: true,
            },
        );
        Ok(id)
    }

    fn create_response(
        &mut self,
        task: TaskId,
        owner: &str,
        score: Value,
        description: &str,
    ) -> Result<ResponseId> {
        if !self.tasks.contains_key(&task) {
            return Err(EngineError::not_found("task", task));
        }
        let id = ResponseId(self.allocate());
        self.writes += 1;
        self.responses.insert(
            id,
            Response {
                id,
                task,
                owner: owner.to_string(),
                score,
                description: description.to_string(),
                scored: false,
                active: true,
            },
        );
        Ok(id)
    }

    fn set_task_dependencies(&mut self, id: TaskId, deps: Vec<TaskId>) -> Result<()> {
        let deps = sorted_unique(deps);
        if let Some(missing) = deps.iter().find(|d| !self.tasks.contains_key(d)) {
            return Err(EngineError::not_found("task", missing));
        }
        let previous = std::mem::take(&mut self.task_mut(id)?.dependencies);
        for dep in previous {
            if let Some(task) = self.tasks.get_mut(&dep) {
                task.reverse_dependencies.retain(|r| *r != id);
            }
        }
        for dep in &deps {
            if let Some(task) = self.tasks.get_mut(dep) {
                if !task.reverse_dependencies.contains(&id) {
                    task.reverse_dependencies.push(id);
                }
            }
        }
        self.task_mut(id)?.dependencies = deps;
        Ok(())
    }

    fn set_score_dependencies(&mut self, id: ScoreId, deps: Vec<ScoreId>) -> Result<()> {
        let deps = sorted_unique(deps);
        if let Some(missing) = deps.iter().find(|d| !self.scores.contains_key(d)) {
            return Err(EngineError::not_found("score", missing));
        }
        let previous = std::mem::take(&mut self.score_mut(id)?.dependencies);
        for dep in previous {
            if let Some(score) = self.scores.get_mut(&dep) {
                score.reverse_dependencies.retain(|r| *r != id);
            }
        }
        for dep in &deps {
            if let Some(score) = self.scores.get_mut(dep) {
                if !score.reverse_dependencies.contains(&id) {
                    score.reverse_dependencies.push(id);
                }
            }
        }
        self.score_mut(id)?.dependencies = deps;
        Ok(())
    }

    fn set_task_formula(&mut self, id: TaskId, formula: Option<FormulaId>) -> Result<()> {
        self.task_mut(id)?.formula = formula;
        Ok(())
    }

    fn set_task_full_marks(&mut self, id: TaskId, full_marks: Value) -> Result<()> {
        self.task_mut(id)?.full_marks = full_marks;
        Ok(())
    }

    fn set_task_resolved(&mut self, id: TaskId, resolved: bool) -> Result<()> {
        self.task_mut(id)?.dependencies_resolved = resolved;
        Ok(())
    }

    fn set_task_active(&mut self, id: TaskId, active: bool) -> Result<()> {
        self.task_mut(id)?.active = active;
        Ok(())
    }

    fn set_score_formula(&mut self, id: ScoreId, formula: Option<FormulaId>) -> Result<()> {
        self.score_mut(id)?.formula = formula;
        Ok(())
    }

    fn set_score_full_marks(&mut self, id: ScoreId, full_marks: Value) -> Result<()> {
        self.score_mut(id)?.full_marks = full_marks;
        Ok(())
    }

    fn set_score_resolved(&mut self, id: ScoreId, resolved: bool) -> Result<()> {
        self.score_mut(id)?.dependencies_resolved = resolved;
        Ok(())
    }

    fn set_score_values(&mut self, id: ScoreId, value: Value, old_value: Value) -> Result<()> {
        let score = self.score_mut(id)?;
        score.value = value;
        score.old_value = old_value;
        Ok(())
    }

    fn set_score_value(&mut self, id: ScoreId, value: Value) -> Result<()> {
        self.score_mut(id)?.value = value;
        Ok(())
    }

    fn set_old_values(&mut self, ids: &[ScoreId], old_value: Value) -> Result<usize> {
        let mut touched = 0;
        for id in ids {
            if let Some(score) = self.scores.get_mut(id) {
                score.old_value = old_value.clone();
                touched += 1;
            }
        }
        if touched > 0 {
            self.writes += 1;
        }
        Ok(touched)
    }
}
