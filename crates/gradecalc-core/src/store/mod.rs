//! Persistence contract required by the engine.
//!
//! The engine never owns data: every read and write goes through [`Store`].
//! Each write method is atomic on its own, so an abandoned pass leaves the
//! store consistent entity by entity. [`MemoryStore`] is the in-process
//! arena implementation used by the CLI and the tests.

mod memory;

pub use memory::{MemoryStore, Snapshot};

use crate::error::Result;
use crate::model::{
    Category, Formula, FormulaId, FormulaKind, Ledger, LedgerId, Person, PersonId, Response,
    ResponseId, Score, ScoreId, Task, TaskId,
};
use crate::value::Value;

/// Fields needed to create a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub ledger: LedgerId,
    pub slug: String,
    pub name: String,
    pub category: String,
    pub full_marks: Value,
    pub formula: Option<FormulaId>,
}

/// Fields needed to create a formula record.
#[derive(Debug, Clone)]
pub struct NewFormula {
    pub kind: FormulaKind,
    pub args: serde_json::Value,
    pub digest: String,
    pub short_description: String,
    pub applies_to: String,
}

/// Access to externally ingested responses.
pub trait ResponseStore {
    /// Active responses for `task` whose owner identifier is one of `owners`.
    fn responses_for(&self, task: TaskId, owners: &[String]) -> Vec<Response>;

    /// Mark a response as consumed by a score.
    fn mark_response_scored(&mut self, id: ResponseId) -> Result<()>;
}

/// Everything the engine reads from and writes to persistent storage.
///
/// Queries return active entities only unless stated otherwise.
pub trait Store: ResponseStore {
    // -- reads -------------------------------------------------------------

    fn ledger(&self, id: LedgerId) -> Option<Ledger>;
    fn ledger_by_slug(&self, slug: &str) -> Option<Ledger>;
    fn person(&self, id: PersonId) -> Option<Person>;
    fn category(&self, slug: &str) -> Option<Category>;
    fn task(&self, id: TaskId) -> Option<Task>;
    fn task_by_slug(&self, ledger: LedgerId, slug: &str) -> Option<Task>;
    fn score(&self, id: ScoreId) -> Option<Score>;
    fn score_for(&self, task: TaskId, person: PersonId) -> Option<Score>;
    fn formula(&self, id: FormulaId) -> Option<Formula>;
    fn formula_by_digest(&self, kind: FormulaKind, digest: &str) -> Option<Formula>;
    fn formulas(&self) -> Vec<Formula>;

    // -- scope queries -------------------------------------------------------

    /// Tasks of `ledger` whose slug is in `task_slugs` or whose category is
    /// in `category_slugs`.
    fn tasks_in_scope(
        &self,
        ledger: LedgerId,
        task_slugs: &[String],
        category_slugs: &[String],
    ) -> Vec<TaskId>;

    /// Scores of `person` on tasks of `ledger` whose task slug is in
    /// `task_slugs` or whose task category is in `category_slugs`.
    fn scores_in_scope(
        &self,
        ledger: LedgerId,
        person: PersonId,
        task_slugs: &[String],
        category_slugs: &[String],
    ) -> Vec<ScoreId>;

    /// Scores of `person` on any of `tasks`.
    fn scores_of_person(&self, person: PersonId, tasks: &[TaskId]) -> Vec<ScoreId>;

    fn tasks_of_ledger(&self, ledger: LedgerId) -> Vec<TaskId>;
    fn scores_of_task(&self, task: TaskId) -> Vec<ScoreId>;
    fn scores_of_ledger(&self, ledger: LedgerId) -> Vec<ScoreId>;

    /// Active scores that read `score`.
    fn score_reverse_dependencies(&self, score: ScoreId) -> Vec<ScoreId>;

    /// Tasks whose dependency edges need rebuilding.
    fn stale_tasks(&self) -> Vec<TaskId>;
    /// Scores whose dependency edges need rebuilding.
    fn stale_scores(&self) -> Vec<ScoreId>;
    /// Scores whose value differs from the committed value.
    fn changed_scores(&self) -> Vec<ScoreId>;

    // -- creation --------------------------------------------------------------

    fn create_ledger(&mut self, slug: &str, name: &str) -> Result<LedgerId>;
    fn create_person(&mut self, person: Person) -> Result<PersonId>;
    fn add_ledger_member(&mut self, ledger: LedgerId, person: PersonId) -> Result<()>;
    fn create_category(&mut self, category: Category) -> Result<()>;
    fn create_task(&mut self, task: NewTask) -> Result<TaskId>;
    fn create_score(&mut self, task: TaskId, person: PersonId) -> Result<ScoreId>;
    fn create_formula(&mut self, formula: NewFormula) -> Result<FormulaId>;
    fn create_response(
        &mut self,
        task: TaskId,
        owner: &str,
        score: Value,
        description: &str,
    ) -> Result<ResponseId>;

    // -- atomic updates ----------------------------------------------------------

    /// Replace a task's dependency edges wholesale.
    fn set_task_dependencies(&mut self, id: TaskId, deps: Vec<TaskId>) -> Result<()>;
    /// Replace a score's dependency edges wholesale.
    fn set_score_dependencies(&mut self, id: ScoreId, deps: Vec<ScoreId>) -> Result<()>;

    fn set_task_formula(&mut self, id: TaskId, formula: Option<FormulaId>) -> Result<()>;
    fn set_task_full_marks(&mut self, id: TaskId, full_marks: Value) -> Result<()>;
    fn set_task_resolved(&mut self, id: TaskId, resolved: bool) -> Result<()>;
    fn set_task_active(&mut self, id: TaskId, active: bool) -> Result<()>;

    fn set_score_formula(&mut self, id: ScoreId, formula: Option<FormulaId>) -> Result<()>;
    fn set_score_full_marks(&mut self, id: ScoreId, full_marks: Value) -> Result<()>;
    fn set_score_resolved(&mut self, id: ScoreId, resolved: bool) -> Result<()>;
    /// Write a score's value and committed value together.
    fn set_score_values(&mut self, id: ScoreId, value: Value, old_value: Value) -> Result<()>;
    /// Write only the current value, leaving the committed value alone.
    fn set_score_value(&mut self, id: ScoreId, value: Value) -> Result<()>;
    /// Bulk overwrite of committed values; returns the number of rows touched.
    fn set_old_values(&mut self, ids: &[ScoreId], old_value: Value) -> Result<usize>;

    // -- derived -------------------------------------------------------------

    /// The score's own formula, else its task's.
    fn effective_formula(&self, score: &Score) -> Option<FormulaId> {
        score
            .formula
            .or_else(|| self.task(score.task).and_then(|t| t.formula))
    }

    /// The score's own full marks, else its task's.
    fn effective_full_marks(&self, score: &Score) -> Value {
        if score.full_marks.is_empty() {
            self.task(score.task)
                .map(|t| t.full_marks)
                .unwrap_or_default()
        } else {
            score.full_marks.clone()
        }
    }
}
