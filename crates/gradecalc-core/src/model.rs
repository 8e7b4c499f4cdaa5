//! Core data model types for gradecalc.
//!
//! Ledgers hold tasks, tasks are grouped into categories, and every
//! (task, person) pair owns a score. Tasks and scores may carry a formula;
//! a score without its own formula inherits the task's.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

use crate::error::EngineError;
use crate::value::Value;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Ledger`].
    LedgerId
);
id_type!(
    /// Identifier of a [`Person`].
    PersonId
);
id_type!(
    /// Identifier of a [`Task`].
    TaskId
);
id_type!(
    /// Identifier of a [`Score`].
    ScoreId
);
id_type!(
    /// Identifier of a [`Formula`].
    FormulaId
);
id_type!(
    /// Identifier of an external [`Response`].
    ResponseId
);

/// A scoping container for tasks and the people scored on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub id: LedgerId,
    pub slug: String,
    pub name: String,
    /// People holding a scored role in this ledger.
    #[serde(default)]
    pub members: Vec<PersonId>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A person who can own scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    /// Owner identifier used by direct response matching.
    #[serde(default)]
    pub student_number: Option<String>,
    /// Registered response devices, used by device response matching.
    #[serde(default)]
    pub device_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A named grouping of tasks, usable as an aggregate dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub slug: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// A scorable unit within a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub ledger: LedgerId,
    pub slug: String,
    pub name: String,
    /// Slug of the owning category.
    pub category: String,
    /// Nominal full marks; kept as a value so non-numeric text survives.
    #[serde(default)]
    pub full_marks: Value,
    /// Cascade formula, inherited by scores without their own.
    #[serde(default)]
    pub formula: Option<FormulaId>,
    /// Tasks read to compute this task's scores.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Tasks that read this one. Maintained by the store.
    #[serde(default)]
    pub reverse_dependencies: Vec<TaskId>,
    #[serde(default)]
    pub dependencies_resolved: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// The per-(task, person) value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub id: ScoreId,
    pub task: TaskId,
    pub person: PersonId,
    #[serde(default)]
    pub value: Value,
    /// Last committed value; equal to `value` when the score is clean.
    #[serde(default)]
    pub old_value: Value,
    /// Overrides the task's full marks when not empty.
    #[serde(default)]
    pub full_marks: Value,
    /// Overrides the task's formula when set.
    #[serde(default)]
    pub formula: Option<FormulaId>,
    /// Scores read to compute this score.
    #[serde(default)]
    pub dependencies: Vec<ScoreId>,
    /// Scores that read this one. Maintained by the store.
    #[serde(default)]
    pub reverse_dependencies: Vec<ScoreId>,
    #[serde(default)]
    pub dependencies_resolved: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Score {
    /// A score is dirty when its value differs from the committed value.
    pub fn is_dirty(&self) -> bool {
        self.value != self.old_value
    }
}

/// Supported formula type tags.
///
/// The set is closed: every tag maps to exactly one calculator in
/// [`crate::formula`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormulaKind {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "wei")]
    Weight,
    #[serde(rename = "bin")]
    Bin,
    #[serde(rename = "dro")]
    Drop,
    #[serde(rename = "rwt")]
    RankWeight,
    #[serde(rename = "bon")]
    Bonus,
    #[serde(rename = "ceil")]
    Ceil,
    #[serde(rename = "noop")]
    Noop,
    #[serde(rename = "bbl")]
    BubbleSheet,
    #[serde(rename = "icli")]
    Clicker,
    #[serde(rename = "iclm")]
    ClickerImport,
}

impl FormulaKind {
    pub const ALL: [FormulaKind; 12] = [
        FormulaKind::Add,
        FormulaKind::Sum,
        FormulaKind::Weight,
        FormulaKind::Bin,
        FormulaKind::Drop,
        FormulaKind::RankWeight,
        FormulaKind::Bonus,
        FormulaKind::Ceil,
        FormulaKind::Noop,
        FormulaKind::BubbleSheet,
        FormulaKind::Clicker,
        FormulaKind::ClickerImport,
    ];

    /// The stored type tag.
    pub fn tag(self) -> &'static str {
        match self {
            FormulaKind::Add => "add",
            FormulaKind::Sum => "sum",
            FormulaKind::Weight => "wei",
            FormulaKind::Bin => "bin",
            FormulaKind::Drop => "dro",
            FormulaKind::RankWeight => "rwt",
            FormulaKind::Bonus => "bon",
            FormulaKind::Ceil => "ceil",
            FormulaKind::Noop => "noop",
            FormulaKind::BubbleSheet => "bbl",
            FormulaKind::Clicker => "icli",
            FormulaKind::ClickerImport => "iclm",
        }
    }
}

impl fmt::Display for FormulaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FormulaKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        FormulaKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| EngineError::UnregisteredType(tag.to_string()))
    }
}

/// A `(type, arguments)` pair, deduplicated by content digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub id: FormulaId,
    pub kind: FormulaKind,
    #[serde(default)]
    pub args: serde_json::Value,
    pub digest: String,
    #[serde(default)]
    pub short_description: String,
    /// Task slug prefix this formula is offered for; empty means any task.
    #[serde(default)]
    pub applies_to: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Formula {
    /// Canonical argument encoding: compact JSON with object keys in sorted
    /// order (`serde_json::Map` is ordered by key).
    pub fn canonical_args(args: &serde_json::Value) -> String {
        args.to_string()
    }

    /// SHA-224 hex digest of the canonical argument encoding.
    pub fn digest_of(args: &serde_json::Value) -> String {
        let hash = Sha224::digest(Self::canonical_args(args).as_bytes());
        format!("{hash:x}")
    }

    /// Human-readable label for listings.
    pub fn label(&self) -> String {
        match (self.short_description.is_empty(), self.applies_to.is_empty()) {
            (false, false) => format!("{}: {}", self.applies_to, self.short_description),
            (false, true) => self.short_description.clone(),
            (true, _) => format!("{} - {}", self.kind, self.digest),
        }
    }
}

/// What a formula references: a single task or a whole category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Task,
    Category,
}

/// An abstract, slug-based dependency reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyKey {
    pub kind: DependencyKind,
    pub slug: String,
}

impl DependencyKey {
    pub fn task(slug: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Task,
            slug: slug.into(),
        }
    }

    pub fn category(slug: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Category,
            slug: slug.into(),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DependencyKind::Task => write!(f, "t:{}", self.slug),
            DependencyKind::Category => write!(f, "c:{}", self.slug),
        }
    }
}

/// An externally ingested response awaiting a match to a score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub task: TaskId,
    /// Owner identifier as supplied by the response source.
    pub owner: String,
    pub score: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scored: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}
