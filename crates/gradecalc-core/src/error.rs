//! Engine error types.
//!
//! Calculator-level arithmetic problems never show up here: they become
//! error-tagged [`Value`](crate::value::Value)s stored on the score. These
//! variants cover structural failures that the caller of a validation or
//! recalculation step has to see.

use thiserror::Error;

use crate::model::{FormulaKind, ScoreId};

/// Errors raised by the formula, dependency and cascade machinery.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The formula type tag has no registered calculator.
    #[error("formula type \"{0}\" is not registered")]
    UnregisteredType(String),

    /// The formula arguments do not fit the calculator's expected shape.
    #[error("invalid arguments for {kind} formula: {reason}")]
    InvalidArguments { kind: FormulaKind, reason: String },

    /// A referenced entity does not exist in the store.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// An entity with the same unique key already exists.
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// A calculator asked the symbol table for a key it never declared.
    #[error("symbol \"{0}\" is not in the symbol table")]
    UnknownSymbol(String),

    /// The dependency edges of a cascade contain a cycle.
    #[error("dependency cycle detected: {}", format_path(.path))]
    CycleDetected { path: Vec<ScoreId> },

    /// Topological ordering did not visit every collected node.
    #[error("incomplete cascade order: collected {collected} scores but ordered {ordered}")]
    IncompleteOrder { collected: usize, ordered: usize },

    /// The cascade order did not start with the changed score.
    #[error("cascade order for score {expected} starts with score {found}")]
    CascadeRootMismatch { expected: ScoreId, found: ScoreId },

    /// Reading or writing a snapshot failed.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding JSON failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Shorthand for a [`EngineError::NotFound`] error.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns `true` if the error reflects corrupt or inconsistent graph
    /// data that needs out-of-band correction rather than a retry.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::CycleDetected { .. }
                | EngineError::IncompleteOrder { .. }
                | EngineError::CascadeRootMismatch { .. }
        )
    }
}

fn format_path(path: &[ScoreId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
