//! Calculator variants.
//!
//! Each [`FormulaKind`] has one [`Calculator`] implementation. Calculators
//! declare the abstract references of their arguments and compute a value
//! from a [`SymbolTable`] built over the score's dependency edges.
//! Arithmetic degeneracies are returned as error-tagged values, never as
//! `Err`.

mod aggregate;
mod bin;
mod response;
mod simple;

pub use aggregate::{DropCalc, RankWeightCalc, SumCalc, WeightCalc};
pub use bin::BinCalc;
pub use response::{Matching, ResponseCalc};
pub use simple::{AddCalc, BonusCalc, CeilCalc, NoopCalc};

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

use crate::error::{EngineError, Result};
use crate::model::{DependencyKey, FormulaKind, Person, ScoreId, TaskId};
use crate::store::ResponseStore;
use crate::symbols::SymbolTable;
use crate::value::Value;

/// Result of running a calculator.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The computed value; [`Value::Empty`] means "no value".
    Value(Value),
    /// Leave the stored value untouched.
    NoChange,
}

/// The score being calculated.
#[derive(Debug, Clone)]
pub struct Subject {
    pub score: ScoreId,
    pub task: TaskId,
    pub person: Option<Person>,
}

/// Everything a calculator may read or touch for one calculation.
pub struct CalcContext<'a> {
    pub symbols: &'a SymbolTable,
    /// Full marks of the target score, when numeric. Enables rescaling.
    pub target_full_marks: Option<f64>,
    /// Decimal places for numeric results.
    pub precision: u32,
    pub subject: &'a Subject,
    pub responses: &'a mut dyn ResponseStore,
}

impl CalcContext<'_> {
    /// Round a numeric result and wrap it.
    pub fn number(&self, n: f64) -> Outcome {
        Outcome::Value(Value::from(n).rounded(self.precision))
    }
}

/// One formula type's behaviour.
pub trait Calculator: Send + Sync {
    fn kind(&self) -> FormulaKind;

    /// Human-readable type name.
    fn verbose_name(&self) -> &'static str;

    /// Whether `args` has the shape this calculator expects.
    fn is_valid(&self, args: &serde_json::Value) -> bool;

    /// Abstract references declared by `args`.
    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>>;

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome>;
}

/// Decode typed arguments, mapping failures to
/// [`EngineError::InvalidArguments`].
pub(crate) fn parse_args<T: DeserializeOwned>(
    kind: FormulaKind,
    args: &serde_json::Value,
) -> Result<T> {
    serde_json::from_value(args.clone()).map_err(|e| EngineError::InvalidArguments {
        kind,
        reason: e.to_string(),
    })
}

/// A non-negative count written as an integer, a float (truncated) or
/// numeric text.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCount {
        Int(u32),
        Float(f64),
        Text(String),
    }

    match RawCount::deserialize(deserializer)? {
        RawCount::Int(n) => Ok(n),
        RawCount::Float(f) if f.is_finite() && (0.0..=u32::MAX as f64).contains(&f) => {
            Ok(f.trunc() as u32)
        }
        RawCount::Float(f) => Err(D::Error::custom(format!("invalid count {f}"))),
        RawCount::Text(text) => text
            .trim()
            .parse::<u32>()
            .map_err(|_| D::Error::custom(format!("invalid count {text:?}"))),
    }
}

/// Argument-free formulas accept `null`, `{}` or `""`.
pub(crate) fn is_blank(args: &serde_json::Value) -> bool {
    match args {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) fn invalid(kind: FormulaKind, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidArguments {
        kind,
        reason: reason.into(),
    }
}
