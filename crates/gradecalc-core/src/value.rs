//! Score values.
//!
//! Stored values are text in the ledger files and snapshots, but inside the
//! engine they are a sum type so that arithmetic only ever touches numbers
//! while sentinels and error tags pass through untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Text form of [`Sentinel::NoScore`].
pub const NO_SCORE_TEXT: &str = "NS";

/// Text form of [`Sentinel::ForcedRecalc`].
///
/// Never a legitimate score, so an `old_value` holding it always differs from
/// the current value.
pub const FORCED_RECALC_TEXT: &str = "~deadbeef.3735928559~";

const ERROR_PREFIX: &str = "error ";

/// Non-numeric marker values with engine meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// A calculation had nothing to work with (e.g. an empty source list).
    NoScore,
    /// Written to `old_value` to force a score to be recalculated.
    ForcedRecalc,
}

/// A score value, a full-marks value, or a calculator result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Value {
    /// No value entered or calculated.
    #[default]
    Empty,
    /// A finite number.
    Number(f64),
    /// An engine sentinel.
    Sentinel(Sentinel),
    /// An arithmetic degeneracy reported by a calculator, e.g. `DbZ`.
    Error(String),
    /// Any other entered text ("INC", a letter grade, ...).
    Text(String),
}

impl Value {
    /// The "no score" sentinel.
    pub const NO_SCORE: Value = Value::Sentinel(Sentinel::NoScore);

    /// The forced-recalculation sentinel.
    pub const FORCED_RECALC: Value = Value::Sentinel(Sentinel::ForcedRecalc);

    /// Build an error-tagged value.
    pub fn error(tag: impl Into<String>) -> Self {
        Value::Error(tag.into())
    }

    /// The numeric content, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Round numeric values to `digits` decimal places. Anything else is
    /// returned unchanged.
    pub fn rounded(self, digits: u32) -> Self {
        match self {
            Value::Number(n) => Value::Number(round_to(n, digits)),
            other => other,
        }
    }
}

/// Round to `digits` decimal places.
///
/// Rounding works on the exact binary value with ties to even, so `0.125`
/// becomes `0.12` and `2.675` (stored just below the tie) becomes `2.67`.
/// Large values never overflow to infinity.
pub fn round_to(n: f64, digits: u32) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let text = format!("{:.*}", digits.min(17) as usize, n);
    let rounded = text.parse::<f64>().unwrap_or(n);
    // avoid "-0"
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        if n.is_finite() {
            Value::Number(n)
        } else {
            Value::error("NaN")
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Number(n) => write!(f, "{n}"),
            Value::Sentinel(Sentinel::NoScore) => f.write_str(NO_SCORE_TEXT),
            Value::Sentinel(Sentinel::ForcedRecalc) => f.write_str(FORCED_RECALC_TEXT),
            Value::Error(tag) => write!(f, "{ERROR_PREFIX}{tag}"),
            Value::Text(text) => f.write_str(text),
        }
    }
}

impl FromStr for Value {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Value::Empty);
        }
        if trimmed == NO_SCORE_TEXT {
            return Ok(Value::NO_SCORE);
        }
        if trimmed == FORCED_RECALC_TEXT {
            return Ok(Value::FORCED_RECALC);
        }
        if let Some(tag) = trimmed.strip_prefix(ERROR_PREFIX) {
            return Ok(Value::Error(tag.to_string()));
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(Value::Number(n)),
            _ => Ok(Value::Text(trimmed.to_string())),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::from(s.to_string())
    }
}

impl From<Value> for String {
    fn from(value: Value) -> Self {
        value.to_string()
    }
}

/// How a stored value becomes a number for a calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    /// Unparseable values count as `0.0`.
    Zero,
    /// Unparseable values are unusable (`None`), keeping "unknown" apart
    /// from "zero".
    Unusable,
}

impl Coerce {
    pub fn apply(self, value: &Value) -> Option<f64> {
        match self {
            Coerce::Zero => Some(value.as_f64().unwrap_or(0.0)),
            Coerce::Unusable => value.as_f64(),
        }
    }
}
