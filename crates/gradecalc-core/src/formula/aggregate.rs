//! Multi-source formulas that may rescale to the target's full marks.

use serde::Deserialize;

use super::{invalid, lenient_count, parse_args, CalcContext, Calculator, Outcome};
use crate::error::Result;
use crate::model::{DependencyKey, FormulaKind};
use crate::value::{Coerce, Value};

// ---------------------------------------------------------------------------
// Sum
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SumArgs {
    src_category: String,
}

/// Sum of a category, rescaled by `target / sum(member full marks)`.
pub struct SumCalc;

impl Calculator for SumCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Sum
    }

    fn verbose_name(&self) -> &'static str {
        "Sum"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        parse_args::<SumArgs>(self.kind(), args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args: SumArgs = parse_args(self.kind(), args)?;
        Ok(vec![DependencyKey::category(args.src_category)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args: SumArgs = parse_args(self.kind(), args)?;
        let pairs = ctx
            .symbols
            .category_full(&args.src_category, Coerce::Zero, false)?;
        if pairs.is_empty() {
            return Ok(Outcome::Value(Value::NO_SCORE));
        }
        let mut result: f64 = pairs.iter().map(|(v, _)| v.unwrap_or(0.0)).sum();
        if let Some(target) = ctx.target_full_marks {
            let outof: f64 = pairs.iter().map(|(_, f)| f.unwrap_or(0.0)).sum();
            if outof == 0.0 {
                return Ok(Outcome::Value(Value::error("DbZ")));
            }
            result = result * target / outof;
        }
        Ok(ctx.number(result))
    }
}

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightArgs {
    weights: Vec<(String, f64)>,
}

/// Weighted sum of per-task proportions.
///
/// Each source contributes `weight * value / full marks`; with a target the
/// total is rescaled by `target / sum(weights)`.
pub struct WeightCalc;

impl WeightCalc {
    fn args(&self, args: &serde_json::Value) -> Result<WeightArgs> {
        let parsed: WeightArgs = parse_args(self.kind(), args)?;
        if parsed.weights.is_empty() {
            return Err(invalid(self.kind(), "weights must not be empty"));
        }
        Ok(parsed)
    }
}

impl Calculator for WeightCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Weight
    }

    fn verbose_name(&self) -> &'static str {
        "Weighted"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        self.args(args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args = self.args(args)?;
        Ok(args
            .weights
            .into_iter()
            .map(|(slug, _)| DependencyKey::task(slug))
            .collect())
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args = self.args(args)?;
        let mut result = 0.0;
        for (slug, weight) in &args.weights {
            let pair = ctx
                .symbols
                .get_value_full(&DependencyKey::task(slug.as_str()), Coerce::Zero, false)?
                .into_vec();
            let (value, full) = pair.first().copied().unwrap_or((None, None));
            let full = full.unwrap_or(0.0);
            if full == 0.0 {
                return Ok(Outcome::Value(Value::error(format!("OoZ:{slug}"))));
            }
            result += weight * value.unwrap_or(0.0) / full;
        }
        if let Some(target) = ctx.target_full_marks {
            let outof: f64 = args.weights.iter().map(|(_, w)| w).sum();
            if outof == 0.0 {
                return Ok(Outcome::Value(Value::error("DbZ")));
            }
            result = result * target / outof;
        }
        Ok(ctx.number(result))
    }
}

// ---------------------------------------------------------------------------
// Drop lowest N
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DropArgs {
    src_category: String,
    #[serde(deserialize_with = "lenient_count")]
    drop_count: u32,
}

/// Sum of a category after dropping its `drop_count` lowest members.
///
/// With a target, members are normalized first and the remainder is
/// rescaled by `target / remaining count`.
pub struct DropCalc;

impl Calculator for DropCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Drop
    }

    fn verbose_name(&self) -> &'static str {
        "Drop lowest N"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        parse_args::<DropArgs>(self.kind(), args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args: DropArgs = parse_args(self.kind(), args)?;
        Ok(vec![DependencyKey::category(args.src_category)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args: DropArgs = parse_args(self.kind(), args)?;
        let target = ctx.target_full_marks;
        let mut values: Vec<f64> = ctx
            .symbols
            .category_full(&args.src_category, Coerce::Zero, target.is_some())?
            .into_iter()
            .map(|(v, _)| v.unwrap_or(0.0))
            .collect();

        values.sort_by(f64::total_cmp);
        let dropped = (args.drop_count as usize).min(values.len());
        values.drain(..dropped);

        if values.is_empty() {
            return Ok(ctx.number(0.0));
        }
        let mut result: f64 = values.iter().sum();
        if let Some(target) = target {
            result = result * target / values.len() as f64;
        }
        Ok(ctx.number(result))
    }
}

// ---------------------------------------------------------------------------
// Rank weight
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RankWeightArgs {
    src_category: String,
    rank_weights: Vec<f64>,
}

/// Category members sorted best-first, paired with rank weights.
///
/// The last weight repeats for members beyond the list. With a target,
/// members are normalized and the total is rescaled by
/// `target / sum(weights)`.
pub struct RankWeightCalc;

impl RankWeightCalc {
    fn args(&self, args: &serde_json::Value) -> Result<RankWeightArgs> {
        let parsed: RankWeightArgs = parse_args(self.kind(), args)?;
        if parsed.rank_weights.is_empty() {
            return Err(invalid(self.kind(), "rank_weights must not be empty"));
        }
        Ok(parsed)
    }
}

impl Calculator for RankWeightCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::RankWeight
    }

    fn verbose_name(&self) -> &'static str {
        "Rank Weighted"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        self.args(args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args = self.args(args)?;
        Ok(vec![DependencyKey::category(args.src_category)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args = self.args(args)?;
        let target = ctx.target_full_marks;
        let mut ranked: Vec<f64> = ctx
            .symbols
            .category_full(&args.src_category, Coerce::Zero, target.is_some())?
            .into_iter()
            .map(|(v, _)| v.unwrap_or(0.0))
            .collect();
        ranked.sort_by(|a, b| b.total_cmp(a));

        let mut weights = args.rank_weights;
        if let Some(&last) = weights.last() {
            if ranked.len() > weights.len() {
                weights.resize(ranked.len(), last);
            }
        }

        // missing members contribute zero
        let mut result: f64 = weights
            .iter()
            .zip(ranked.iter().chain(std::iter::repeat(&0.0)))
            .map(|(w, v)| w * v)
            .sum();

        if let Some(target) = target {
            let outof: f64 = weights.iter().sum();
            if outof == 0.0 {
                return Ok(Outcome::Value(Value::error("ZwS")));
            }
            result = result * target / outof;
        }
        Ok(ctx.number(result))
    }
}
