//! Unscaled single-source formulas: add, bonus, ceiling and the static
//! override.

use serde::Deserialize;

use super::{is_blank, parse_args, CalcContext, Calculator, Outcome};
use crate::error::Result;
use crate::model::{DependencyKey, FormulaKind};
use crate::value::{Coerce, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddArgs {
    src_tasks: Vec<String>,
}

/// Plain sum of the listed tasks. Never rescaled.
pub struct AddCalc;

impl Calculator for AddCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Add
    }

    fn verbose_name(&self) -> &'static str {
        "Add"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        parse_args::<AddArgs>(self.kind(), args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args: AddArgs = parse_args(self.kind(), args)?;
        Ok(args.src_tasks.into_iter().map(DependencyKey::task).collect())
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args: AddArgs = parse_args(self.kind(), args)?;
        if args.src_tasks.is_empty() {
            return Ok(Outcome::Value(Value::NO_SCORE));
        }
        let mut total = 0.0;
        for slug in &args.src_tasks {
            total += ctx.symbols.task_value(slug, Coerce::Zero)?.unwrap_or(0.0);
        }
        Ok(ctx.number(total))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BonusArgs {
    src_task: String,
    points: f64,
}

/// Source value plus a fixed number of points.
pub struct BonusCalc;

impl Calculator for BonusCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Bonus
    }

    fn verbose_name(&self) -> &'static str {
        "Bonus points"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        parse_args::<BonusArgs>(self.kind(), args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args: BonusArgs = parse_args(self.kind(), args)?;
        Ok(vec![DependencyKey::task(args.src_task)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args: BonusArgs = parse_args(self.kind(), args)?;
        let src = ctx.symbols.task_value(&args.src_task, Coerce::Zero)?.unwrap_or(0.0);
        Ok(ctx.number(src + args.points))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CeilArgs {
    src_task: String,
}

/// Ceiling of the source value.
pub struct CeilCalc;

impl Calculator for CeilCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Ceil
    }

    fn verbose_name(&self) -> &'static str {
        "Ceiling"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        parse_args::<CeilArgs>(self.kind(), args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args: CeilArgs = parse_args(self.kind(), args)?;
        Ok(vec![DependencyKey::task(args.src_task)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args: CeilArgs = parse_args(self.kind(), args)?;
        let src = ctx.symbols.task_value(&args.src_task, Coerce::Zero)?.unwrap_or(0.0);
        Ok(ctx.number(src.ceil()))
    }
}

/// Static override: the stored value is never touched.
pub struct NoopCalc;

impl Calculator for NoopCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Noop
    }

    fn verbose_name(&self) -> &'static str {
        "Static override"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        is_blank(args)
    }

    fn dependencies(&self, _args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        Ok(Vec::new())
    }

    fn calculate(&self, _args: &serde_json::Value, _ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        Ok(Outcome::NoChange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::testing::{dep, number, run};
    use serde_json::json;

    #[test]
    fn add_sums_and_treats_text_as_zero() {
        let deps = [
            dep(1, "a", "quiz", "3", "10"),
            dep(2, "b", "quiz", "INC", "10"),
            dep(3, "c", "quiz", "4.5", "10"),
        ];
        let out = run(&AddCalc, json!({"src_tasks": ["a", "b", "c"]}), &deps, Some(100.0));
        assert_eq!(out, number(7.5));
    }

    #[test]
    fn add_empty_list_is_no_score() {
        let out = run(&AddCalc, json!({"src_tasks": []}), &[], None);
        assert_eq!(out, Outcome::Value(Value::NO_SCORE));
    }

    #[test]
    fn add_missing_task_counts_zero() {
        let deps = [dep(1, "a", "quiz", "3", "10")];
        let out = run(&AddCalc, json!({"src_tasks": ["a", "gone"]}), &deps, None);
        assert_eq!(out, number(3.0));
    }

    #[test]
    fn add_rejects_extra_keys() {
        assert!(AddCalc.is_valid(&json!({"src_tasks": ["a"]})));
        assert!(!AddCalc.is_valid(&json!({"src_tasks": ["a"], "x": 1})));
        assert!(!AddCalc.is_valid(&json!({})));
    }

    #[test]
    fn bonus_and_ceil() {
        let deps = [dep(1, "mt", "exam", "41.2", "50")];
        assert_eq!(
            run(&BonusCalc, json!({"src_task": "mt", "points": 2.5}), &deps, Some(50.0)),
            number(43.7)
        );
        assert_eq!(run(&CeilCalc, json!({"src_task": "mt"}), &deps, None), number(42.0));
    }

    #[test]
    fn noop_never_changes() {
        assert!(NoopCalc.is_valid(&json!({})));
        assert!(!NoopCalc.is_valid(&json!({"a": 1})));
        assert_eq!(run(&NoopCalc, json!({}), &[], None), Outcome::NoChange);
    }
}
