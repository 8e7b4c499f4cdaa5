//! Piecewise-constant lookup.

use serde::Deserialize;

use super::{invalid, parse_args, CalcContext, Calculator, Outcome};
use crate::error::Result;
use crate::model::{DependencyKey, FormulaKind};
use crate::value::{Coerce, Value};

/// A bin's result: usually a number, but letter grades are allowed.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BinScore {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BinArgs {
    src_task: String,
    /// `(threshold, score)` pairs in ascending threshold order. `(0, 0)` is
    /// implied.
    bins: Vec<(f64, BinScore)>,
}

pub struct BinCalc;

impl BinCalc {
    fn args(&self, args: &serde_json::Value) -> Result<BinArgs> {
        let parsed: BinArgs = parse_args(self.kind(), args)?;
        if parsed.bins.is_empty() {
            return Err(invalid(self.kind(), "bins must not be empty"));
        }
        Ok(parsed)
    }
}

impl Calculator for BinCalc {
    fn kind(&self) -> FormulaKind {
        FormulaKind::Bin
    }

    fn verbose_name(&self) -> &'static str {
        "Binned"
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        self.args(args).is_ok()
    }

    fn dependencies(&self, args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        let args = self.args(args)?;
        Ok(vec![DependencyKey::task(args.src_task)])
    }

    fn calculate(&self, args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let args = self.args(args)?;
        let src = ctx.symbols.task_value(&args.src_task, Coerce::Zero)?.unwrap_or(0.0);

        let mut result = BinScore::Number(0.0);
        for (threshold, score) in &args.bins {
            if src >= *threshold {
                result = score.clone();
            }
        }

        match result {
            BinScore::Text(text) => Ok(Outcome::Value(Value::from(text))),
            BinScore::Number(mut n) => {
                let last = args.bins.last().map(|(_, score)| score);
                if let (Some(target), Some(BinScore::Number(outof))) =
                    (ctx.target_full_marks, last)
                {
                    if *outof == 0.0 {
                        return Ok(Outcome::Value(Value::error("DbZ")));
                    }
                    n = n * target / outof;
                }
                Ok(ctx.number(n))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::testing::{dep, error, number, run};
    use serde_json::json;

    fn args() -> serde_json::Value {
        json!({"src_task": "clicker", "bins": [[50, 3], [75, 5]]})
    }

    #[test]
    fn picks_last_bin_at_or_below() {
        for (src, expected) in [("10", 0.0), ("50", 3.0), ("74.9", 3.0), ("80", 5.0)] {
            let deps = [dep(1, "clicker", "part", src, "100")];
            assert_eq!(run(&BinCalc, args(), &deps, None), number(expected), "src {src}");
        }
    }

    #[test]
    fn rescales_by_last_bin_score() {
        let deps = [dep(1, "clicker", "part", "60", "100")];
        assert_eq!(run(&BinCalc, args(), &deps, Some(10.0)), number(6.0));
    }

    #[test]
    fn text_bins_pass_through() {
        let deps = [dep(1, "final", "exam", "91", "100")];
        let args = json!({"src_task": "final", "bins": [[50, "C"], [80, "B"], [90, "A"]]});
        assert_eq!(
            run(&BinCalc, args, &deps, Some(100.0)),
            Outcome::Value(Value::Text("A".into()))
        );
    }

    #[test]
    fn zero_last_bin_with_target() {
        let deps = [dep(1, "clicker", "part", "60", "100")];
        let args = json!({"src_task": "clicker", "bins": [[50, 0]]});
        assert_eq!(run(&BinCalc, args, &deps, Some(10.0)), error("DbZ"));
    }

    #[test]
    fn validation() {
        assert!(BinCalc.is_valid(&args()));
        assert!(!BinCalc.is_valid(&json!({"src_task": "x", "bins": []})));
        assert!(!BinCalc.is_valid(&json!({"src_task": "x"})));
    }
}
