//! Formula registry: type tag to calculator.
//!
//! The registry is an ordinary value handed to the engine, so tests can
//! build one with a reduced or substituted calculator set.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::formula::{
    AddCalc, BinCalc, BonusCalc, CalcContext, Calculator, CeilCalc, DropCalc, NoopCalc, Outcome,
    RankWeightCalc, ResponseCalc, Subject, SumCalc, WeightCalc,
};
use crate::model::{DependencyKey, Formula, FormulaKind, Score};
use crate::store::Store;
use crate::symbols::SymbolTable;
use crate::value::Coerce;

#[derive(Default)]
pub struct FormulaRegistry {
    calculators: BTreeMap<FormulaKind, Box<dyn Calculator>>,
}

impl FormulaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in calculator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AddCalc));
        registry.register(Box::new(SumCalc));
        registry.register(Box::new(WeightCalc));
        registry.register(Box::new(BinCalc));
        registry.register(Box::new(DropCalc));
        registry.register(Box::new(RankWeightCalc));
        registry.register(Box::new(BonusCalc));
        registry.register(Box::new(CeilCalc));
        registry.register(Box::new(NoopCalc));
        registry.register(Box::new(ResponseCalc::bubble_sheet()));
        registry.register(Box::new(ResponseCalc::clicker()));
        registry.register(Box::new(ResponseCalc::clicker_import()));
        registry
    }

    /// Add a calculator under its own tag, replacing any previous one.
    pub fn register(&mut self, calculator: Box<dyn Calculator>) {
        self.calculators.insert(calculator.kind(), calculator);
    }

    pub fn get(&self, kind: FormulaKind) -> Result<&dyn Calculator> {
        self.calculators
            .get(&kind)
            .map(|c| c.as_ref())
            .ok_or_else(|| EngineError::UnregisteredType(kind.tag().to_string()))
    }

    /// Registered type tags.
    pub fn kinds(&self) -> impl Iterator<Item = FormulaKind> + '_ {
        self.calculators.keys().copied()
    }

    /// `(tag, verbose name)` pairs sorted by tag.
    pub fn choices(&self) -> Vec<(&'static str, &'static str)> {
        let mut choices: Vec<_> = self
            .calculators
            .values()
            .map(|c| (c.kind().tag(), c.verbose_name()))
            .collect();
        choices.sort();
        choices
    }

    /// Fails closed: an unregistered tag is never valid.
    pub fn is_valid(&self, kind: FormulaKind, args: &serde_json::Value) -> bool {
        self.calculators
            .get(&kind)
            .is_some_and(|c| c.is_valid(args))
    }

    /// Like [`is_valid`](Self::is_valid), for a raw tag string.
    pub fn is_valid_tag(&self, tag: &str, args: &serde_json::Value) -> bool {
        tag.parse::<FormulaKind>()
            .is_ok_and(|kind| self.is_valid(kind, args))
    }

    pub fn dependencies(&self, formula: &Formula) -> Result<Vec<DependencyKey>> {
        self.get(formula.kind)?.dependencies(&formula.args)
    }

    /// Calculate `score` from its effective formula and stored edges.
    ///
    /// A score with no effective formula yields [`Outcome::NoChange`].
    pub fn calculate<S: Store>(&self, store: &mut S, score: &Score, precision: u32) -> Result<Outcome> {
        let Some(formula_id) = store.effective_formula(score) else {
            return Ok(Outcome::NoChange);
        };
        let formula = store
            .formula(formula_id)
            .ok_or_else(|| EngineError::not_found("formula", formula_id))?;
        let calculator = self.get(formula.kind)?;
        let keys = calculator.dependencies(&formula.args)?;
        let symbols = SymbolTable::for_score(&*store, score, &keys);
        let target_full_marks = Coerce::Unusable.apply(&store.effective_full_marks(score));
        let subject = Subject {
            score: score.id,
            task: score.task,
            person: store.person(score.person),
        };

        debug!(score = %score.id, kind = %formula.kind, "calculating");
        let mut ctx = CalcContext {
            symbols: &symbols,
            target_full_marks,
            precision,
            subject: &subject,
            responses: store,
        };
        calculator.calculate(&formula.args, &mut ctx)
    }
}
