//! External response matching.
//!
//! Not arithmetic: the calculator looks for exactly one active response for
//! the score's task owned by the score's person, marks it consumed and
//! returns its score. Zero or several matches leave the score without a
//! value.

use tracing::debug;

use super::{is_blank, CalcContext, Calculator, Outcome};
use crate::error::Result;
use crate::model::{DependencyKey, FormulaKind, Person};
use crate::value::Value;

/// Which person identifiers a response owner is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
    /// The person's student number.
    StudentNumber,
    /// Any of the person's registered devices.
    Device,
}

impl Matching {
    fn owners(self, person: &Person) -> Vec<String> {
        match self {
            Matching::StudentNumber => person.student_number.iter().cloned().collect(),
            Matching::Device => person.device_ids.clone(),
        }
    }
}

pub struct ResponseCalc {
    kind: FormulaKind,
    name: &'static str,
    matching: Matching,
}

impl ResponseCalc {
    pub fn bubble_sheet() -> Self {
        Self {
            kind: FormulaKind::BubbleSheet,
            name: "Bubblesheet Response",
            matching: Matching::StudentNumber,
        }
    }

    pub fn clicker() -> Self {
        Self {
            kind: FormulaKind::Clicker,
            name: "i>clicker Response",
            matching: Matching::Device,
        }
    }

    pub fn clicker_import() -> Self {
        Self {
            kind: FormulaKind::ClickerImport,
            name: "i>clicker scores",
            matching: Matching::StudentNumber,
        }
    }
}

impl Calculator for ResponseCalc {
    fn kind(&self) -> FormulaKind {
        self.kind
    }

    fn verbose_name(&self) -> &'static str {
        self.name
    }

    fn is_valid(&self, args: &serde_json::Value) -> bool {
        is_blank(args)
    }

    fn dependencies(&self, _args: &serde_json::Value) -> Result<Vec<DependencyKey>> {
        Ok(Vec::new())
    }

    fn calculate(&self, _args: &serde_json::Value, ctx: &mut CalcContext<'_>) -> Result<Outcome> {
        let Some(person) = ctx.subject.person.as_ref() else {
            return Ok(Outcome::Value(Value::Empty));
        };
        let owners = self.matching.owners(person);
        if owners.is_empty() {
            return Ok(Outcome::Value(Value::Empty));
        }

        let mut matches = ctx.responses.responses_for(ctx.subject.task, &owners);
        if matches.len() != 1 {
            debug!(
                score = %ctx.subject.score,
                candidates = matches.len(),
                "no unique response match"
            );
            return Ok(Outcome::Value(Value::Empty));
        }
        let Some(response) = matches.pop() else {
            return Ok(Outcome::Value(Value::Empty));
        };
        ctx.responses.mark_response_scored(response.id)?;
        Ok(Outcome::Value(response.score))
    }
}
