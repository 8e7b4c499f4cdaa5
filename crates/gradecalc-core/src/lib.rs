//! gradecalc-core: formula, dependency graph and recalculation engine.
//!
//! Tasks and scores carry formulas that reference other tasks by slug or
//! whole categories. This crate resolves those references into edges,
//! tracks which scores are stale or dirty, and recalculates them in
//! dependency order.

pub mod cascade;
pub mod config;
pub mod depgraph;
pub mod engine;
pub mod error;
pub mod formula;
pub mod model;
pub mod parser;
pub mod registry;
pub mod staleness;
pub mod store;
pub mod symbols;
pub mod value;

pub use error::{EngineError, Result};
