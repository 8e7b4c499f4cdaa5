//! Recalculation driver.
//!
//! One pass resolves stale dependency edges (tasks, then scores) and then
//! calculates every changed score, cascading downstream. Each entity is
//! isolated: a failure is logged and reported and the pass moves on.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cascade::{calculate_score, CalcSummary};
use crate::config::EngineConfig;
use crate::depgraph;
use crate::error::EngineError;
use crate::model::{ScoreId, TaskId};
use crate::registry::FormulaRegistry;
use crate::store::Store;

/// The entity a pass step worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Entity {
    Task(TaskId),
    Score(ScoreId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Task(id) => write!(f, "task {id}"),
            Entity::Score(id) => write!(f, "score {id}"),
        }
    }
}

/// Which step of the pass failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStage {
    Resolve,
    Calculate,
}

/// One isolated per-entity failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassFailure {
    pub entity: Entity,
    pub stage: PassStage,
    pub message: String,
    /// The edge data is inconsistent (e.g. a cycle) and will fail again
    /// until corrected.
    pub structural: bool,
}

/// Summary of one recalculation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Tasks and scores whose edges were rebuilt.
    pub resolved: usize,
    /// Changed scores calculated as cascade roots.
    pub calculated: usize,
    /// Downstream scores recalculated by those cascades.
    pub cascaded: usize,
    /// Changed scores already brought up to date earlier in the pass.
    pub skipped: usize,
    pub failures: Vec<PassFailure>,
    pub duration_ms: u64,
}

impl PassReport {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            resolved: 0,
            calculated: 0,
            cascaded: 0,
            skipped: 0,
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    /// `true` if the pass did nothing at all.
    pub fn is_idle(&self) -> bool {
        self.resolved == 0 && self.calculated == 0 && self.skipped == 0 && self.failures.is_empty()
    }
}

/// Totals over the passes of [`RecalcDriver::run_repeat`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatSummary {
    pub passes: u64,
    pub resolved: usize,
    pub calculated: usize,
    pub failures: usize,
}

impl RepeatSummary {
    fn absorb(&mut self, report: &PassReport) {
        self.passes += 1;
        self.resolved += report.resolved;
        self.calculated += report.calculated;
        self.failures += report.failures.len();
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_pass_start(&self, stale_tasks: usize, stale_scores: usize, changed: usize);
    fn on_score_calculated(&self, score: ScoreId, summary: &CalcSummary);
    fn on_failure(&self, failure: &PassFailure);
    fn on_pass_complete(&self, report: &PassReport);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_pass_start(&self, _: usize, _: usize, _: usize) {}
    fn on_score_calculated(&self, _: ScoreId, _: &CalcSummary) {}
    fn on_failure(&self, _: &PassFailure) {}
    fn on_pass_complete(&self, _: &PassReport) {}
}

/// Runs recalculation passes over a store.
pub struct RecalcDriver {
    registry: FormulaRegistry,
    config: EngineConfig,
}

impl RecalcDriver {
    pub fn new(registry: FormulaRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &FormulaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a single pass.
    pub fn run_pass<S: Store>(&self, store: &mut S, progress: &dyn ProgressReporter) -> PassReport {
        let start = Instant::now();
        let mut report = PassReport::start();

        let stale_tasks = store.stale_tasks();
        let stale_scores = store.stale_scores();
        progress.on_pass_start(
            stale_tasks.len(),
            stale_scores.len(),
            store.changed_scores().len(),
        );

        for id in stale_tasks {
            match depgraph::resolve_task(store, &self.registry, id) {
                Ok(()) => report.resolved += 1,
                Err(e) => fail(&mut report, progress, Entity::Task(id), PassStage::Resolve, e),
            }
        }

        // resolving tasks can leave further scores stale
        let stale_scores = store.stale_scores();
        for id in stale_scores {
            match depgraph::resolve_score(store, &self.registry, id) {
                Ok(()) => report.resolved += 1,
                Err(e) => fail(&mut report, progress, Entity::Score(id), PassStage::Resolve, e),
            }
        }

        for id in store.changed_scores() {
            if !store.score(id).is_some_and(|s| s.is_dirty()) {
                report.skipped += 1;
                continue;
            }
            match calculate_score(store, &self.registry, id, self.config.precision, true) {
                Ok(summary) => {
                    report.calculated += 1;
                    report.cascaded += summary.cascaded;
                    progress.on_score_calculated(id, &summary);
                }
                Err(e) => fail(
                    &mut report,
                    progress,
                    Entity::Score(id),
                    PassStage::Calculate,
                    e,
                ),
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        if !report.is_idle() {
            tracing::info!(
                pass = %report.id,
                resolved = report.resolved,
                calculated = report.calculated,
                cascaded = report.cascaded,
                skipped = report.skipped,
                failed = report.failures.len(),
                duration_ms = report.duration_ms,
                "recalculation pass complete"
            );
        }
        progress.on_pass_complete(&report);
        report
    }

    /// Run passes until `shutdown` resolves, sleeping `delay` between them.
    ///
    /// Shutdown is only observed between passes, so a pass is never
    /// abandoned halfway.
    pub async fn run_repeat<S, F>(
        &self,
        store: &mut S,
        delay: Duration,
        progress: &dyn ProgressReporter,
        shutdown: F,
    ) -> RepeatSummary
    where
        S: Store,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RepeatSummary::default();
        loop {
            let report = self.run_pass(store, progress);
            summary.absorb(&report);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!(passes = summary.passes, "recalculation loop stopped");
        summary
    }
}

fn fail(
    report: &mut PassReport,
    progress: &dyn ProgressReporter,
    entity: Entity,
    stage: PassStage,
    error: EngineError,
) {
    tracing::error!("{entity} failed during {stage:?}: {error}");
    let failure = PassFailure {
        entity,
        stage,
        message: error.to_string(),
        structural: error.is_structural(),
    };
    progress.on_failure(&failure);
    report.failures.push(failure);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LedgerId;
    use crate::parser::{load_ledger, parse_ledger_str};
    use crate::staleness;
    use crate::store::MemoryStore;
    use crate::value::Value;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LEDGER: &str = r#"
[ledger]
slug = "chem-101"

[[categories]]
slug = "lab"

[[categories]]
slug = "summary"

[[people]]
key = "ada"
name = "Ada"

[[people]]
key = "bo"
name = "Bo"

[[tasks]]
slug = "lab1"
category = "lab"
full_marks = 10

[[tasks]]
slug = "lab2"
category = "lab"
full_marks = 10

[[tasks]]
slug = "labs"
category = "summary"
full_marks = 100
formula = { type = "sum", args = { src_category = "lab" } }

[[tasks]]
slug = "final"
category = "summary"
formula = { type = "bon", args = { src_task = "labs", points = 5 } }

[[scores]]
task = "lab1"
person = "ada"
value = 5

[[scores]]
task = "lab2"
person = "ada"
value = 7
"#;

    fn loaded(toml: &str) -> (MemoryStore, RecalcDriver, LedgerId) {
        let driver = RecalcDriver::new(FormulaRegistry::with_defaults(), EngineConfig::default());
        let def = parse_ledger_str(toml, Path::new("test.toml")).unwrap();
        let mut store = MemoryStore::new();
        let summary = load_ledger(&mut store, driver.registry(), &def, true).unwrap();
        (store, driver, summary.ledger)
    }

    fn value_of(store: &MemoryStore, ledger: LedgerId, task: &str, person: &str) -> Value {
        let task = store.task_by_slug(ledger, task).unwrap();
        store
            .scores_of_task(task.id)
            .into_iter()
            .filter_map(|id| store.score(id))
            .find(|s| store.person(s.person).unwrap().name == person)
            .unwrap()
            .value
    }

    #[test]
    fn first_pass_settles_the_ledger() {
        let (mut store, driver, ledger) = loaded(LEDGER);
        let report = driver.run_pass(&mut store, &NoopReporter);

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert!(report.resolved > 0);
        assert_eq!(value_of(&store, ledger, "labs", "Ada"), Value::Number(60.0));
        assert_eq!(value_of(&store, ledger, "final", "Ada"), Value::Number(65.0));
        assert!(store.changed_scores().is_empty());
        assert!(store.stale_scores().is_empty());
        assert!(store.stale_tasks().is_empty());
    }

    #[test]
    fn settled_pass_performs_no_writes() {
        let (mut store, driver, _) = loaded(LEDGER);
        driver.run_pass(&mut store, &NoopReporter);

        let writes = store.write_count();
        let report = driver.run_pass(&mut store, &NoopReporter);
        assert!(report.is_idle());
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn external_edit_cascades_on_next_pass() {
        let (mut store, driver, ledger) = loaded(LEDGER);
        driver.run_pass(&mut store, &NoopReporter);

        let lab1 = store.task_by_slug(ledger, "lab1").unwrap();
        let ada = store
            .scores_of_task(lab1.id)
            .into_iter()
            .find(|id| store.score(*id).unwrap().value == Value::Number(5.0))
            .unwrap();
        staleness::set_score_value(&mut store, ada, Value::Number(9.0)).unwrap();

        let report = driver.run_pass(&mut store, &NoopReporter);
        assert_eq!(report.calculated, 1);
        assert_eq!(report.cascaded, 2);
        assert_eq!(value_of(&store, ledger, "labs", "Ada"), Value::Number(80.0));
        assert_eq!(value_of(&store, ledger, "final", "Ada"), Value::Number(85.0));
        assert!(store.changed_scores().is_empty());
    }

    #[test]
    fn cycle_fails_only_its_own_scores() {
        let toml = r#"
[ledger]
slug = "loop"

[[categories]]
slug = "a"

[[categories]]
slug = "b"

[[people]]
key = "p"
name = "P"

[[tasks]]
slug = "x"
category = "a"
formula = { type = "add", args = { src_tasks = ["y"] } }

[[tasks]]
slug = "y"
category = "a"
formula = { type = "add", args = { src_tasks = ["x"] } }

[[tasks]]
slug = "q"
category = "b"
full_marks = 10

[[tasks]]
slug = "z"
category = "a"
formula = { type = "add", args = { src_tasks = ["q"] } }

[[scores]]
task = "q"
person = "p"
value = 4
"#;
        let (mut store, driver, ledger) = loaded(toml);
        let report = driver.run_pass(&mut store, &NoopReporter);

        assert!(!report.failures.is_empty());
        assert!(report
            .failures
            .iter()
            .all(|f| f.structural && f.stage == PassStage::Calculate));
        assert_eq!(value_of(&store, ledger, "z", "P"), Value::Number(4.0));

        // the looped scores stay pending and fail again on the next pass
        let looped = report.failures.len();
        assert!(store.changed_scores().len() >= 2);
        let again = driver.run_pass(&mut store, &NoopReporter);
        assert_eq!(again.failures.len(), looped);
        assert!(again
            .failures
            .iter()
            .all(|f| f.message.contains("cycle")));
    }

    #[derive(Default)]
    struct Counting {
        passes: AtomicUsize,
        calculated: AtomicUsize,
    }

    impl ProgressReporter for Counting {
        fn on_pass_start(&self, _: usize, _: usize, _: usize) {}
        fn on_score_calculated(&self, _: ScoreId, _: &CalcSummary) {
            self.calculated.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failure(&self, _: &PassFailure) {}
        fn on_pass_complete(&self, _: &PassReport) {
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_runs_until_shutdown() {
        let (mut store, driver, ledger) = loaded(LEDGER);
        let progress = Counting::default();
        let shutdown = tokio::time::sleep(Duration::from_millis(2500));

        let summary = driver
            .run_repeat(&mut store, Duration::from_millis(1000), &progress, shutdown)
            .await;

        assert_eq!(summary.passes, 3);
        assert_eq!(progress.passes.load(Ordering::SeqCst), 3);
        assert!(summary.calculated > 0);
        assert_eq!(
            progress.calculated.load(Ordering::SeqCst),
            summary.calculated
        );
        assert_eq!(value_of(&store, ledger, "labs", "Ada"), Value::Number(60.0));
    }

    #[test]
    fn failure_serializes_with_entity_tag() {
        let failure = PassFailure {
            entity: Entity::Score(ScoreId(7)),
            stage: PassStage::Calculate,
            message: "dependency cycle detected: 7 -> 8 -> 7".into(),
            structural: true,
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["entity"]["kind"], "score");
        assert_eq!(json["entity"]["id"], 7);
        assert_eq!(json["stage"], "calculate");
    }
}
