//! The `gradecalc recalc` command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use gradecalc_core::cascade::CalcSummary;
use gradecalc_core::engine::{PassFailure, PassReport, ProgressReporter};
use gradecalc_core::model::ScoreId;

use super::{driver, open_state, save_state};

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_pass_start(&self, stale_tasks: usize, stale_scores: usize, changed: usize) {
        if stale_tasks + stale_scores + changed > 0 {
            eprintln!(
                "  Pass: {stale_tasks} stale tasks, {stale_scores} stale scores, {changed} changed"
            );
        }
    }

    fn on_score_calculated(&self, score: ScoreId, summary: &CalcSummary) {
        if summary.cascaded > 0 {
            eprintln!("  Score {score}: {} downstream", summary.cascaded);
        }
    }

    fn on_failure(&self, failure: &PassFailure) {
        eprintln!("  ERROR: {}: {}", failure.entity, failure.message);
    }

    fn on_pass_complete(&self, _: &PassReport) {}
}

pub async fn execute(
    state: PathBuf,
    repeat: bool,
    delay: Option<f64>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if let Some(secs) = delay {
        anyhow::ensure!(
            secs.is_finite() && secs >= 0.0,
            "delay must be a non-negative number of seconds"
        );
    }

    let driver = driver(config_path.as_deref())?;
    let mut store = open_state(&state)?;
    let reporter = ConsoleReporter;

    if repeat {
        let delay = delay
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| driver.config().poll_delay());
        eprintln!(
            "Recalculating every {:.1}s, press Ctrl-C to stop",
            delay.as_secs_f64()
        );
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        };
        let summary = driver
            .run_repeat(&mut store, delay, &reporter, shutdown)
            .await;
        save_state(&store, &state)?;
        println!(
            "{} passes: {} resolved, {} calculated, {} failed",
            summary.passes, summary.resolved, summary.calculated, summary.failures
        );
        return Ok(());
    }

    let report = driver.run_pass(&mut store, &reporter);
    save_state(&store, &state)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Resolved {}, calculated {} (+{} downstream), skipped {}, failed {} ({}ms)",
            report.resolved,
            report.calculated,
            report.cascaded,
            report.skipped,
            report.failures.len(),
            report.duration_ms
        );
    }
    Ok(())
}
