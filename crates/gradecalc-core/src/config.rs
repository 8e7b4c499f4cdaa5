//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::Score;
use crate::value::Value;

/// Settings shared by the recalculation driver and the score renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Decimal places kept on numeric calculated values.
    #[serde(default = "default_precision")]
    pub precision: u32,
    /// Delay between passes in repeat mode, in milliseconds.
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
    /// Leave already matched device-response scores out of forced
    /// recalculation.
    #[serde(default = "default_true")]
    pub skip_matched_responses: bool,
    /// Shown in place of a score awaiting recalculation.
    #[serde(default = "default_calc_indicator")]
    pub calc_indicator: String,
    /// Shown in place of an empty score.
    #[serde(default = "default_no_score_indicator")]
    pub no_score_indicator: String,
}

fn default_precision() -> u32 {
    2
}
fn default_poll_delay() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_calc_indicator() -> String {
    "#".to_string()
}
fn default_no_score_indicator() -> String {
    "NS".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
            poll_delay_ms: default_poll_delay(),
            skip_matched_responses: true,
            calc_indicator: default_calc_indicator(),
            no_score_indicator: default_no_score_indicator(),
        }
    }
}

impl EngineConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    /// Display form of a score: the calc indicator while it awaits
    /// recalculation, the no-score indicator when empty.
    pub fn render(&self, score: &Score) -> String {
        if score.is_dirty() {
            self.calc_indicator.clone()
        } else if score.value.is_empty() || score.value == Value::NO_SCORE {
            self.no_score_indicator.clone()
        } else {
            score.value.to_string()
        }
    }
}

/// Load configuration from `gradecalc.toml` in the current directory, or
/// defaults if there is none.
pub fn load_config() -> Result<EngineConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default location.
///
/// `GRADECALC_PRECISION` overrides the precision from any source.
pub fn load_config_from(path: Option<&Path>) -> Result<EngineConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("gradecalc.toml");
            local.exists().then_some(local)
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<EngineConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if let Ok(raw) = std::env::var("GRADECALC_PRECISION") {
        config.precision = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid GRADECALC_PRECISION: {raw:?}"))?;
    }

    Ok(config)
}
