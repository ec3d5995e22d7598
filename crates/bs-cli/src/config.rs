use std::fs;
use std::path::Path;

use bs_runtime::EngineOptions;
use serde::Deserialize;

use crate::robot::Pose;
use crate::{map_cli_config_invalid, map_cli_config_read, CliError, RunArgs};

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Settings for one `run`: engine options plus controller behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RunConfig {
    #[serde(flatten)]
    pub(crate) engine: EngineOptions,
    /// Completed runs after which a looping script is stopped.
    pub(crate) max_runs: Option<u64>,
    /// Simulated time spent on each suspension before it is answered.
    pub(crate) tick_ms: u64,
    pub(crate) timeout_ms: u64,
    pub(crate) start: Pose,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            max_runs: None,
            tick_ms: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            start: Pose::default(),
        }
    }
}

impl RunConfig {
    pub(crate) fn apply_args(&mut self, args: &RunArgs) {
        if args.looping {
            self.engine.looping = true;
        }
        if let Some(max_runs) = args.max_runs {
            self.max_runs = Some(max_runs);
        }
        if let Some(tick_ms) = args.tick_ms {
            self.tick_ms = tick_ms;
        }
        if let Some(timeout_ms) = args.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CliError> {
        if self.max_runs == Some(0) {
            return Err(CliError::new(
                "CLI_CONFIG_INVALID",
                "maxRuns must be at least 1",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(CliError::new(
                "CLI_CONFIG_INVALID",
                "timeoutMs must be at least 1",
            ));
        }
        Ok(())
    }

    pub(crate) fn reached_max_runs(&self, completed_runs: u64) -> bool {
        self.engine.looping
            && self
                .max_runs
                .is_some_and(|max_runs| completed_runs >= max_runs)
    }
}

pub(crate) fn load_run_config(path: &Path) -> Result<RunConfig, CliError> {
    if !path.exists() {
        return Err(CliError::new(
            "CLI_CONFIG_NOT_FOUND",
            format!("config file does not exist: {}", path.display()),
        ));
    }
    let raw = fs::read_to_string(path).map_err(map_cli_config_read)?;
    serde_json::from_str(&raw).map_err(map_cli_config_invalid)
}
