use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_NAME: &str = "<src>";
pub const DEFAULT_THREAD_NAME: &str = "botscript-worker";
pub const DEFAULT_ABORT_CHECK_INTERVAL: u32 = 1_000;
pub const DEFAULT_IDLE_POLL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// Restart the program from the top after each completed run.
    pub looping: bool,
    /// Name the evaluator reports in diagnostics.
    pub chunk_name: String,
    /// Instructions between two polls of the abort flag.
    pub abort_check_interval: u32,
    /// Upper bound on how long a paused worker parks before re-checking its state.
    pub idle_poll_ms: u64,
    pub thread_name: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            looping: false,
            chunk_name: DEFAULT_CHUNK_NAME.to_string(),
            abort_check_interval: DEFAULT_ABORT_CHECK_INTERVAL,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl EngineOptions {
    pub fn looping(looping: bool) -> Self {
        Self {
            looping,
            ..Self::default()
        }
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}
