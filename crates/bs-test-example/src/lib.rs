use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const TESTCASE_SUFFIX: &str = ".testcase.json";

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

pub fn scripts_root() -> PathBuf {
    workspace_root().join("scripts")
}

pub fn script_path(name: &str) -> PathBuf {
    scripts_root().join(format!("{}.lua", name))
}

pub fn testcase_path(name: &str) -> PathBuf {
    scripts_root().join(format!("{}{}", name, TESTCASE_SUFFIX))
}

/// Expected outcome of running one demo script through the CLI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Testcase {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expect_success: Option<bool>,
    #[serde(default)]
    pub expect_events: Vec<String>,
    #[serde(default)]
    pub expect_logs: Vec<String>,
    #[serde(default)]
    pub expect_error_code: Option<String>,
    #[serde(default)]
    pub expect_error_line: Option<usize>,
    #[serde(default)]
    pub expect_position: Option<ExpectedPose>,
}

fn default_command() -> String {
    "run".to_string()
}

impl Testcase {
    pub fn expects_success(&self) -> bool {
        self.expect_success
            .unwrap_or(self.expect_error_code.is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ExpectedPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

#[derive(Debug, Error)]
pub enum TestcaseError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid testcase {path}: {source}")]
    Invalid {
        path: String,
        source: serde_json::Error,
    },
}

pub fn load_testcase(path: &Path) -> Result<Testcase, TestcaseError> {
    let raw = fs::read_to_string(path).map_err(|source| TestcaseError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| TestcaseError::Invalid {
        path: path.display().to_string(),
        source,
    })
}

/// Names of every script under `scripts/` that ships a testcase, sorted.
pub fn testcase_names() -> Vec<String> {
    let Ok(entries) = fs::read_dir(scripts_root()) else {
        return Vec::new();
    };
    let mut names = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(TESTCASE_SUFFIX))
                .map(str::to_string)
        })
        .collect::<Vec<_>>();
    names.sort();
    names
}
