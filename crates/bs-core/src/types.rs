use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
}

impl SourceLocation {
    pub fn new(line: usize) -> Self {
        Self { line }
    }

    /// Extracts the first `:<line>:` marker from an evaluator diagnostic such as
    /// `[string "<src>"]:3: unexpected symbol near 'x'`.
    pub fn from_diagnostic(message: &str) -> Option<Self> {
        static LINE_MARKER: OnceLock<Regex> = OnceLock::new();
        let pattern = LINE_MARKER
            .get_or_init(|| Regex::new(r":(\d+):").expect("line marker regex should compile"));
        let captures = pattern.captures(message)?;
        let line = captures.get(1)?.as_str().parse().ok()?;
        Some(Self { line })
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}", self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    Stopped,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
