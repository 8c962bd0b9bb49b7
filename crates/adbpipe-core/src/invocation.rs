//! Options and result values for a single adb invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time budget for one invocation, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Per-call options.
///
/// Deserialization rejects unknown keys, so a misspelled option in a JSON
/// document is an error rather than a silently ignored setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvocationOptions {
    /// Seconds to wait for the process before killing it.
    pub timeout_secs: u64,
    /// Lines written to the process's stdin, in order, before EOF.
    pub input: Vec<String>,
    /// Skip draining stdout/stderr (fire-and-forget invocations).
    pub no_read: bool,
    /// Return non-zero statuses as results instead of errors.
    pub no_exit_code_check: bool,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            input: Vec::new(),
            no_read: false,
            no_exit_code_check: false,
        }
    }
}

impl InvocationOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_input<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn no_read(mut self) -> Self {
        self.no_read = true;
        self
    }

    pub fn no_exit_code_check(mut self) -> Self {
        self.no_exit_code_check = true;
        self
    }
}

/// Outcome of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Exit status of the process. Signal deaths are reported as `128 + signal`.
    pub exit_status: i32,
    /// Captured stdout with the daemon banner removed; `None` when not read.
    pub stdout: Option<String>,
    /// Captured stderr; `None` when not read.
    pub stderr: Option<String>,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Output and exit code of a command run through `adb shell`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellResult {
    pub command_output: String,
    pub exit_code: i32,
}
