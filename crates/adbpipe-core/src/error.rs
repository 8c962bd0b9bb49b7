//! Error type shared by every layer of the adb invocation stack.
//!
//! All failures surface as a single [`AdbError`]. Variants that happen after
//! the process produced output carry what was captured so callers can
//! diagnose the failure without re-running the command.

use std::time::Duration;

use thiserror::Error;

/// Maximum length of the one-line summary attached to [`AdbError::NonZeroExit`].
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Coarse classification of an [`AdbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProcessTimeout,
    BrokenPipe,
    NonZeroExit,
    ProtocolParse,
    EmptyCommand,
    Io,
}

/// Errors that can occur while invoking adb.
#[derive(Error, Debug)]
pub enum AdbError {
    /// The process did not exit within its time budget and was killed.
    #[error("Process did not exit within {}s", .timeout.as_secs())]
    ProcessTimeout { timeout: Duration },

    /// Writing to the process's stdin failed because it closed its end.
    #[error("Broken pipe while writing input: {source}")]
    BrokenPipe {
        #[source]
        source: std::io::Error,
        stdout: String,
        stderr: String,
    },

    /// The process (or the remote shell command) reported a non-zero status.
    #[error("{origin} exited with {code}: {summary}")]
    NonZeroExit {
        origin: ExitOrigin,
        code: i32,
        summary: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    /// A shell transcript could not be split into output and exit status.
    #[error("Could not parse shell output: {reason}")]
    ProtocolParse { reason: String, transcript: String },

    /// The command vector had no executable.
    #[error("Empty command line")]
    EmptyCommand,

    /// An I/O error occurred while spawning or talking to the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which layer observed a non-zero exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOrigin {
    /// The adb process itself.
    Process,
    /// The command run inside `adb shell`.
    Shell,
}

impl std::fmt::Display for ExitOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOrigin::Process => write!(f, "Adb process"),
            ExitOrigin::Shell => write!(f, "Adb shell command"),
        }
    }
}

impl AdbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdbError::ProcessTimeout { .. } => ErrorKind::ProcessTimeout,
            AdbError::BrokenPipe { .. } => ErrorKind::BrokenPipe,
            AdbError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            AdbError::ProtocolParse { .. } => ErrorKind::ProtocolParse,
            AdbError::EmptyCommand => ErrorKind::EmptyCommand,
            AdbError::Io(_) => ErrorKind::Io,
        }
    }

    /// Standard output captured before the failure, if any.
    ///
    /// For [`AdbError::ProtocolParse`] this is the raw shell transcript.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            AdbError::BrokenPipe { stdout, .. } => Some(stdout.as_str()),
            AdbError::NonZeroExit { stdout, .. } => stdout.as_deref(),
            AdbError::ProtocolParse { transcript, .. } => Some(transcript.as_str()),
            _ => None,
        }
    }

    /// Standard error captured before the failure, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            AdbError::BrokenPipe { stderr, .. } => Some(stderr.as_str()),
            AdbError::NonZeroExit { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    /// The exit status carried by [`AdbError::NonZeroExit`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AdbError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Builds the diagnostic summary for a failed command: the first line of
/// `text`, cut to `max` characters with a trailing `...` when longer.
pub fn first_line_summary(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let head: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        line.to_string()
    }
}
