//! Exit-status recovery for commands run through `adb shell`.
//!
//! Legacy `adb shell` sessions run over a PTY that echoes whatever is typed
//! and has no channel for the remote command's exit status. [`ShellSession`]
//! works around both quirks:
//!
//! 1. The command is submitted as `<cmd>; echo "\n$?"; exit 0`
//!    ([`SHELL_SENTINEL`]), so the shell prints the status on its own line
//!    and then ends the session.
//! 2. In the transcript, the echo of the submitted line ends with
//!    [`BOUNDARY_MARKER`]; everything after it is real output.
//! 3. The last output line is the status; the lines before it are the
//!    command's output.
//!
//! A transcript for `getprop ro.build.version.release` looks like:
//!
//! ```text
//! getprop ro.build.version.release; echo "\r\n
//! $?"; exit 0\r\n
//! shell@hammerhead:/ $ getprop ro.build.version.release; echo "\r\r\n
//! > $?"; exit 0\r\r\n          <- boundary
//! 4.4\r\n                      <- command output
//! \r\n                         <- command output (from the echo's leading newline)
//! 0\r\n                        <- exit status
//! ```
//!
//! The doubled `\r\r\n` comes from this particular remote shell's line
//! discipline. A different remote shell needs its boundary re-derived.

use tracing::debug;

use crate::command::CommandTransport;
use crate::error::{first_line_summary, AdbError, ExitOrigin, SUMMARY_MAX_CHARS};
use crate::invocation::{InvocationOptions, ShellResult};

/// Appended to every shell command: prints `$?` on a fresh line, then exits.
pub const SHELL_SENTINEL: &str = "; echo \"\n$?\"; exit 0";

/// Suffix of the transcript line where the echoed input ends.
pub const BOUNDARY_MARKER: &str = "; exit 0\r\r\n";

/// Builds the line submitted to the remote shell for `shell_command`.
pub fn shell_input_line(shell_command: &str) -> String {
    format!("{shell_command}{SHELL_SENTINEL}")
}

/// Runs single commands in `adb shell` and recovers their exit codes.
pub struct ShellSession<T> {
    transport: T,
}

impl<T: CommandTransport> ShellSession<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Runs `shell_command` on the device.
    ///
    /// `options.timeout_secs` bounds the whole session. `options.input` is
    /// replaced by the sentinel-wrapped command, and `options.no_read` is
    /// ignored because the transcript is always needed.
    /// `options.no_exit_code_check` applies to the remote command's status
    /// only; a failing adb process is always an error.
    ///
    /// # Errors
    ///
    /// - any error from the transport (timeout, broken pipe, adb failure)
    /// - [`AdbError::ProtocolParse`] if the transcript has no boundary or no
    ///   valid status line
    /// - [`AdbError::NonZeroExit`] if the command exits non-zero and
    ///   `no_exit_code_check` is unset
    pub fn run(&self, shell_command: &str, options: &InvocationOptions) -> Result<ShellResult, AdbError> {
        if options.no_read {
            debug!("no_read is ignored for shell sessions");
        }

        let transport_options = InvocationOptions {
            timeout_secs: options.timeout_secs,
            input: vec![shell_input_line(shell_command)],
            no_read: false,
            no_exit_code_check: false,
        };

        let result = self.transport.execute(&["shell".to_string()], &transport_options)?;
        let transcript = result.stdout.unwrap_or_default();
        parse_transcript(&transcript, !options.no_exit_code_check)
    }
}

enum Scan {
    AwaitingBoundary,
    AwaitingStatus,
}

/// Removes one trailing line ending (`\r\n`, `\n` or `\r`).
fn chomp(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .or_else(|| line.strip_suffix('\r'))
        .unwrap_or(line)
}

/// Parses a status line, accepting only the canonical decimal form.
fn parse_status(line: &str) -> Option<i32> {
    let text = chomp(line);
    let code: u32 = text.parse().ok()?;
    if code.to_string() != text {
        return None;
    }
    i32::try_from(code).ok()
}

fn protocol_error(reason: impl Into<String>, transcript: &str) -> AdbError {
    AdbError::ProtocolParse {
        reason: reason.into(),
        transcript: transcript.to_string(),
    }
}

/// Splits a shell transcript into command output and exit code.
///
/// The first line ending in [`BOUNDARY_MARKER`] separates echoed input from
/// output. When `check_exit_code` is set, a non-zero status is returned as
/// [`AdbError::NonZeroExit`].
pub fn parse_transcript(transcript: &str, check_exit_code: bool) -> Result<ShellResult, AdbError> {
    let mut scan = Scan::AwaitingBoundary;
    let mut output: Vec<&str> = Vec::new();

    for line in transcript.split_inclusive('\n') {
        match scan {
            Scan::AwaitingBoundary => {
                if line.ends_with(BOUNDARY_MARKER) {
                    scan = Scan::AwaitingStatus;
                }
            }
            Scan::AwaitingStatus => output.push(line),
        }
    }

    if let Scan::AwaitingBoundary = scan {
        return Err(protocol_error("no line marks the end of the echoed command", transcript));
    }

    let Some((status_line, command_lines)) = output.split_last() else {
        return Err(protocol_error("no exit status after the echoed command", transcript));
    };

    let exit_code = parse_status(status_line).ok_or_else(|| {
        protocol_error(format!("Unable to obtain exit code. Result: '{status_line}'"), transcript)
    })?;
    let command_output = command_lines.concat();

    if check_exit_code && exit_code != 0 {
        debug!(exit_code, output = %command_output, "adb shell command exited with non-zero status");
        return Err(AdbError::NonZeroExit {
            origin: ExitOrigin::Shell,
            code: exit_code,
            summary: first_line_summary(&command_output, SUMMARY_MAX_CHARS),
            stdout: Some(command_output),
            stderr: None,
        });
    }

    Ok(ShellResult {
        command_output,
        exit_code,
    })
}
