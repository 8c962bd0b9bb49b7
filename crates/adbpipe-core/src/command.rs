//! Running adb commands and classifying their results.
//!
//! [`CommandRunner`] is a stateless service object holding the path of the
//! adb executable and the tracing span its calls are logged under. Each call
//! to [`CommandRunner::execute`] spawns exactly one adb process through
//! [`ProcessInvoker`]. The call then:
//!
//! 1. writes the requested input lines to stdin, then closes it (adb may wait
//!    for EOF before producing output);
//! 2. drains stdout and stderr concurrently;
//! 3. strips the daemon startup banner from stdout;
//! 4. turns a non-zero exit status into [`AdbError::NonZeroExit`].
//!
//! # Example
//!
//! ```no_run
//! use adbpipe_core::command::CommandRunner;
//! use adbpipe_core::invocation::InvocationOptions;
//!
//! let adb = CommandRunner::new("adb");
//! let result = adb.execute(&["devices".to_string()], &InvocationOptions::default())?;
//! print!("{}", result.stdout.unwrap_or_default());
//! # Ok::<(), adbpipe_core::error::AdbError>(())
//! ```

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdin;
use std::thread;

use tracing::{debug, debug_span, Span};

use crate::error::{first_line_summary, AdbError, ExitOrigin, SUMMARY_MAX_CHARS};
use crate::invocation::{InvocationOptions, InvocationResult};
use crate::process::{ProcessInvoker, ProcessStreams};

/// Printed by adb on stdout when it had to start its background server first.
pub const DAEMON_STARTED_BANNER: &str =
    "* daemon not running. starting it now on port 5037 *\n* daemon started successfully *\n";

/// Something that can run an adb command line and report its result.
///
/// [`CommandRunner`] is the real implementation; [`crate::shell::ShellSession`]
/// and [`crate::device::Device`] are written against this trait so they can
/// be layered on each other and exercised with canned output.
pub trait CommandTransport {
    /// Runs adb with `args` (the executable is supplied by the transport).
    fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError>;
}

impl<T: CommandTransport + ?Sized> CommandTransport for &T {
    fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        (**self).execute(args, options)
    }
}

/// Runs adb commands with timeouts, input and output capture.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    adb_path: PathBuf,
    span: Span,
}

impl CommandRunner {
    /// Creates a runner for the adb executable at `adb_path`.
    ///
    /// A bare name such as `"adb"` is resolved through `PATH` at spawn time.
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        let adb_path = adb_path.into();
        let span = debug_span!("adb", path = %adb_path.display());
        Self { adb_path, span }
    }

    /// Creates a runner whose calls are logged under `span`.
    pub fn with_span(adb_path: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            adb_path: adb_path.into(),
            span,
        }
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    /// Runs `adb <args...>`.
    ///
    /// # Errors
    ///
    /// - [`AdbError::ProcessTimeout`] if adb does not exit within `options.timeout_secs`
    /// - [`AdbError::BrokenPipe`] if adb closed stdin before all input was written
    /// - [`AdbError::NonZeroExit`] if adb exits non-zero and `no_exit_code_check` is unset
    /// - [`AdbError::Io`] if adb cannot be spawned or its streams fail
    pub fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        let _entered = self.span.enter();
        debug!(command = %args.join(" "), input = ?options.input, "adb command");

        let mut command: Vec<OsString> = Vec::with_capacity(args.len() + 1);
        command.push(self.adb_path.clone().into_os_string());
        command.extend(args.iter().map(OsString::from));

        let (exit_status, captured) = ProcessInvoker::run(&command, options.timeout(), |streams| {
            write_input(streams, &options.input)?;
            streams.close_stdin();

            if options.no_read {
                return Ok(None);
            }
            Ok(Some(drain(streams).into_result()?))
        })?;

        let (stdout, stderr) = match captured {
            Some((stdout, stderr)) => (Some(strip_daemon_banner(stdout)), Some(stderr)),
            None => (None, None),
        };

        if exit_status != 0 {
            debug!(exit_status, stderr = stderr.as_deref().unwrap_or(""), "adb process exited with non-zero status");

            if !options.no_exit_code_check {
                let summary = first_line_summary(stderr.as_deref().unwrap_or(""), SUMMARY_MAX_CHARS);
                return Err(AdbError::NonZeroExit {
                    origin: ExitOrigin::Process,
                    code: exit_status,
                    summary,
                    stdout,
                    stderr,
                });
            }
        }

        Ok(InvocationResult {
            exit_status,
            stdout,
            stderr,
        })
    }
}

impl CommandTransport for CommandRunner {
    fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        CommandRunner::execute(self, args, options)
    }
}

/// Removes [`DAEMON_STARTED_BANNER`] from the start of `stdout`, if present.
pub fn strip_daemon_banner(stdout: String) -> String {
    match stdout.strip_prefix(DAEMON_STARTED_BANNER) {
        Some(rest) => rest.to_string(),
        None => stdout,
    }
}

fn write_line(stdin: &mut ChildStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes())?;
    if !line.ends_with('\n') {
        stdin.write_all(b"\n")?;
    }
    stdin.flush()
}

/// Writes `input` to stdin line by line.
///
/// On a broken pipe the remaining lines are dropped, stdin is closed, and
/// whatever the process already printed is attached to the error.
fn write_input(streams: &mut ProcessStreams, input: &[String]) -> Result<(), AdbError> {
    let Some(stdin) = streams.stdin.as_mut() else {
        return Ok(());
    };

    for line in input {
        if let Err(e) = write_line(stdin, line) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
            streams.close_stdin();
            let drained = drain(streams);
            if let Some(read_error) = &drained.error {
                debug!(error = %read_error, "output after broken pipe may be incomplete");
            }
            debug!(stderr = %drained.stderr, "adb closed stdin before all input was written");
            return Err(AdbError::BrokenPipe {
                source: e,
                stdout: strip_daemon_banner(drained.stdout),
                stderr: drained.stderr,
            });
        }
    }
    Ok(())
}

/// Reads `stream` to EOF. Bytes read before an error are kept.
fn read_lossy<R: Read>(stream: Option<R>) -> (String, io::Result<()>) {
    let mut buf = Vec::new();
    let status = match stream {
        Some(mut stream) => stream.read_to_end(&mut buf).map(drop),
        None => Ok(()),
    };
    (String::from_utf8_lossy(&buf).into_owned(), status)
}

/// Output drained from a child, with the first read error if any.
struct Drained {
    stdout: String,
    stderr: String,
    error: Option<io::Error>,
}

impl Drained {
    fn into_result(self) -> io::Result<(String, String)> {
        match self.error {
            Some(e) => Err(e),
            None => Ok((self.stdout, self.stderr)),
        }
    }
}

/// Reads stdout and stderr to EOF, closing both.
///
/// stdout is read on a scoped thread so a chatty process cannot stall on a
/// full stderr pipe (or vice versa).
fn drain(streams: &mut ProcessStreams) -> Drained {
    let stdout = streams.stdout.take();
    let stderr = streams.stderr.take();

    thread::scope(|scope| {
        let stdout_reader = scope.spawn(move || read_lossy(stdout));
        let (stderr, stderr_status) = read_lossy(stderr);
        let (stdout, stdout_status) = stdout_reader.join().unwrap_or_else(|_| {
            (String::new(), Err(io::Error::new(io::ErrorKind::Other, "stdout reader panicked")))
        });
        Drained {
            stdout,
            stderr,
            error: stdout_status.and(stderr_status).err(),
        }
    })
}
