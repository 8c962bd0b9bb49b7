//! Spawning a single external process under a hard deadline.
//!
//! [`ProcessInvoker::run`] is the lowest layer of the invocation stack. It
//! starts one child from an explicit argument vector (never a shell string),
//! hands its three standard streams to a caller-supplied closure, and then
//! collects the exit status.
//!
//! Two guards own the resources for the duration of the call:
//!
//! - `ProcessHandle` owns the child and its pipes. Dropping it closes every
//!   stream that is still open, kills the child if it is still running, and
//!   reaps it.
//! - `Watchdog` owns a timer thread that force-kills the child once the
//!   deadline passes. Dropping it disarms the timer and joins the thread.
//!
//! On unix the child leads its own process group, and kills go to the whole
//! group. Anything the child forked dies with it, so no descendant can keep
//! the output pipes open past the deadline.
//!
//! Because cleanup lives in `Drop`, it runs on every exit path: normal
//! return, an error from the closure, a panic, or a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::io::Read;
//! use std::time::Duration;
//! use adbpipe_core::process::ProcessInvoker;
//!
//! let command = vec!["adb".to_string(), "version".to_string()];
//! let (status, out) = ProcessInvoker::run(&command, Duration::from_secs(5), |streams| {
//!     streams.close_stdin();
//!     let mut out = String::new();
//!     if let Some(stdout) = streams.stdout.as_mut() {
//!         stdout.read_to_string(&mut out)?;
//!     }
//!     Ok(out)
//! })?;
//! println!("{status}: {out}");
//! # Ok::<(), adbpipe_core::error::AdbError>(())
//! ```

use std::ffi::OsStr;
use std::io;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::AdbError;

/// How often the waiting thread checks whether the child has exited.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The standard streams of a running child.
///
/// Each stream is an `Option` so it can be closed (taken and dropped) at
/// most once, either by the caller or by the invoker's cleanup.
pub struct ProcessStreams {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl ProcessStreams {
    fn take_from(child: &mut Child) -> Self {
        Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        }
    }

    /// Closes stdin so the child sees end-of-input.
    pub fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    /// Closes every stream that is still open.
    pub fn close_all(&mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Converts an exit status to an integer, mapping signal deaths to `128 + n`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Sends `SIGKILL` to every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_group(pgid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: killpg takes no pointers and only signals the given group.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Kills the child and, on unix, everything left in its process group.
///
/// Returns whether anything was still running. A leader that already exited
/// is reaped first, so the group kill only finds stray descendants.
fn terminate(child: &mut Child, pid: u32) -> bool {
    let leader_exited = matches!(child.try_wait(), Ok(Some(_)));

    #[cfg(unix)]
    let killed = match kill_group(pid) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, leader_exited, error = %e, "no process left in group");
            false
        }
    };

    #[cfg(not(unix))]
    let killed = !leader_exited
        && match child.kill() {
            Ok(()) => true,
            Err(e) => {
                debug!(pid, error = %e, "kill was a no-op");
                false
            }
        };

    killed
}

/// Exclusive owner of one spawned child and its pipes.
struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    streams: ProcessStreams,
    pid: u32,
    reaped: bool,
}

impl ProcessHandle {
    fn spawn<S: AsRef<OsStr>>(command: &[S]) -> Result<Self, AdbError> {
        let (program, args) = command.split_first().ok_or(AdbError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;

        let pid = child.id();
        debug!(pid, program = ?program.as_ref(), "spawned process");

        let streams = ProcessStreams::take_from(&mut child);
        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            streams,
            pid,
            reaped: false,
        })
    }

    /// Blocks until the child exits.
    ///
    /// The lock is only held for each `try_wait`, so the watchdog can always
    /// get in to kill the child; that kill is what bounds this loop.
    fn wait(&mut self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = lock(&self.child).try_wait()? {
                self.reaped = true;
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        let mut child = lock(&self.child);
        terminate(&mut child, self.pid);
        if let Err(e) = child.wait() {
            warn!(pid = self.pid, error = %e, "failed to reap process");
        }
        self.reaped = true;
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.streams.close_all();
        self.kill_and_reap();
    }
}

/// Timer thread that kills the child's process group once the deadline passes.
///
/// The group is killed even when the child itself already exited, since a
/// descendant holding the pipes keeps the call from finishing.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(child: Arc<Mutex<Child>>, pid: u32, timeout: Duration) -> io::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let thread = thread::Builder::new()
            .name(format!("adb-watchdog-{pid}"))
            .spawn(move || {
                // A dropped sender means the call finished first.
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    let mut child = lock(&child);
                    if terminate(&mut child, pid) {
                        warn!(pid, timeout_secs = timeout.as_secs(), "process did not exit in time, killed");
                        flag.store(true, Ordering::SeqCst);
                    } else {
                        debug!(pid, "process exited at the deadline, nothing to kill");
                    }
                }
            })?;

        Ok(Self {
            cancel: Some(cancel),
            thread: Some(thread),
            fired: Arc::clone(&fired),
        })
    }

    /// Stops the timer and reports whether it killed the child.
    fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs one external process under a deadline.
pub struct ProcessInvoker;

impl ProcessInvoker {
    /// Spawns `command`, lets `on_streams` drive its standard streams, and
    /// waits for it to exit.
    ///
    /// `command[0]` is the executable; the rest are passed verbatim as
    /// arguments. The deadline covers both `on_streams` and the final wait.
    ///
    /// # Returns
    ///
    /// The exit status (signal deaths are `128 + signal`) and the value
    /// produced by `on_streams`.
    ///
    /// # Errors
    ///
    /// - [`AdbError::EmptyCommand`] if `command` is empty
    /// - [`AdbError::ProcessTimeout`] if the deadline passed and the process
    ///   was killed; this takes precedence over any error from `on_streams`
    /// - [`AdbError::Io`] if spawning or waiting fails
    /// - any error returned by `on_streams`
    pub fn run<S, T, F>(command: &[S], timeout: Duration, on_streams: F) -> Result<(i32, T), AdbError>
    where
        S: AsRef<OsStr>,
        F: FnOnce(&mut ProcessStreams) -> Result<T, AdbError>,
    {
        let mut handle = ProcessHandle::spawn(command)?;
        let watchdog = Watchdog::arm(Arc::clone(&handle.child), handle.pid, timeout)?;

        let outcome = on_streams(&mut handle.streams);
        handle.streams.close_all();

        let finished = match outcome {
            Ok(value) => handle
                .wait()
                .map(|status| (status, value))
                .map_err(AdbError::from),
            Err(e) => {
                handle.kill_and_reap();
                Err(e)
            }
        };

        if watchdog.disarm() {
            return Err(AdbError::ProcessTimeout { timeout });
        }

        let (status, value) = finished?;
        let code = exit_code(status);
        debug!(pid = handle.pid, code, "process exited");
        Ok((code, value))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Read;
    use std::time::Instant;

    use super::*;
    use crate::error::ErrorKind;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn read_stdout(streams: &mut ProcessStreams) -> Result<String, AdbError> {
        let mut out = String::new();
        if let Some(stdout) = streams.stdout.as_mut() {
            stdout.read_to_string(&mut out)?;
        }
        Ok(out)
    }

    #[test]
    fn returns_exit_status() {
        let (code, ()) = ProcessInvoker::run(&sh("exit 3"), Duration::from_secs(5), |_| Ok(())).unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn passes_streams_to_closure() {
        let (code, out) = ProcessInvoker::run(&sh("echo hello"), Duration::from_secs(5), read_stdout).unwrap();
        assert_eq!(code, 0);
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn arguments_are_not_shell_interpolated() {
        let command = vec!["/bin/echo".to_string(), "$HOME; rm -rf /".to_string()];
        let (_, out) = ProcessInvoker::run(&command, Duration::from_secs(5), read_stdout).unwrap();
        assert_eq!(out, "$HOME; rm -rf /\n");
    }

    #[test]
    fn signal_death_maps_to_shell_convention() {
        let (code, ()) = ProcessInvoker::run(&sh("kill -9 $$"), Duration::from_secs(5), |_| Ok(())).unwrap();
        assert_eq!(code, 137);
    }

    #[test]
    fn timeout_kills_process() {
        let start = Instant::now();
        let result = ProcessInvoker::run(&sh("exec sleep 30"), Duration::from_secs(1), read_stdout);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessTimeout);
        assert!(start.elapsed() < Duration::from_secs(10), "watchdog should cut the wait short");
    }

    #[test]
    fn timeout_bounds_read_held_open_by_descendant() {
        // `sleep` inherits stdout, so reading to EOF waits on it, not just on `sh`.
        let start = Instant::now();
        let result = ProcessInvoker::run(&sh("sleep 6; echo done"), Duration::from_secs(1), read_stdout);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ProcessTimeout);
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    }

    #[test]
    fn timeout_after_leader_exits_kills_descendant() {
        let start = Instant::now();
        let result = ProcessInvoker::run(&sh("sleep 6 & exit 0"), Duration::from_secs(1), read_stdout);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ProcessTimeout);
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
    }

    #[test]
    fn timeout_wins_over_closure_error() {
        let result: Result<(i32, ()), _> = ProcessInvoker::run(&sh("exec sleep 30"), Duration::from_secs(1), |streams| {
            read_stdout(streams)?;
            Err(AdbError::Io(io::Error::new(io::ErrorKind::Other, "reader gave up")))
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ProcessTimeout);
    }

    #[test]
    fn closure_error_kills_and_propagates() {
        let start = Instant::now();
        let result: Result<(i32, ()), _> = ProcessInvoker::run(&sh("exec sleep 30"), Duration::from_secs(20), |_| {
            Err(AdbError::Io(io::Error::new(io::ErrorKind::Other, "boom")))
        });

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("boom"));
        assert!(start.elapsed() < Duration::from_secs(10), "child should be killed, not awaited");
    }

    #[test]
    fn empty_command_is_rejected() {
        let command: Vec<String> = Vec::new();
        let result = ProcessInvoker::run(&command, Duration::from_secs(1), |_| Ok(()));
        assert!(matches!(result, Err(AdbError::EmptyCommand)));
    }

    #[test]
    fn missing_executable_is_io_error() {
        let command = vec!["/nonexistent/adb-binary".to_string()];
        let result = ProcessInvoker::run(&command, Duration::from_secs(1), |_| Ok(()));
        match result {
            Err(AdbError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("Expected Io error, got: {:?}", other.map(|(code, _)| code)),
        }
    }

    #[test]
    fn closure_may_close_streams_itself() {
        let (code, ()) = ProcessInvoker::run(&sh("cat"), Duration::from_secs(5), |streams| {
            streams.close_all();
            streams.close_all();
            Ok(())
        })
        .unwrap();
        assert_eq!(code, 0);
    }
}
