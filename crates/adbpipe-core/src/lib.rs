//! # adbpipe-core
//!
//! Core library for driving Android devices through the `adb` executable.
//!
//! Every call spawns one adb process from an explicit argument vector. The
//! call enforces a hard timeout and always closes and reaps the process
//! before returning. The result is typed: an exit status with captured
//! output, or, for `adb shell`, the remote command's output and exit code.
//!
//! ## Modules
//!
//! - [`process`] - Spawns a process under a watchdog deadline with guaranteed cleanup
//! - [`command`] - Runs adb commands: input, output capture, banner stripping, exit checks
//! - [`shell`] - Recovers remote exit codes from `adb shell` transcripts
//! - [`device`] - Scopes commands to one device serial
//! - [`invocation`] - Per-call options and result types
//! - [`config`] - Persistent configuration and adb path resolution
//! - [`error`] - The shared [`error::AdbError`] type
//!
//! ## External Dependencies
//!
//! The Android SDK platform tools (`adb`) must be installed. The executable
//! is found through the config file, `$ANDROID_HOME/platform-tools`, or
//! `PATH`.
//!
//! ## Example
//!
//! ```no_run
//! use adbpipe_core::command::CommandRunner;
//! use adbpipe_core::invocation::InvocationOptions;
//! use adbpipe_core::shell::ShellSession;
//!
//! let adb = CommandRunner::new("adb");
//! let shell = ShellSession::new(&adb);
//!
//! let result = shell.run("getprop ro.product.model", &InvocationOptions::default())?;
//! println!("{} (exit {})", result.command_output.trim(), result.exit_code);
//! # Ok::<(), adbpipe_core::error::AdbError>(())
//! ```

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod invocation;
pub mod process;
pub mod shell;
