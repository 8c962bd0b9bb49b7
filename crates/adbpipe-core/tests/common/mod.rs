//! Shared test helpers for adbpipe-core integration tests.
//!
//! [`FakeAdb`] writes a small shell script that stands in for the adb
//! executable: it records its arguments and stdin, prints canned stdout and
//! stderr, and exits with a chosen status.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use adbpipe_core::command::CommandRunner;

pub struct FakeAdb {
    dir: TempDir,
    path: PathBuf,
}

impl FakeAdb {
    /// A fake adb that prints `stdout`/`stderr` verbatim and exits with `exit_code`.
    pub fn new(stdout: &str, stderr: &str, exit_code: i32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout"), stdout).unwrap();
        std::fs::write(dir.path().join("stderr"), stderr).unwrap();

        let script = format!(
            "#!/bin/sh\n\
             dir='{dir}'\n\
             printf '%s\\n' \"$@\" > \"$dir/args\"\n\
             cat > \"$dir/stdin\"\n\
             cat \"$dir/stdout\"\n\
             cat \"$dir/stderr\" >&2\n\
             exit {exit_code}\n",
            dir = dir.path().display(),
        );
        let path = dir.path().join("adb");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { dir, path }
    }

    /// A fake `adb shell` session that answers with `transcript`.
    pub fn shell(transcript: &str) -> Self {
        Self::new(transcript, "", 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(&self.path)
    }

    /// Arguments the fake received, one per element.
    pub fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("args"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Everything written to the fake's stdin.
    pub fn recorded_stdin(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("stdin")).unwrap()
    }
}

/// A transcript as produced by a legacy `adb shell` PTY for `command`,
/// followed by `output` lines.
pub fn shell_transcript(command: &str, output: &[&str]) -> String {
    let mut text = format!(
        "{command}; echo \"\r\n$?\"; exit 0\r\n\
         shell@generic:/ $ {command}; echo \"\r\r\n> $?\"; exit 0\r\r\n"
    );
    for line in output {
        text.push_str(line);
    }
    text
}

/// Whether a process with `pid` is still running.
///
/// A zombie counts as gone: it has exited and only waits for its new parent
/// to reap it.
pub fn process_alive(pid: u32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state follows the parenthesised command name.
        let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.trim_start().chars().next());
        return !matches!(state, Some('Z') | Some('X'));
    }
    if std::path::Path::new("/proc/self").exists() {
        return false;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Polls until `pid` is gone or `within` elapses.
pub fn process_gone_within(pid: u32, within: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + within;
    while process_alive(pid) {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    true
}

/// Reads a pid written by a test script, waiting for the file to appear.
pub fn read_pid_file(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    panic!("no pid written to {}", path.display());
}
