//! A transport bound to one device serial.
//!
//! [`Device`] wraps any [`CommandTransport`] and prefixes every command with
//! `-s <serial>`, so that commands reach one device even when several are
//! attached.
//!
//! # Example
//!
//! ```no_run
//! use adbpipe_core::command::CommandRunner;
//! use adbpipe_core::device::Device;
//! use adbpipe_core::invocation::InvocationOptions;
//!
//! let device = Device::new(CommandRunner::new("adb"), "emulator-5554");
//! let release = device.shell("getprop ro.build.version.release", &InvocationOptions::default())?;
//! println!("Android {}", release.command_output.trim());
//!
//! for package in device.installed_packages()? {
//!     println!("{package}");
//! }
//! # Ok::<(), adbpipe_core::error::AdbError>(())
//! ```

use crate::command::CommandTransport;
use crate::error::AdbError;
use crate::invocation::{InvocationOptions, InvocationResult, ShellResult};
use crate::shell::ShellSession;

const LIST_PACKAGES_COMMAND: &str = "pm list packages";

/// adb access scoped to a single device.
pub struct Device<T> {
    transport: T,
    serial: String,
}

impl<T: CommandTransport> Device<T> {
    pub fn new(transport: T, serial: impl Into<String>) -> Self {
        Self {
            transport,
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Runs `adb -s <serial> <args...>`.
    pub fn command(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        self.execute(args, options)
    }

    /// Runs `shell_command` on this device and recovers its exit code.
    ///
    /// See [`ShellSession::run`] for how options are applied.
    pub fn shell(&self, shell_command: &str, options: &InvocationOptions) -> Result<ShellResult, AdbError> {
        ShellSession::new(self).run(shell_command, options)
    }

    /// Lists the package ids installed on the device (`pm list packages`).
    pub fn installed_packages(&self) -> Result<Vec<String>, AdbError> {
        self.installed_packages_with(&InvocationOptions::default())
    }

    /// Like [`Device::installed_packages`], under the given options.
    pub fn installed_packages_with(&self, options: &InvocationOptions) -> Result<Vec<String>, AdbError> {
        list_packages(self, options)
    }
}

impl<T: CommandTransport> CommandTransport for Device<T> {
    fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-s".to_string());
        full.push(self.serial.clone());
        full.extend_from_slice(args);
        self.transport.execute(&full, options)
    }
}

/// Runs `pm list packages` through `transport` and returns the package ids.
///
/// Use this when no serial is needed (a single attached device); otherwise
/// go through [`Device::installed_packages_with`].
pub fn list_packages<T: CommandTransport>(transport: T, options: &InvocationOptions) -> Result<Vec<String>, AdbError> {
    let result = ShellSession::new(transport).run(LIST_PACKAGES_COMMAND, options)?;
    Ok(parse_package_list(&result.command_output))
}

/// Extracts package ids from `pm list packages` output.
///
/// Lines look like `package:com.android.settings`; blank lines are skipped.
pub fn parse_package_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .map(|line| line.strip_prefix("package:").unwrap_or(line).trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct RecordingTransport {
        stdout: String,
        args: RefCell<Vec<Vec<String>>>,
    }

    impl RecordingTransport {
        fn new(stdout: &str) -> Self {
            Self {
                stdout: stdout.to_string(),
                args: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandTransport for RecordingTransport {
        fn execute(&self, args: &[String], _options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
            self.args.borrow_mut().push(args.to_vec());
            Ok(InvocationResult {
                exit_status: 0,
                stdout: Some(self.stdout.clone()),
                stderr: Some(String::new()),
            })
        }
    }

    const PM_TRANSCRIPT: &str = concat!(
        "shell@generic:/ $ pm list packages; echo \"\r\r\n",
        "> $?\"; exit 0\r\r\n",
        "package:com.android.settings\r\n",
        "package:com.example.app\r\n",
        "\r\n",
        "0\r\n",
    );

    #[test]
    fn command_is_prefixed_with_serial() {
        let transport = RecordingTransport::new("");
        let device = Device::new(&transport, "emulator-5554");

        device
            .command(&["install".to_string(), "app.apk".to_string()], &InvocationOptions::default())
            .unwrap();

        let args = transport.args.borrow();
        assert_eq!(args[0], vec!["-s", "emulator-5554", "install", "app.apk"]);
    }

    #[test]
    fn shell_goes_through_serial() {
        let transport = RecordingTransport::new(PM_TRANSCRIPT);
        let device = Device::new(&transport, "0123456789ABCDEF");

        let result = device.shell("pm list packages", &InvocationOptions::default()).unwrap();
        assert_eq!(result.exit_code, 0);

        let args = transport.args.borrow();
        assert_eq!(args[0], vec!["-s", "0123456789ABCDEF", "shell"]);
    }

    #[test]
    fn installed_packages_parses_transcript() {
        let transport = RecordingTransport::new(PM_TRANSCRIPT);
        let device = Device::new(&transport, "emulator-5554");

        let packages = device.installed_packages().unwrap();
        assert_eq!(packages, vec!["com.android.settings", "com.example.app"]);
    }

    #[test]
    fn installed_packages_with_forwards_options() {
        struct TimeoutCheck(RecordingTransport);

        impl CommandTransport for TimeoutCheck {
            fn execute(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
                assert_eq!(options.timeout_secs, 42);
                self.0.execute(args, options)
            }
        }

        let transport = TimeoutCheck(RecordingTransport::new(PM_TRANSCRIPT));
        let device = Device::new(&transport, "emulator-5554");

        let options = InvocationOptions::default().with_timeout_secs(42);
        let packages = device.installed_packages_with(&options).unwrap();
        assert_eq!(packages, vec!["com.android.settings", "com.example.app"]);
    }

    #[test]
    fn list_packages_without_serial() {
        let transport = RecordingTransport::new(PM_TRANSCRIPT);

        let packages = list_packages(&transport, &InvocationOptions::default()).unwrap();
        assert_eq!(packages, vec!["com.android.settings", "com.example.app"]);
        assert_eq!(transport.args.borrow()[0], vec!["shell"]);
    }

    #[test]
    fn parse_package_list_handles_line_endings() {
        let output = "package:a.b\npackage:c.d\r\n\r\n";
        assert_eq!(parse_package_list(output), vec!["a.b", "c.d"]);
    }

    #[test]
    fn parse_package_list_empty() {
        assert!(parse_package_list("").is_empty());
        assert!(parse_package_list("\r\n").is_empty());
    }

    #[test]
    fn serial_accessor() {
        let device = Device::new(RecordingTransport::new(""), "abc");
        assert_eq!(device.serial(), "abc");
    }
}
