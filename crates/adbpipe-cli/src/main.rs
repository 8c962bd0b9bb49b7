//! CLI for running adb commands with timeouts and reliable exit codes.
//!
//! # Usage
//!
//! ```bash
//! # Run an adb command (arguments after `--` go to adb verbatim)
//! adbpipe exec -- devices -l
//!
//! # Feed lines to adb's stdin
//! adbpipe exec --input "ls /sdcard" --input "exit" -- shell
//!
//! # Run a shell command on a device and exit with its status
//! adbpipe -s emulator-5554 shell "getprop ro.build.version.release"
//!
//! # Report the remote status instead of failing on it
//! adbpipe shell "ls /data" --no-exit-code-check
//!
//! # List installed packages as JSON
//! adbpipe -f json packages
//!
//! # Remember where adb lives
//! adbpipe config set-adb ~/Android/Sdk/platform-tools/adb
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use adbpipe_core::command::CommandRunner;
use adbpipe_core::config::{AdbConfig, ConfigError};
use adbpipe_core::device::{list_packages, Device};
use adbpipe_core::error::{AdbError, ErrorKind};
use adbpipe_core::invocation::{InvocationOptions, InvocationResult, ShellResult, DEFAULT_TIMEOUT_SECS};
use adbpipe_core::shell::ShellSession;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Run adb commands with timeouts and reliable exit codes.
#[derive(Parser)]
#[command(name = "adbpipe")]
#[command(about = "Run adb commands with timeouts and reliable exit codes")]
#[command(version)]
struct Cli {
    /// Path to the adb executable
    #[arg(long, env = "ADBPIPE_ADB")]
    adb: Option<PathBuf>,

    /// Serial of the device to target
    #[arg(short, long, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// Seconds to wait for each adb invocation
    #[arg(short, long, env = "ADBPIPE_TIMEOUT")]
    timeout: Option<u64>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run adb with the given arguments
    Exec {
        /// Line to write to adb's stdin (repeatable)
        #[arg(short, long = "input")]
        input: Vec<String>,
        /// Don't capture adb's output
        #[arg(long)]
        no_read: bool,
        /// Exit with adb's status instead of failing on non-zero
        #[arg(long)]
        no_exit_code_check: bool,
        /// Arguments passed to adb
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a command in `adb shell` and recover its exit code
    Shell {
        /// The shell command line
        command: String,
        /// Exit with the remote status instead of failing on non-zero
        #[arg(long)]
        no_exit_code_check: bool,
    },

    /// List packages installed on the device
    Packages,

    /// Show or change the persistent configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration and the resolved adb path
    Show,
    /// Record the path of the adb executable
    SetAdb {
        /// Path to adb
        path: PathBuf,
    },
}

#[derive(Debug)]
enum CliError {
    CommandFailed(String),
    Transport(String),
    Protocol(String),
    Timeout(String),
    Config(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::CommandFailed(_) => ExitCode::from(1),
            CliError::Transport(_) => ExitCode::from(2),
            CliError::Protocol(_) => ExitCode::from(3),
            CliError::Timeout(_) => ExitCode::from(4),
            CliError::Config(_) => ExitCode::from(5),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::CommandFailed(msg) => write!(f, "Command failed: {}", msg),
            CliError::Transport(msg) => write!(f, "Transport error: {}", msg),
            CliError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl From<AdbError> for CliError {
    fn from(e: AdbError) -> Self {
        let msg = e.to_string();
        match e.kind() {
            ErrorKind::NonZeroExit => CliError::CommandFailed(msg),
            ErrorKind::ProtocolParse => CliError::Protocol(msg),
            ErrorKind::ProcessTimeout => CliError::Timeout(msg),
            ErrorKind::BrokenPipe | ErrorKind::EmptyCommand | ErrorKind::Io => CliError::Transport(msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

fn init_logging(log_file: Option<&Path>) {
    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| OsStr::new("adbpipe.log"));
            let file_appender = tracing_appender::rolling::never(dir, name);
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
                )
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Everything an adb call needs, resolved from flags, environment and config.
struct Target {
    runner: CommandRunner,
    serial: Option<String>,
    options: InvocationOptions,
}

impl Target {
    fn resolve(cli: &Cli, config: &AdbConfig) -> Self {
        let adb_path = cli.adb.clone().unwrap_or_else(|| config.resolve_adb_path());
        let timeout = cli.timeout.or(config.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS);
        let serial = cli.serial.clone().or_else(|| config.serial.clone());
        debug!(adb = %adb_path.display(), ?serial, timeout, "resolved adb target");

        Self {
            runner: CommandRunner::new(adb_path),
            serial,
            options: InvocationOptions::default().with_timeout_secs(timeout),
        }
    }

    fn command(&self, args: &[String], options: &InvocationOptions) -> Result<InvocationResult, AdbError> {
        match &self.serial {
            Some(serial) => Device::new(&self.runner, serial.as_str()).command(args, options),
            None => self.runner.execute(args, options),
        }
    }

    fn shell(&self, command: &str, options: &InvocationOptions) -> Result<ShellResult, AdbError> {
        match &self.serial {
            Some(serial) => Device::new(&self.runner, serial.as_str()).shell(command, options),
            None => ShellSession::new(&self.runner).run(command, options),
        }
    }

    fn packages(&self, options: &InvocationOptions) -> Result<Vec<String>, AdbError> {
        match &self.serial {
            Some(serial) => Device::new(&self.runner, serial.as_str()).installed_packages_with(options),
            None => list_packages(&self.runner, options),
        }
    }
}

/// Runs a blocking adb call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, CliError>
where
    F: FnOnce() -> Result<T, AdbError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CliError::Transport(format!("adb task failed: {}", e)))?
        .map_err(CliError::from)
}

fn status_exit_code(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::Protocol(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = AdbConfig::load()?;
    let target = Target::resolve(&cli, &config);

    match cli.command {
        Command::Exec { input, no_read, no_exit_code_check, args } => {
            let mut options = target.options.clone().with_input(input);
            options.no_read = no_read;
            options.no_exit_code_check = no_exit_code_check;

            let result = blocking(move || target.command(&args, &options)).await?;
            if cli.format == OutputFormat::Json {
                print_json(&result)?;
            } else {
                print!("{}", result.stdout.as_deref().unwrap_or(""));
                eprint!("{}", result.stderr.as_deref().unwrap_or(""));
            }
            Ok(status_exit_code(result.exit_status))
        }
        Command::Shell { command, no_exit_code_check } => {
            let mut options = target.options.clone();
            options.no_exit_code_check = no_exit_code_check;

            let result = blocking(move || target.shell(&command, &options)).await?;
            if cli.format == OutputFormat::Json {
                print_json(&result)?;
            } else {
                print!("{}", result.command_output);
            }
            Ok(status_exit_code(result.exit_code))
        }
        Command::Packages => {
            let packages = blocking(move || target.packages(&target.options)).await?;

            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "packages": packages }));
            } else if packages.is_empty() {
                eprintln!("No packages found");
            } else {
                for package in packages {
                    println!("{}", package);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => run_config(&action, config, cli.format),
    }
}

fn run_config(action: &ConfigAction, mut config: AdbConfig, format: OutputFormat) -> Result<ExitCode, CliError> {
    match action {
        ConfigAction::Show => {
            let resolved = config.resolve_adb_path();
            if format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({ "config": config, "resolved_adb_path": resolved })
                );
            } else {
                print_json(&config)?;
                println!("adb: {}", resolved.display());
            }
        }
        ConfigAction::SetAdb { path } => {
            config.adb_path = Some(path.clone());
            config.save()?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "success": true, "adb_path": path }));
            } else {
                eprintln!("adb path set to {}", path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
