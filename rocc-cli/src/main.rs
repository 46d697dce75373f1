//! rocc CLI - Command-line client for ROCC serial devices.
//!
//! ## Features
//!
//! - Challenge/response authentication
//! - Device clock get and set
//! - Remote file download as text or binary
//! - Raw command passthrough
//! - Interactive serial port selection
//! - Shell completion generation

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Print a status line to stderr unless `--quiet` is set.
fn status(cli: &Cli, icon: &dyn std::fmt::Display, message: &str) {
    if !cli.quiet {
        eprintln!("{icon} {message}");
    }
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(rocc::Error::Interrupted) = cause.downcast_ref::<rocc::Error>() {
            return 130;
        }
    }
    1
}

/// rocc - Talk to a ROCC device over a serial port.
///
/// Environment variables:
///   ROCC_PORT              - Default serial port
///   ROCC_BAUD              - Default baud rate (default: 9600)
///   ROCC_SECRET            - Device authentication secret
///   ROCC_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rocc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ROCC_PORT")]
    port: Option<String>,

    /// Baud rate (default: config file, then 9600).
    #[arg(short, long, global = true, env = "ROCC_BAUD")]
    baud: Option<u32>,

    /// Authentication secret.
    #[arg(long, global = true, env = "ROCC_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Skip authentication.
    #[arg(long, global = true)]
    no_auth: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ROCC_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Authenticate with the device and exit.
    Auth,

    /// Set the device clock to the local time.
    SetTime,

    /// Print the device clock.
    GetTime,

    /// Download a remote file as text.
    Read {
        /// Remote file name.
        remote: String,

        /// Local output path (default: remote file name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download a remote file as raw bytes.
    ReadBin {
        /// Remote file name.
        remote: String,

        /// Local output path (default: remote file name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Clear a remote file.
    Clear {
        /// Remote file name.
        remote: String,
    },

    /// Send a raw command line and print the response.
    Send {
        /// Command text, sent as-is.
        command: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    let handler = ctrlc::set_handler(|| {
        // Second Ctrl-C gives up on a clean stop
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\n{} Interrupted, stopping...", style("⚠").yellow());
    });
    if let Err(e) = handler {
        debug!("Ctrl-C handler not installed: {e}");
    }
    rocc::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Auth => commands::device::cmd_auth(cli, &config),
        Commands::SetTime => commands::device::cmd_set_time(cli, &config),
        Commands::GetTime => commands::device::cmd_get_time(cli, &config),
        Commands::Read { remote, output } => {
            commands::device::cmd_read(cli, &config, remote, output.as_deref(), false)
        },
        Commands::ReadBin { remote, output } => {
            commands::device::cmd_read(cli, &config, remote, output.as_deref(), true)
        },
        Commands::Clear { remote } => commands::device::cmd_clear(cli, &config, remote),
        Commands::Send { command } => commands::device::cmd_send(cli, &config, command),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "rocc v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}
