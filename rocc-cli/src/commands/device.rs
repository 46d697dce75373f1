//! Commands that talk to a device.
//!
//! Every command opens the port, authenticates unless `--no-auth` is given,
//! does its work and disconnects.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Password, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use rocc::{SerialConfig, Session, port::DEFAULT_BAUD};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::serial::{is_interactive, map_prompt_error, select_port};
use crate::{Cli, CliError, status, use_fancy_output};

/// Shared secret from flag/env, config, or an interactive prompt.
fn resolve_secret(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(secret) = &cli.secret {
        return Ok(secret.clone());
    }
    if let Some(secret) = &config.auth.secret {
        debug!("Using secret from config");
        return Ok(secret.clone());
    }
    if cli.non_interactive || !is_interactive() {
        return Err(CliError::Usage(
            "No device secret configured; use --secret, ROCC_SECRET, [auth] in rocc.toml or --no-auth"
                .to_string(),
        )
        .into());
    }

    Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Device secret")
        .interact()
        .map_err(map_prompt_error)
}

/// Open a session, authenticating when `authenticate` is set.
fn open_session(cli: &Cli, config: &Config, authenticate: bool) -> Result<Session> {
    let port = select_port(cli.port.as_deref(), config, cli.non_interactive)?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);

    // Ask for the secret before touching the port
    let secret = if authenticate {
        Some(resolve_secret(cli, config)?)
    } else {
        None
    };

    status(cli, &style("🔌").cyan(), &format!("Connecting to {port} at {baud} baud"));
    let session = Session::open(&SerialConfig::new(&port, baud), config.session_config())
        .with_context(|| format!("Failed to open {port}"))?;

    if let Some(secret) = secret {
        session
            .try_authenticate(&secret)
            .context("Authentication failed")?;
        status(cli, &style("✓").green(), "Authenticated");
    }
    Ok(session)
}

fn with_session<T>(
    cli: &Cli,
    config: &Config,
    authenticate: bool,
    work: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    let session = open_session(cli, config, authenticate)?;
    let result = work(&session);
    if let Err(e) = session.disconnect() {
        debug!("Disconnect failed: {e}");
    }
    result
}

/// `auth`: connect and authenticate.
pub(crate) fn cmd_auth(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, true, |_| Ok(()))
}

/// `set-time`: set the device clock to local time.
pub(crate) fn cmd_set_time(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, !cli.no_auth, |session| {
        let sent = session.try_set_time().context("Failed to set device time")?;
        status(cli, &style("✓").green(), &format!("Device time set to {sent}"));
        Ok(())
    })
}

/// `get-time`: print the device clock.
pub(crate) fn cmd_get_time(cli: &Cli, config: &Config) -> Result<()> {
    with_session(cli, config, !cli.no_auth, |session| {
        let time = session.get_time()?;
        if !is_device_time(&time) {
            warn!("Device clock is not in MM/dd/yy-HH:mm:ss form: {time:?}");
        }
        println!("{time}");
        Ok(())
    })
}

fn is_device_time(text: &str) -> bool {
    rocc::protocol::parse_device_time(text).is_ok()
}

/// Local file name for a download.
fn output_path(remote: &str, output: Option<&Path>) -> PathBuf {
    if let Some(path) = output {
        return path.to_path_buf();
    }
    Path::new(remote)
        .file_name()
        .map_or_else(|| PathBuf::from(remote), PathBuf::from)
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(bar_style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    ) {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// `read` / `read-bin`: download a remote file.
pub(crate) fn cmd_read(
    cli: &Cli,
    config: &Config,
    remote: &str,
    output: Option<&Path>,
    binary: bool,
) -> Result<()> {
    let path = output_path(remote, output);

    with_session(cli, config, !cli.no_auth, |session| {
        let pb = progress_bar(cli);
        pb.set_message(remote.to_string());
        let progress = |received: u64, total: u64| {
            pb.set_length(total);
            pb.set_position(received);
        };

        let data = if binary {
            session.read_file_with_progress(remote, progress)
        } else {
            session
                .read_text_file_with_progress(remote, progress)
                .map(String::into_bytes)
        };
        let data = match data {
            Ok(data) => data,
            Err(e) => {
                pb.abandon();
                return Err(e).with_context(|| format!("Failed to read {remote}"));
            },
        };
        pb.finish_and_clear();

        fs::write(&path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
        status(
            cli,
            &style("✓").green(),
            &format!("Saved {remote} ({} bytes) to {}", data.len(), path.display()),
        );
        Ok(())
    })
}

/// `clear`: clear a remote file.
pub(crate) fn cmd_clear(cli: &Cli, config: &Config, remote: &str) -> Result<()> {
    with_session(cli, config, !cli.no_auth, |session| {
        session
            .try_clear_file(remote)
            .with_context(|| format!("Failed to clear {remote}"))?;
        status(cli, &style("✓").green(), &format!("Cleared {remote}"));
        Ok(())
    })
}

/// `send`: send an arbitrary command and print the response.
pub(crate) fn cmd_send(cli: &Cli, config: &Config, command: &str) -> Result<()> {
    with_session(cli, config, !cli.no_auth, |session| {
        status(cli, &style(">").dim(), command);
        let response = session.send_raw(command)?;
        println!("{response}");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_device_time() {
        assert!(is_device_time("03/07/24-14:05:09"));
        assert!(!is_device_time("ERR"));
        assert!(!is_device_time("2024-03-07 14:05:09"));
    }

    #[test]
    fn test_output_path_defaults_to_remote_basename() {
        assert_eq!(output_path("log.txt", None), PathBuf::from("log.txt"));
        assert_eq!(output_path("data/2024.csv", None), PathBuf::from("2024.csv"));
        assert_eq!(
            output_path("log.txt", Some(Path::new("/tmp/out.txt"))),
            PathBuf::from("/tmp/out.txt")
        );
    }
}
