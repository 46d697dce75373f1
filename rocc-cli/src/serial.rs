//! Serial port selection.
//!
//! An explicit `--port` (or `ROCC_PORT`) wins, then the configured port. With
//! neither, the single detected port is used, or the user picks one when
//! several are present. Non-interactive runs never prompt.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    rocc::PortInfo,
    std::io::IsTerminal,
};

/// Outcome of automatic port selection.
#[derive(Debug)]
enum Candidate {
    /// Exactly one usable port.
    Use(PortInfo),
    /// Several ports; the user has to choose.
    Ask(Vec<PortInfo>),
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn choose_candidate(mut ports: Vec<PortInfo>, non_interactive: bool) -> Result<Candidate> {
    match ports.len() {
        0 => Err(usage_err("No serial ports found; connect the device or pass --port")),
        1 => Ok(Candidate::Use(ports.remove(0))),
        _ if non_interactive => Err(usage_err(
            "Multiple serial ports found; pass --port to choose one",
        )),
        _ => Ok(Candidate::Ask(ports)),
    }
}

/// Resolve the serial port to open.
pub fn select_port(explicit: Option<&str>, config: &Config, non_interactive: bool) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }

    if let Some(name) = &config.connection.port {
        debug!("Using port from config: {name}");
        return Ok(name.clone());
    }

    let ports = rocc::discover_ports()?;
    match choose_candidate(ports, non_interactive)? {
        Candidate::Use(port) => {
            info!("Auto-selected port: {}", port.name);
            Ok(port.name)
        },
        Candidate::Ask(ports) => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

/// Whether prompts can be shown.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

fn ensure_interactive_terminal() -> Result<()> {
    if is_interactive() {
        Ok(())
    } else {
        Err(usage_err("Port selection needs a terminal; pass --port instead"))
    }
}

/// Map a prompt failure to a CLI error.
pub fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err("Prompt failed")
            }
        },
    }
}

/// One-line description of a port.
pub fn describe_port(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_deref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = usize::from(console::Term::stderr().size().1);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| {
            console::truncate_str(&describe_port(p), term_width.saturating_sub(4), "\u{2026}")
                .into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the ROCC device port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection.and_then(|index| ports.into_iter().nth(index)) {
        Some(port) => Ok(port.name),
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: Some(0x0403),
            pid: Some(0x6001),
            manufacturer: None,
            product: Some("FT232R".to_string()),
            serial_number: None,
        }
    }

    fn usage_message(err: &anyhow::Error) -> Option<String> {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => Some(msg.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB9".to_string());
        let port = select_port(Some("/dev/ttyACM0"), &config, true).unwrap();
        assert_eq!(port, "/dev/ttyACM0");
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB9".to_string());
        assert_eq!(select_port(None, &config, true).unwrap(), "/dev/ttyUSB9");
    }

    #[test]
    fn test_single_port_is_used() {
        let candidate = choose_candidate(vec![port("/dev/ttyUSB0")], true).unwrap();
        assert!(matches!(candidate, Candidate::Use(p) if p.name == "/dev/ttyUSB0"));
    }

    #[test]
    fn test_no_ports_is_usage_error() {
        let err = choose_candidate(Vec::new(), false).unwrap_err();
        assert!(usage_message(&err).unwrap().contains("No serial ports"));
    }

    #[test]
    fn test_multiple_ports_non_interactive_is_usage_error() {
        let err = choose_candidate(vec![port("a"), port("b")], true).unwrap_err();
        assert!(usage_message(&err).unwrap().contains("Multiple"));
    }

    #[test]
    fn test_multiple_ports_interactive_asks() {
        let candidate = choose_candidate(vec![port("a"), port("b")], false).unwrap();
        assert!(matches!(candidate, Candidate::Ask(p) if p.len() == 2));
    }

    #[test]
    fn test_describe_port() {
        assert_eq!(describe_port(&port("/dev/ttyUSB0")), "/dev/ttyUSB0 (0403:6001) - FT232R");
        let bare = PortInfo {
            vid: None,
            pid: None,
            product: None,
            ..port("/dev/ttyS0")
        };
        assert_eq!(describe_port(&bare), "/dev/ttyS0");
    }
}
