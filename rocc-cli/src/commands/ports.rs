//! `list-ports` command.

use anyhow::{Context, Result};
use console::style;

use crate::serial::describe_port;

/// List serial ports, as text on stderr or JSON on stdout.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = rocc::discover_ports().context("Failed to enumerate serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    }
    for port in &ports {
        eprintln!("  {} {}", style("•").green(), style(describe_port(port)).cyan());
    }
    Ok(())
}
