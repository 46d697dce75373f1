//! # rocc
//!
//! Client for ROCC devices over a serial line.
//!
//! A ROCC device speaks a line protocol: the host sends `<name><arg>\r\n`
//! and the device answers with one `\n`-terminated line. File downloads switch
//! the same channel to raw mode for a fixed number of bytes and back.
//!
//! This crate provides:
//!
//! - A background line reader with FIFO response correlation
//! - Exclusive handoff of the read side between line mode and raw mode
//! - HMAC-SHA256 challenge-response authentication
//! - Text and binary file download, device clock set/get
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: `Serialize` for [`PortInfo`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use rocc::{SerialConfig, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let serial = SerialConfig::new("/dev/ttyUSB0", 9600);
//!         let session = Session::open(&serial, SessionConfig::default())?;
//!
//!         let secret = std::env::var("ROCC_SECRET")?;
//!         if session.authenticate(&secret) {
//!             session.set_time();
//!             let log = session.read_text_file("log.txt")?;
//!             println!("{log}");
//!         }
//!         session.disconnect()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod codec;
pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    codec::{LineDecoder, Utf8StreamDecoder, drain_utf8_lossy},
    error::{Error, Result},
    host::sort_ports,
    port::{Port, PortEnumerator, PortInfo, PortReader, ReadChunk, SerialConfig},
    protocol::Command,
    session::{Session, SessionConfig},
    transfer::TransferPhase,
};

#[cfg(feature = "native")]
pub use host::discover_ports;
