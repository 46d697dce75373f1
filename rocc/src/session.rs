//! Connection to a ROCC device.
//!
//! A [`Session`] owns the port for its whole life. Commands are serialized by
//! an exchange lock, so a write and the line answering it are never split by
//! another caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{
    Command, compute_proof, decode_challenge, format_device_time, frame, is_ok, now_device_time,
};
use crate::transfer::TransferPhase;
use crate::transport::lease::lock;
use crate::transport::{Lease, LeaseSlot, LineFramer, ModeController};

/// Default wait for a response line.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for the line reader to hand over the lease.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default silence tolerated in the middle of a file transfer.
pub const DEFAULT_TRANSFER_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Session timing and buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a command waits for its response line.
    pub response_timeout: Duration,
    /// How long a mode switch waits for the line reader to exit.
    pub stop_timeout: Duration,
    /// How long a raw transfer tolerates silence.
    pub transfer_idle_timeout: Duration,
    /// Bytes requested per read.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            transfer_idle_timeout: DEFAULT_TRANSFER_IDLE_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SessionConfig {
    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the mode switch timeout.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the transfer idle timeout.
    #[must_use]
    pub fn with_transfer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_idle_timeout = timeout;
        self
    }

    /// Set the read chunk size. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// An open connection to a ROCC device.
pub struct Session {
    name: String,
    port: Mutex<Box<dyn Port>>,
    slot: Arc<LeaseSlot>,
    framer: LineFramer,
    pub(crate) mode: ModeController,
    exchange: Mutex<()>,
    phase: Mutex<TransferPhase>,
    config: SessionConfig,
    closed: AtomicBool,
}

impl Session {
    /// Take over an open port with default settings and enter line mode.
    pub fn connect<P: Port + 'static>(port: P) -> Result<Self> {
        Self::connect_with_config(port, SessionConfig::default())
    }

    /// Take over an open port and enter line mode.
    pub fn connect_with_config<P: Port + 'static>(port: P, config: SessionConfig) -> Result<Self> {
        let name = port.name().to_string();
        let reader = port.try_clone_reader()?;

        let slot = LeaseSlot::new(Lease::new(reader));
        let framer = LineFramer::new(Arc::clone(&slot), config.chunk_size);
        let mode = ModeController::new(
            framer.clone(),
            Arc::clone(&slot),
            config.stop_timeout,
            config.transfer_idle_timeout,
            config.chunk_size,
        );

        let session = Self {
            name,
            port: Mutex::new(Box::new(port)),
            slot,
            framer,
            mode,
            exchange: Mutex::new(()),
            phase: Mutex::new(TransferPhase::Idle),
            config,
            closed: AtomicBool::new(false),
        };
        session.mode.start_line_mode()?;

        info!(
            "Connected to {} at {} baud",
            session.name,
            lock(&session.port).baud_rate()
        );
        Ok(session)
    }

    /// Open a serial port and connect.
    #[cfg(feature = "native")]
    pub fn open(serial: &crate::port::SerialConfig, config: SessionConfig) -> Result<Self> {
        let port = crate::port::NativePort::open(serial)?;
        Self::connect_with_config(port, config)
    }

    /// Port name of this connection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session can still talk to the device.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.slot.is_closed()
    }

    /// Whether the channel is currently in line mode.
    pub fn is_line_mode(&self) -> bool {
        self.mode.is_line_mode()
    }

    /// Stage of the file transfer in progress, if any.
    pub fn transfer_phase(&self) -> TransferPhase {
        *lock(&self.phase)
    }

    /// Send a command and return its response line without trailing
    /// whitespace.
    pub fn send_command(&self, name: &str, arg: &str) -> Result<String> {
        let _exchange = self.lock_exchange();
        self.exchange_line(name, arg)
    }

    /// Send a command that has no response line.
    pub fn send_command_no_resp(&self, name: &str, arg: &str) -> Result<()> {
        let _exchange = self.lock_exchange();
        self.write_command(name, arg)
    }

    /// Wait for the next unclaimed line, trailing `\n` included.
    pub fn read_line(&self) -> Result<String> {
        self.framer.read_line(self.config.response_timeout)
    }

    /// Send `text` verbatim as a command and return the response.
    pub fn send_raw(&self, text: &str) -> Result<String> {
        self.send_command(text, "")
    }

    /// Authenticate with `secret`, reporting the reason on failure.
    pub fn try_authenticate(&self, secret: &str) -> Result<()> {
        let _exchange = self.lock_exchange();

        let challenge = self.exchange_line(Command::Challenge.name(), "")?;
        let challenge = decode_challenge(&challenge)?;
        trace!("Challenge: {} bytes", challenge.len());

        let proof = compute_proof(secret.as_bytes(), &challenge)?;
        trace!("Proof: {proof}");

        let response = self.exchange_line(Command::Auth.name(), &proof)?;
        if is_ok(&response) {
            Ok(())
        } else {
            Err(Error::AuthRejected(response))
        }
    }

    /// Authenticate with `secret`. Failures are logged, not returned.
    pub fn authenticate(&self, secret: &str) -> bool {
        match self.try_authenticate(secret) {
            Ok(()) => {
                info!("Authenticated on {}", self.name);
                true
            },
            Err(e) => {
                warn!("Authentication failed: {e}");
                false
            },
        }
    }

    /// Set the device clock to the given instant.
    pub fn try_set_time_at(&self, at: &NaiveDateTime) -> Result<()> {
        self.send_time_stamp(&format_device_time(at))
    }

    fn send_time_stamp(&self, stamp: &str) -> Result<()> {
        let response = self.send_command(Command::SetTime.name(), stamp)?;
        if is_ok(&response) {
            Ok(())
        } else {
            Err(Error::Protocol(format!("time rejected: {response:?}")))
        }
    }

    /// Set the device clock to the given instant. Failures are logged.
    pub fn set_time_at(&self, at: &NaiveDateTime) -> bool {
        match self.try_set_time_at(at) {
            Ok(()) => true,
            Err(e) => {
                warn!("Set time failed: {e}");
                false
            },
        }
    }

    /// Set the device clock to the local time and return the value sent.
    pub fn try_set_time(&self) -> Result<String> {
        let stamp = now_device_time();
        self.send_time_stamp(&stamp)?;
        Ok(stamp)
    }

    /// Set the device clock to the local time. Failures are logged.
    pub fn set_time(&self) -> bool {
        match self.try_set_time() {
            Ok(_) => true,
            Err(e) => {
                warn!("Set time failed: {e}");
                false
            },
        }
    }

    /// Read the device clock as reported.
    pub fn get_time(&self) -> Result<String> {
        self.send_command(Command::GetTime.name(), "")
    }

    /// Clear a remote file.
    pub fn try_clear_file(&self, name: &str) -> Result<()> {
        let response = self.send_command(Command::FileClear.name(), name)?;
        if is_ok(&response) {
            Ok(())
        } else {
            Err(Error::Protocol(format!("clear of {name:?} rejected: {response:?}")))
        }
    }

    /// Clear a remote file. Failures are logged.
    pub fn clear_file(&self, name: &str) -> bool {
        match self.try_clear_file(name) {
            Ok(()) => true,
            Err(e) => {
                warn!("Clear file failed: {e}");
                false
            },
        }
    }

    /// Stop reading and close the port.
    pub fn disconnect(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.framer.stop();
        if let Err(e) = self.framer.wait_stopped(self.config.stop_timeout) {
            warn!("Line reader did not stop cleanly: {e}");
        }
        self.framer.close();
        drop(self.slot.retire());

        let result = lock(&self.port).close();
        info!("Disconnected from {}", self.name);
        result
    }

    pub(crate) fn lock_exchange(&self) -> MutexGuard<'_, ()> {
        lock(&self.exchange)
    }

    pub(crate) fn set_phase(&self, phase: TransferPhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            trace!("Transfer phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    /// Write a command and wait for its line. Caller holds the exchange lock.
    pub(crate) fn exchange_line(&self, name: &str, arg: &str) -> Result<String> {
        if self.framer.settle_overdue(self.config.response_timeout) {
            debug!("Late reply to an earlier command discarded");
        }
        // Register first so a fast reply cannot be dropped as unsolicited
        let pending = self.framer.request_line()?;
        self.write_command(name, arg)?;
        let line = pending.wait_reply(self.config.response_timeout)?;
        let response = line.trim_end().to_string();
        debug!("{name} -> {}", redact(name, &response));
        Ok(response)
    }

    pub(crate) fn write_command(&self, name: &str, arg: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }
        let line = frame(name, arg);
        debug!("Sending {name}");
        trace!("> {:?}", line);
        lock(&self.port).write_text(&line)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!("Error closing {}: {e}", self.name);
        }
    }
}

/// Keep challenges out of debug logs.
fn redact<'a>(name: &str, response: &'a str) -> &'a str {
    if name == Command::Challenge.name() {
        "<challenge>"
    } else {
        response
    }
}
