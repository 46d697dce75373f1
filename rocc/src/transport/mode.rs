//! Handoff of the read side between line mode and raw mode.
//!
//! Switching to raw mode is a two-step typestate:
//!
//! 1. [`ModeController::request_raw`] stops the line reader and returns a
//!    [`RawHandoff`]. The caller may now tell the device to start streaming.
//! 2. [`RawHandoff::acquire`] waits until the line reader has confirmed it is
//!    gone, then takes the lease and returns a [`RawReader`].
//!
//! Dropping either guard puts line mode back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::ReadChunk;
use crate::transport::framer::LineFramer;
use crate::transport::lease::{Lease, LeaseSlot};

/// Arbitrates the read lease between the line reader and raw readers.
pub struct ModeController {
    framer: LineFramer,
    slot: Arc<LeaseSlot>,
    stop_timeout: Duration,
    idle_timeout: Duration,
    chunk_size: usize,
}

impl ModeController {
    /// Create a controller over `framer`, which must read through `slot`.
    pub fn new(
        framer: LineFramer,
        slot: Arc<LeaseSlot>,
        stop_timeout: Duration,
        idle_timeout: Duration,
        chunk_size: usize,
    ) -> Self {
        Self {
            framer,
            slot,
            stop_timeout,
            idle_timeout,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Put the channel in line mode.
    pub fn start_line_mode(&self) -> Result<()> {
        self.framer.start()
    }

    /// Whether the line reader is running.
    pub fn is_line_mode(&self) -> bool {
        self.framer.is_active()
    }

    /// Begin a switch to raw mode by stopping the line reader.
    pub fn request_raw(&self) -> RawHandoff<'_> {
        debug!("Leaving line mode");
        self.framer.stop();
        RawHandoff {
            mode: self,
            armed: true,
        }
    }

    fn restore_line_mode(&self) {
        if self.slot.is_closed() {
            debug!("Channel closed; line mode not restored");
            return;
        }
        match self.framer.start() {
            Ok(()) => debug!("Line mode restored"),
            Err(e) => warn!("Failed to restore line mode: {e}"),
        }
    }
}

/// Line reader stopped, raw lease not taken yet.
#[must_use = "dropping the handoff restarts line mode immediately"]
pub struct RawHandoff<'a> {
    mode: &'a ModeController,
    armed: bool,
}

impl<'a> RawHandoff<'a> {
    /// Wait for the line reader to exit and take the read lease.
    pub fn acquire(mut self) -> Result<RawReader<'a>> {
        let mode = self.mode;
        mode.framer.wait_stopped(mode.stop_timeout)?;
        let lease = mode.slot.acquire(mode.stop_timeout)?;
        self.armed = false;
        debug!("Raw mode: lease acquired");

        Ok(RawReader {
            mode,
            lease: Some(lease),
        })
    }
}

impl Drop for RawHandoff<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mode.restore_line_mode();
        }
    }
}

/// Exclusive raw reader. Returns the lease and restarts line mode on drop.
pub struct RawReader<'a> {
    mode: &'a ModeController,
    lease: Option<Lease>,
}

impl RawReader<'_> {
    /// Read exactly `len` bytes, handing each chunk to `sink`.
    ///
    /// `sink` receives the chunk and the running total. Bytes past `len` stay
    /// in the stream for line mode.
    pub fn read_exact_into<F>(&mut self, len: u64, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8], u64),
    {
        let lease = self.lease.as_mut().ok_or(Error::ChannelClosed)?;
        let mut buf = vec![0u8; self.mode.chunk_size];
        let mut received = 0u64;
        let mut last_data = Instant::now();

        while received < len {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            match lease.read_chunk(&mut buf)? {
                ReadChunk::Data(0) => {},
                ReadChunk::Data(n) => {
                    let want = usize::try_from(len - received).unwrap_or(usize::MAX);
                    let take = n.min(want);
                    if take < n {
                        lease.push_back(&buf[take..n]);
                    }
                    received += take as u64;
                    last_data = Instant::now();
                    trace!("Raw read {take} bytes ({received}/{len})");
                    sink(&buf[..take], received);
                },
                ReadChunk::Idle => {
                    if last_data.elapsed() >= self.mode.idle_timeout {
                        if received == 0 {
                            return Err(Error::Timeout(format!(
                                "no data within {} ms",
                                self.mode.idle_timeout.as_millis()
                            )));
                        }
                        return Err(Error::ShortTransfer {
                            expected: len,
                            received,
                        });
                    }
                },
                ReadChunk::Closed => {
                    self.mode.slot.close();
                    self.mode.framer.close();
                    return Err(Error::ShortTransfer {
                        expected: len,
                        received,
                    });
                },
            }
        }
        Ok(())
    }

    /// Read exactly `len` bytes into a vector.
    pub fn read_exact(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(usize::try_from(len).unwrap_or(0).min(1 << 20));
        self.read_exact_into(len, |chunk, _| out.extend_from_slice(chunk))?;
        Ok(out)
    }
}

impl Drop for RawReader<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.mode.slot.release(lease);
        }
        self.mode.restore_line_mode();
    }
}
