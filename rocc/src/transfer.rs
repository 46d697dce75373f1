//! Remote file download.
//!
//! ```text
//!  Idle ─► SizeRequested ─► ModeSwitchedToRaw ─► Receiving ─► ModeRestoredToLine ─► Idle
//!            fsize<name>       stop line mode,      exactly       lease returned,
//!                              fread<name>          size bytes    line mode running
//! ```
//!
//! Line mode is restored whether or not the byte count was reached, so the
//! session stays usable after a failed transfer.

use log::{debug, info, warn};

use crate::codec::Utf8StreamDecoder;
use crate::error::Result;
use crate::protocol::{Command, parse_file_size};
use crate::session::Session;

/// Stage of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    /// No transfer running.
    #[default]
    Idle,
    /// `fsize` sent, waiting for the size.
    SizeRequested,
    /// Line reader stopped and `fread` sent.
    ModeSwitchedToRaw,
    /// Raw bytes arriving.
    Receiving,
    /// Raw reader gone, line mode back.
    ModeRestoredToLine,
}

impl Session {
    /// Query the size of a remote file.
    pub fn file_size(&self, name: &str) -> Result<u64> {
        let response = self.send_command(Command::FileSize.name(), name)?;
        parse_file_size(&response)
    }

    /// Download a remote file as text.
    pub fn read_text_file(&self, name: &str) -> Result<String> {
        self.read_text_file_with_progress(name, |_, _| {})
    }

    /// Download a remote file as text, reporting `(received, total)`.
    ///
    /// Invalid UTF-8 is replaced with `U+FFFD`.
    pub fn read_text_file_with_progress<F>(&self, name: &str, mut progress: F) -> Result<String>
    where
        F: FnMut(u64, u64),
    {
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = String::new();
        self.download(
            name,
            |chunk| text.push_str(&decoder.decode(chunk)),
            &mut progress,
        )?;
        text.push_str(&decoder.finish());
        Ok(text)
    }

    /// Download a remote file as bytes.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.read_file_with_progress(name, |_, _| {})
    }

    /// Download a remote file as bytes, reporting `(received, total)`.
    pub fn read_file_with_progress<F>(&self, name: &str, mut progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(u64, u64),
    {
        let mut data = Vec::new();
        self.download(name, |chunk| data.extend_from_slice(chunk), &mut progress)?;
        Ok(data)
    }

    fn download<S>(&self, name: &str, sink: S, progress: &mut dyn FnMut(u64, u64)) -> Result<u64>
    where
        S: FnMut(&[u8]),
    {
        let _exchange = self.lock_exchange();
        self.set_phase(TransferPhase::SizeRequested);
        let result = self.download_locked(name, sink, progress);
        self.set_phase(TransferPhase::Idle);

        match &result {
            Ok(size) => info!("Read {name}: {size} bytes"),
            Err(e) => warn!("Read {name} failed: {e}"),
        }
        result
    }

    fn download_locked<S>(
        &self,
        name: &str,
        mut sink: S,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<u64>
    where
        S: FnMut(&[u8]),
    {
        let size = parse_file_size(&self.exchange_line(Command::FileSize.name(), name)?)?;
        debug!("{name}: {size} bytes announced");

        let handoff = self.mode.request_raw();
        self.set_phase(TransferPhase::ModeSwitchedToRaw);
        self.write_command(Command::FileRead.name(), name)?;

        let mut raw = handoff.acquire()?;
        self.set_phase(TransferPhase::Receiving);
        progress(0, size);

        let received = raw.read_exact_into(size, |chunk, total| {
            sink(chunk);
            progress(total, size);
        });
        drop(raw);
        self.set_phase(TransferPhase::ModeRestoredToLine);

        received.map(|()| size)
    }
}
