//! Simulated ROCC device for integration tests.
//!
//! Commands written to [`SimPort`] are split on `\r\n` and handed to a
//! responder, which queues replies through a [`SimHandle`]. Each queued chunk
//! is returned by exactly one read, so tests control chunk boundaries.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rocc::{Port, PortReader, ReadChunk, Result};
use sha2::Sha256;

pub const WAIT: Duration = Duration::from_secs(2);

const READ_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Inbound {
    chunks: VecDeque<Vec<u8>>,
    ended: bool,
}

#[derive(Default)]
struct Shared {
    inbound: Mutex<Inbound>,
    arrived: Condvar,
    commands: Mutex<Vec<String>>,
    concurrent_reads: Mutex<(usize, usize)>,
}

/// Test-side control over the simulated device.
#[derive(Clone, Default)]
pub struct SimHandle {
    shared: Arc<Shared>,
}

impl SimHandle {
    /// Queue one chunk for the host to read.
    pub fn push(&self, bytes: &[u8]) {
        self.shared.inbound.lock().unwrap().chunks.push_back(bytes.to_vec());
        self.shared.arrived.notify_all();
    }

    /// Queue a `\n`-terminated line.
    pub fn push_line(&self, line: &str) {
        self.push(format!("{line}\n").as_bytes());
    }

    /// Queue a line after `delay`, from another thread.
    pub fn push_line_later(&self, line: &str, delay: Duration) {
        let handle = self.clone();
        let line = line.to_string();
        thread::spawn(move || {
            thread::sleep(delay);
            handle.push_line(&line);
        });
    }

    /// End the stream once the queued chunks are read.
    pub fn end(&self) {
        self.shared.inbound.lock().unwrap().ended = true;
        self.shared.arrived.notify_all();
    }

    /// Every command received so far, without terminator.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Highest number of reads that were in flight at once.
    pub fn max_concurrent_reads(&self) -> usize {
        self.shared.concurrent_reads.lock().unwrap().1
    }
}

pub type Responder = Box<dyn FnMut(&str, &SimHandle) + Send>;

/// Write side of the simulated device.
pub struct SimPort {
    handle: SimHandle,
    responder: Responder,
    partial: String,
}

impl SimPort {
    pub fn new(responder: Responder) -> (Self, SimHandle) {
        let handle = SimHandle::default();
        (
            Self {
                handle: handle.clone(),
                responder,
                partial: String::new(),
            },
            handle,
        )
    }

    /// A device that records commands and never answers.
    pub fn silent() -> (Self, SimHandle) {
        Self::new(Box::new(|_, _| {}))
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(end) = self.partial.find("\r\n") {
            let command = self.partial[..end].to_string();
            self.partial.drain(..end + 2);
            self.handle.shared.commands.lock().unwrap().push(command.clone());
            (self.responder)(&command, &self.handle);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn name(&self) -> &str {
        "sim"
    }

    fn baud_rate(&self) -> u32 {
        9600
    }

    fn try_clone_reader(&self) -> Result<Box<dyn PortReader>> {
        Ok(Box::new(SimReader {
            handle: self.handle.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.handle.end();
        Ok(())
    }
}

struct SimReader {
    handle: SimHandle,
}

impl PortReader for SimReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk> {
        let shared = &self.handle.shared;
        {
            let mut reads = shared.concurrent_reads.lock().unwrap();
            reads.0 += 1;
            reads.1 = reads.1.max(reads.0);
        }

        let inbound = shared.inbound.lock().unwrap();
        let (mut inbound, _) = shared
            .arrived
            .wait_timeout_while(inbound, READ_POLL, |i| i.chunks.is_empty() && !i.ended)
            .unwrap();

        let result = match inbound.chunks.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    inbound.chunks.push_front(chunk.split_off(n));
                }
                ReadChunk::Data(n)
            },
            None if inbound.ended => ReadChunk::Closed,
            None => ReadChunk::Idle,
        };
        drop(inbound);

        shared.concurrent_reads.lock().unwrap().0 -= 1;
        Ok(result)
    }
}

/// How the device streams a file after `fread`.
#[derive(Clone)]
pub struct SimFile {
    /// Size announced by `fsize`.
    pub size_reply: String,
    /// Chunks sent after `fread`.
    pub chunks: Vec<Vec<u8>>,
    /// Close the channel after the chunks.
    pub end_after: bool,
}

impl SimFile {
    pub fn whole(content: &[u8], chunk_sizes: &[usize]) -> Self {
        let mut chunks = Vec::new();
        let mut rest = content;
        for &size in chunk_sizes {
            let (head, tail) = rest.split_at(size.min(rest.len()));
            chunks.push(head.to_vec());
            rest = tail;
        }
        if !rest.is_empty() {
            chunks.push(rest.to_vec());
        }
        Self {
            size_reply: content.len().to_string(),
            chunks,
            end_after: false,
        }
    }
}

/// Device state observed by tests.
#[derive(Default)]
pub struct DeviceLog {
    pub times: Vec<String>,
    pub cleared: Vec<String>,
}

pub fn hmac_upper_hex(secret: &[u8], data: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(data);
    hex::encode_upper(mac.finalize().into_bytes())
}

/// A well-behaved ROCC device.
pub fn rocc_device(
    challenge: &str,
    secret: &str,
    files: HashMap<String, SimFile>,
) -> (SimPort, SimHandle, Arc<Mutex<DeviceLog>>) {
    let expected = hmac_upper_hex(secret.as_bytes(), &hex::decode(challenge).unwrap_or_default());
    let challenge = challenge.to_string();
    let log = Arc::new(Mutex::new(DeviceLog::default()));
    let device_log = Arc::clone(&log);

    let responder: Responder = Box::new(move |command, handle| {
        if command == "chlng" {
            handle.push_line(&format!("{challenge}\r"));
        } else if let Some(proof) = command.strip_prefix("auth") {
            handle.push_line(if proof == expected { "OK\r" } else { "FAIL\r" });
        } else if command == "gtime" {
            handle.push_line("03/05/24-08:07:09\r");
        } else if let Some(arg) = command.strip_prefix("time") {
            device_log.lock().unwrap().times.push(arg.to_string());
            handle.push_line("OK\r");
        } else if let Some(name) = command.strip_prefix("fsize") {
            match files.get(name) {
                Some(file) => handle.push_line(&format!("{}\r", file.size_reply)),
                None => handle.push_line("ERR\r"),
            }
        } else if let Some(name) = command.strip_prefix("fread") {
            if let Some(file) = files.get(name) {
                for chunk in &file.chunks {
                    handle.push(chunk);
                }
                if file.end_after {
                    handle.end();
                }
            }
        } else if let Some(name) = command.strip_prefix("fclear") {
            device_log.lock().unwrap().cleared.push(name.to_string());
            handle.push_line(if files.contains_key(name) { "OK\r" } else { "ERR\r" });
        } else if command == "ping" {
            handle.push_line("pong\r");
        } else {
            handle.push_line("ERR\r");
        }
    });

    let (port, handle) = SimPort::new(responder);
    (port, handle, log)
}

/// Deterministic ASCII payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}
