//! Line-mode reader.
//!
//! A background thread holds the read lease, decodes incoming bytes and
//! hands every completed line to the oldest pending [`PendingLine`]. Lines
//! nobody asked for are dropped: the protocol is strictly request/response, so
//! unsolicited device output carries no context worth keeping.
//!
//! ```text
//!   start() ──► [acquire lease] ──► read chunk ──► decode ──► dispatch ─┐
//!                     ▲                 ▲                               │
//!                     │ transient error └───────────────────────────────┘
//!                     └──────────────── (back-off)
//!   stop()  ──► cancel token ──► loop pushes back unread bytes, releases
//!                                lease, signals `stopped`
//! ```
//!
//! A read error only ends the current lease. The loop backs off and takes the
//! lease again for as long as the channel is open.
//!
//! A command reply that missed its deadline would otherwise answer the next
//! command. [`PendingLine::wait_reply`] flags the reply as overdue on timeout,
//! and [`LineFramer::settle_overdue`] lets the caller swallow it before the
//! next write.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::codec::LineDecoder;
use crate::error::{Error, Result};
use crate::port::ReadChunk;
use crate::transport::lease::{CancelToken, LeaseGuard, LeaseSlot, lock};

/// Pause before re-acquiring the lease after a read error.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(25);

struct Waiter {
    id: u64,
    tx: Sender<String>,
}

#[derive(Default)]
struct WaiterQueue {
    waiters: VecDeque<Waiter>,
    next_id: u64,
    closed: bool,
    /// A command reply timed out and may still arrive.
    overdue: bool,
}

impl WaiterQueue {
    /// Withdraw waiter `id`. Returns false if it was already served.
    fn withdraw(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            },
            None => false,
        }
    }
}

struct Control {
    /// A loop thread exists (possibly already told to stop).
    running: bool,
    /// Token of the current run; `None` once stop was requested.
    cancel: Option<CancelToken>,
    lines: LineDecoder,
}

struct Shared {
    slot: Arc<LeaseSlot>,
    control: Mutex<Control>,
    stopped: Condvar,
    queue: Mutex<WaiterQueue>,
    chunk_size: usize,
}

/// Background line reader over a shared read lease.
///
/// Cheap to clone; clones control the same loop.
#[derive(Clone)]
pub struct LineFramer {
    shared: Arc<Shared>,
}

impl LineFramer {
    /// Create a stopped framer reading through `slot`.
    pub fn new(slot: Arc<LeaseSlot>, chunk_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot,
                control: Mutex::new(Control {
                    running: false,
                    cancel: None,
                    lines: LineDecoder::new(),
                }),
                stopped: Condvar::new(),
                queue: Mutex::new(WaiterQueue::default()),
                chunk_size: chunk_size.max(1),
            }),
        }
    }

    /// Start the read loop.
    ///
    /// A no-op while a run is active. If a stopped run is still winding down,
    /// waits for it to exit first so that two loops never coexist.
    pub fn start(&self) -> Result<()> {
        let mut control = lock(&self.shared.control);
        while control.running {
            if control.cancel.is_some() {
                return Ok(());
            }
            control = self
                .shared
                .stopped
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if self.shared.slot.is_closed() {
            debug!("Not starting line reader: channel closed");
            return Ok(());
        }

        if !control.lines.partial().is_empty() {
            trace!("Discarding stale partial line {:?}", control.lines.partial());
        }
        control.lines.reset();

        let cancel = CancelToken::new();
        control.cancel = Some(cancel.clone());
        control.running = true;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("rocc-line-reader".into())
            .spawn(move || run(&shared, &cancel));

        if let Err(e) = spawned {
            control.running = false;
            control.cancel = None;
            return Err(Error::Io(e));
        }

        debug!("Line reader started");
        Ok(())
    }

    /// Ask the read loop to stop.
    ///
    /// Returns without waiting; use [`LineFramer::wait_stopped`] for the
    /// completion signal. Once this returns no further line is delivered until
    /// the next [`LineFramer::start`].
    pub fn stop(&self) {
        let mut control = lock(&self.shared.control);
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
            debug!("Line reader stop requested");
        }
        drop(control);
        self.shared.slot.wake();
    }

    /// Whether a loop thread is still alive.
    pub fn is_active(&self) -> bool {
        lock(&self.shared.control).running
    }

    /// Block until the loop has exited and released the lease.
    pub fn wait_stopped(&self, timeout: Duration) -> Result<()> {
        let control = lock(&self.shared.control);
        let (control, _) = self
            .shared
            .stopped
            .wait_timeout_while(control, timeout, |c| c.running)
            .unwrap_or_else(PoisonError::into_inner);

        if control.running {
            return Err(Error::Timeout(format!(
                "line reader still active after {} ms",
                timeout.as_millis()
            )));
        }
        Ok(())
    }

    /// Register interest in the next unclaimed line.
    pub fn request_line(&self) -> Result<PendingLine> {
        let mut queue = lock(&self.shared.queue);
        if queue.closed {
            return Err(Error::ChannelClosed);
        }

        let (tx, rx) = mpsc::channel();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.waiters.push_back(Waiter { id, tx });

        Ok(PendingLine {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Wait for the next unclaimed line, including its trailing `\n`.
    pub fn read_line(&self, timeout: Duration) -> Result<String> {
        self.request_line()?.wait(timeout)
    }

    /// Swallow the late reply to a timed-out command, if one is owed.
    ///
    /// Waits up to `grace` for it. Returns whether a line was discarded.
    /// Call with no command outstanding.
    pub fn settle_overdue(&self, grace: Duration) -> bool {
        let owed = std::mem::take(&mut lock(&self.shared.queue).overdue);
        if !owed {
            return false;
        }
        let Ok(pending) = self.request_line() else {
            return false;
        };
        match pending.wait(grace) {
            Ok(line) => {
                debug!("Discarded late reply: {:?}", line.trim_end());
                true
            },
            Err(_) => {
                debug!("Overdue reply never arrived");
                false
            },
        }
    }

    /// Fail every pending and future line request.
    pub fn close(&self) {
        self.shared.close_queue();
    }

    /// Number of line requests still waiting.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).waiters.len()
    }
}

/// An outstanding `read_line` request.
pub struct PendingLine {
    id: u64,
    rx: Receiver<String>,
    shared: Arc<Shared>,
}

impl Drop for PendingLine {
    fn drop(&mut self) {
        lock(&self.shared.queue).withdraw(self.id);
    }
}

impl PendingLine {
    /// Wait for the line. On timeout the request is withdrawn from the queue.
    pub fn wait(self, timeout: Duration) -> Result<String> {
        self.wait_inner(timeout, false)
    }

    /// Wait for the reply to a command just written.
    ///
    /// Like [`PendingLine::wait`], but a timeout also flags the reply as
    /// overdue for [`LineFramer::settle_overdue`].
    pub fn wait_reply(self, timeout: Duration) -> Result<String> {
        self.wait_inner(timeout, true)
    }

    fn wait_inner(&self, timeout: Duration, reply: bool) -> Result<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => return Ok(line),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
            Err(RecvTimeoutError::Timeout) => {},
        }

        let mut queue = lock(&self.shared.queue);
        if !queue.withdraw(self.id) {
            // Served between the timeout and the lock; lines are sent under it
            return self.rx.try_recv().map_err(|_| Error::ChannelClosed);
        }

        if reply {
            queue.overdue = true;
        }
        Err(Error::Timeout(format!(
            "no response line within {} ms",
            timeout.as_millis()
        )))
    }
}

impl Shared {
    /// Decode `bytes` and dispatch completed lines, unless stop was requested.
    ///
    /// Holds the control lock for the whole step so `stop()` is ordered
    /// strictly before or after a delivery.
    fn deliver(&self, cancel: &CancelToken, bytes: &[u8]) -> bool {
        let mut control = lock(&self.control);
        if cancel.is_cancelled() {
            return false;
        }

        let mut queue = lock(&self.queue);
        for line in control.lines.feed(bytes) {
            match queue.waiters.pop_front() {
                Some(waiter) => {
                    trace!("Line -> waiter {}: {:?}", waiter.id, line.trim_end());
                    // A dropped receiver means the caller gave up; the line is
                    // still consumed by it
                    let _ = waiter.tx.send(line);
                },
                None => trace!("Dropping unsolicited line: {:?}", line.trim_end()),
            }
        }
        true
    }

    fn close_queue(&self) {
        let mut queue = lock(&self.queue);
        queue.closed = true;
        queue.waiters.clear();
    }

    fn channel_ended(&self) {
        debug!("Channel ended; line reader exiting");
        self.slot.close();
        self.close_queue();
    }
}

/// Clears the running flag and raises the completion signal on every exit.
struct RunGuard<'a>(&'a Shared);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut control = lock(&self.0.control);
        control.running = false;
        drop(control);
        self.0.stopped.notify_all();
        debug!("Line reader stopped");
    }
}

fn run(shared: &Shared, cancel: &CancelToken) {
    let _running = RunGuard(shared);
    let mut buf = vec![0u8; shared.chunk_size];
    let mut consecutive_errors = 0u32;

    'lease: while let Some(lease) = shared.slot.acquire_until_cancelled(cancel) {
        let mut held = LeaseGuard::new(&shared.slot, lease);
        trace!("Line reader holds the lease");

        loop {
            if cancel.is_cancelled() {
                break 'lease;
            }

            match held.read_chunk(&mut buf) {
                Ok(ReadChunk::Data(0) | ReadChunk::Idle) => {},
                Ok(ReadChunk::Data(n)) => {
                    consecutive_errors = 0;
                    trace!("Line reader got {n} bytes");
                    if !shared.deliver(cancel, &buf[..n]) {
                        // Read after stop: these bytes belong to the next holder
                        held.push_back(&buf[..n]);
                        break 'lease;
                    }
                },
                Ok(ReadChunk::Closed) => {
                    drop(held);
                    shared.channel_ended();
                    break 'lease;
                },
                Err(e) => {
                    if cancel.is_cancelled() {
                        break 'lease;
                    }
                    consecutive_errors += 1;
                    if consecutive_errors == 1 {
                        warn!("Line reader error: {e}");
                    } else {
                        debug!("Line reader error ({consecutive_errors} in a row): {e}");
                    }
                    // Only this lease ends; the channel stays open
                    drop(held);
                    thread::sleep(READ_ERROR_BACKOFF);
                    continue 'lease;
                },
            }
        }
    }
}
