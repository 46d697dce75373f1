//! Exclusive ownership of the channel's read side.
//!
//! The read half of the port lives inside a [`Lease`]. A [`LeaseSlot`] holds
//! the lease while nobody reads; a reader takes it out, and puts it back when
//! done. Since there is only one `Lease` per connection, two readers can never
//! pull from the channel at the same time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::port::{PortReader, ReadChunk};

/// How often a cancellable wait re-checks its token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation signal shared between a controller and one reader run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The exclusive grant on the read side.
pub struct Lease {
    reader: Box<dyn PortReader>,
    /// Bytes read by a previous holder that belong to the next one.
    carry: Vec<u8>,
}

impl Lease {
    /// Wrap the read half of a freshly opened port.
    pub fn new(reader: Box<dyn PortReader>) -> Self {
        Self {
            reader,
            carry: Vec::new(),
        }
    }

    /// Read the next chunk, serving pushed-back bytes first.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk> {
        if !self.carry.is_empty() {
            let n = buf.len().min(self.carry.len());
            buf[..n].copy_from_slice(&self.carry[..n]);
            self.carry.drain(..n);
            return Ok(ReadChunk::Data(n));
        }
        self.reader.read_chunk(buf)
    }

    /// Return bytes to the front of the stream for the next reader.
    pub fn push_back(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        trace!("Pushing back {} bytes", bytes.len());
        let mut carry = Vec::with_capacity(bytes.len() + self.carry.len());
        carry.extend_from_slice(bytes);
        carry.append(&mut self.carry);
        self.carry = carry;
    }

    /// Number of pushed-back bytes waiting for the next reader.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }
}

struct SlotState {
    lease: Option<Lease>,
    closed: bool,
}

/// Parking place for the lease between holders.
pub struct LeaseSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl LeaseSlot {
    /// Create a slot holding `lease`.
    pub fn new(lease: Lease) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                lease: Some(lease),
                closed: false,
            }),
            changed: Condvar::new(),
        })
    }

    /// Take the lease, waiting up to `timeout` for the current holder to
    /// release it.
    pub fn acquire(&self, timeout: Duration) -> Result<Lease> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            if let Some(lease) = state.lease.take() {
                return Ok(lease);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("reader lease still held".into()));
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take the lease unless `cancel` is raised or the channel is closed first.
    pub fn acquire_until_cancelled(&self, cancel: &CancelToken) -> Option<Lease> {
        let mut state = lock(&self.state);
        loop {
            if state.closed || cancel.is_cancelled() {
                return None;
            }
            if let Some(lease) = state.lease.take() {
                return Some(lease);
            }
            state = self
                .changed
                .wait_timeout(state, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Put the lease back and wake waiters.
    pub fn release(&self, lease: Lease) {
        let mut state = lock(&self.state);
        state.lease = Some(lease);
        drop(state);
        self.changed.notify_all();
    }

    /// Mark the channel as ended. Later acquisitions fail.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.changed.notify_all();
    }

    /// Close the slot and hand out the lease for teardown, if it is parked.
    pub fn retire(&self) -> Option<Lease> {
        let mut state = lock(&self.state);
        state.closed = true;
        let lease = state.lease.take();
        drop(state);
        self.changed.notify_all();
        lease
    }

    /// Whether the channel has ended.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Whether some reader currently holds the lease.
    pub fn is_held(&self) -> bool {
        lock(&self.state).lease.is_none()
    }

    /// Wake anyone blocked in a cancellable wait.
    pub fn wake(&self) {
        self.changed.notify_all();
    }
}

/// Scoped hold on a lease; releases it on every exit path.
pub struct LeaseGuard<'a> {
    slot: &'a LeaseSlot,
    lease: Option<Lease>,
}

impl<'a> LeaseGuard<'a> {
    /// Hold `lease` until the guard is dropped.
    pub fn new(slot: &'a LeaseSlot, lease: Lease) -> Self {
        Self {
            slot,
            lease: Some(lease),
        }
    }

    /// Read the next chunk through the held lease.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk> {
        match self.lease.as_mut() {
            Some(lease) => lease.read_chunk(buf),
            None => Ok(ReadChunk::Closed),
        }
    }

    /// Return bytes to the stream for the next holder.
    pub fn push_back(&mut self, bytes: &[u8]) {
        if let Some(lease) = self.lease.as_mut() {
            lease.push_back(bytes);
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.slot.release(lease);
        }
    }
}
