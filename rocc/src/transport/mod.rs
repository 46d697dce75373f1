//! Read-side plumbing: the lease, the line reader and the mode switch.

pub mod framer;
pub mod lease;
pub mod mode;

pub use framer::{LineFramer, PendingLine};
pub use lease::{CancelToken, Lease, LeaseGuard, LeaseSlot};
pub use mode::{ModeController, RawHandoff, RawReader};
