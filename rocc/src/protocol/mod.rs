//! ROCC wire protocol.
//!
//! Commands are ASCII lines of the form `<name><arg>\r\n`. Each command that
//! expects an answer gets exactly one `\n`-terminated line back.

pub mod auth;
pub mod command;
pub mod time;

pub use auth::{compute_proof, decode_challenge};
pub use command::{Command, RESPONSE_OK, frame, is_ok, parse_file_size};
pub use time::{DEVICE_TIME_FORMAT, format_device_time, now_device_time, parse_device_time};
