//! Device clock format.

use chrono::{Local, NaiveDateTime};

use crate::error::{Error, Result};

/// `MM/dd/yy-HH:mm:ss`, 24-hour clock.
pub const DEVICE_TIME_FORMAT: &str = "%m/%d/%y-%H:%M:%S";

/// Format an instant the way the device expects it.
pub fn format_device_time(at: &NaiveDateTime) -> String {
    at.format(DEVICE_TIME_FORMAT).to_string()
}

/// Current local time in device format.
pub fn now_device_time() -> String {
    format_device_time(&Local::now().naive_local())
}

/// Parse a clock string reported by the device.
pub fn parse_device_time(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), DEVICE_TIME_FORMAT)
        .map_err(|e| Error::Protocol(format!("bad device time {text:?}: {e}")))
}
