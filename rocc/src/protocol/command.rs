//! Command vocabulary and framing.

use crate::error::{Error, Result};

/// Response the device sends when a command succeeded.
pub const RESPONSE_OK: &str = "OK";

/// Line terminator appended to every command.
pub const TERMINATOR: &str = "\r\n";

/// Commands understood by a ROCC device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request an authentication challenge.
    Challenge,
    /// Answer the challenge with the HMAC proof.
    Auth,
    /// Set the device clock.
    SetTime,
    /// Read the device clock.
    GetTime,
    /// Query the size of a remote file.
    FileSize,
    /// Start streaming a remote file.
    FileRead,
    /// Clear a remote file.
    FileClear,
}

impl Command {
    /// Name of the command on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Self::Challenge => "chlng",
            Self::Auth => "auth",
            Self::SetTime => "time",
            Self::GetTime => "gtime",
            Self::FileSize => "fsize",
            Self::FileRead => "fread",
            Self::FileClear => "fclear",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the wire form of a command.
///
/// Name and argument are concatenated without a separator.
pub fn frame(name: &str, arg: &str) -> String {
    let mut line = String::with_capacity(name.len() + arg.len() + TERMINATOR.len());
    line.push_str(name);
    line.push_str(arg);
    line.push_str(TERMINATOR);
    line
}

/// Whether a trimmed response means success.
pub fn is_ok(response: &str) -> bool {
    response == RESPONSE_OK
}

/// Parse an `fsize` response.
pub fn parse_file_size(response: &str) -> Result<u64> {
    let text = response.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidFileSize(text.to_string()));
    }
    text.parse::<u64>()
        .map_err(|_| Error::InvalidFileSize(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame() {
        assert_eq!(frame("chlng", ""), "chlng\r\n");
        assert_eq!(frame("auth", "0A1B"), "auth0A1B\r\n");
        assert_eq!(
            frame(Command::SetTime.name(), "03/05/24-08:07:09"),
            "time03/05/24-08:07:09\r\n"
        );
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Challenge.to_string(), "chlng");
        assert_eq!(Command::GetTime.name(), "gtime");
        assert_eq!(Command::FileSize.name(), "fsize");
        assert_eq!(Command::FileRead.name(), "fread");
        assert_eq!(Command::FileClear.name(), "fclear");
    }

    #[test]
    fn test_is_ok_is_exact() {
        assert!(is_ok("OK"));
        assert!(!is_ok("ok"));
        assert!(!is_ok("OK!"));
        assert!(!is_ok(""));
    }

    #[test]
    fn test_parse_file_size() {
        assert_eq!(parse_file_size("128").unwrap(), 128);
        assert_eq!(parse_file_size(" 0\r\n").unwrap(), 0);
        for bad in ["", "-1", "+5", "12a", "1.5", "ERR", "99999999999999999999999"] {
            assert!(
                matches!(parse_file_size(bad), Err(Error::InvalidFileSize(_))),
                "{bad:?}"
            );
        }
    }
}
