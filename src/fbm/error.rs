use std::fmt;
use std::io;
use std::ops::BitOr;

use websocket;

/// Diagnostic bit-set of a failed frame parse
///
/// A single malformed frame may trip several conditions at once; the
/// bits let callers distinguish partial data from absent data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseDiag(u8);

impl ParseDiag {
    /// A header segment can't be decoded
    pub const INVALID_HEADER_READ: ParseDiag = ParseDiag(0x01);
    /// The double sentinel ending the header block is missing
    pub const MISSING_TERMINATOR: ParseDiag = ParseDiag(0x02);
    /// The frame is shorter than the smallest valid message
    pub const BUFFER_TOO_SMALL: ParseDiag = ParseDiag(0x04);
    /// A command byte in a reserved position is unknown
    pub const UNKNOWN_COMMAND: ParseDiag = ParseDiag(0x08);

    /// No bits set
    pub fn empty() -> ParseDiag {
        ParseDiag(0)
    }
    /// True when all bits of `other` are set in `self`
    pub fn contains(self, other: ParseDiag) -> bool {
        self.0 & other.0 == other.0
    }
    /// True when no bits are set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ParseDiag {
    type Output = ParseDiag;
    fn bitor(self, other: ParseDiag) -> ParseDiag {
        ParseDiag(self.0 | other.0)
    }
}

impl fmt::Display for ParseDiag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for &(bit, name) in &[
            (ParseDiag::INVALID_HEADER_READ, "invalid-header-read"),
            (ParseDiag::MISSING_TERMINATOR, "missing-terminator"),
            (ParseDiag::BUFFER_TOO_SMALL, "buffer-too-small"),
            (ParseDiag::UNKNOWN_COMMAND, "unknown-command"),
        ] {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("ok")?;
        }
        Ok(())
    }
}

quick_error! {
    /// Error of a messaging session or a single request
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        Websocket(err: websocket::Error) {
            description("websocket error")
            display("websocket error: {}", err)
            from()
        }
        /// A frame failed to parse; the bits describe how
        Frame(diag: ParseDiag) {
            description("malformed frame")
            display("malformed frame: {}", diag)
        }
        /// The per-request timeout expired
        Timeout {
            description("request timed out")
        }
        /// All request records are in flight
        InFlightLimit {
            description("too many requests in flight")
        }
        /// The session is closed (or closing)
        Closed {
            description("messaging session closed")
        }
    }
}

#[cfg(test)]
mod test {
    use super::ParseDiag;

    #[test]
    fn bits_compose() {
        let diag = ParseDiag::INVALID_HEADER_READ
            | ParseDiag::UNKNOWN_COMMAND;
        assert!(diag.contains(ParseDiag::INVALID_HEADER_READ));
        assert!(diag.contains(ParseDiag::UNKNOWN_COMMAND));
        assert!(!diag.contains(ParseDiag::MISSING_TERMINATOR));
        assert!(!diag.is_empty());
        assert!(ParseDiag::empty().is_empty());
        assert_eq!(format!("{}", diag),
                   "invalid-header-read|unknown-command");
    }
}
