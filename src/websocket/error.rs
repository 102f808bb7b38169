use std::io;
use std::fmt;
use std::str::Utf8Error;

use httparse;

/// Websocket error, works both for server and client connections
pub struct Error(ErrorEnum);

quick_error! {
    #[derive(Debug)]
    pub enum ErrorEnum {
        /// Socket IO error
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
        /// Text frame can't be decoded
        InvalidUtf8(err: Utf8Error) {
            description("error decoding text frame")
            display("error decoding text frame: {}", err)
            from()
        }
        /// Got websocket frame with wrong opcode
        InvalidOpcode(code: u8) {
            description("invalid opcode")
            display("invalid opcode: {:#x}", code)
        }
        /// Got a frame masked the wrong way for this side
        Unmasked {
            description("frame masked the wrong way")
        }
        /// Got a fragmented frame (fragmented frames are not
        /// supported)
        Fragmented {
            description("received a fragmented frame")
        }
        /// Received frame that is longer than the configured limit
        TooLong {
            description("received frame that is too long")
        }
        /// Connection closed (normally or by timeout)
        Closed {
            description("connection closed")
        }
        /// Error parsing handshake response headers
        HeaderError(err: httparse::Error) {
            description("handshake parse error")
            display("handshake parse error: {:?}", err)
            from()
        }
        /// Server sent something before we finished the handshake
        PrematureResponse {
            description("response bytes before handshake is complete")
        }
        /// Server refused the handshake
        HandshakeRefused(code: u16) {
            description("handshake refused")
            display("handshake refused with status {}", code)
        }
        Custom(err: Box<::std::error::Error + Send + Sync>) {
            description("custom error")
            display("custom error: {}", err)
            cause(&**err)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl From<ErrorEnum> for Error {
    fn from(err: ErrorEnum) -> Self {
        Error(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error(ErrorEnum::Io(err))
    }
}

impl ::std::error::Error for Error {
    fn description(&self) -> &str {
        self.0.description()
    }
    fn cause(&self) -> Option<&::std::error::Error> {
        self.0.cause()
    }
}

impl Error {
    /// Create an error instance wrapping a custom error
    pub fn custom<E>(err: E) -> Error
        where E: Into<Box<::std::error::Error + Send + Sync>>
    {
        Error(ErrorEnum::Custom(err.into()))
    }
}

#[test]
fn send_sync() {
    fn send_sync<T: Send+Sync>(_: T) {}
    send_sync(Error::from(ErrorEnum::TooLong));
}
