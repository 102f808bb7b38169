use std::io;

use httparse;

use enums::Status;
use base_serializer::HeaderError;

quick_error! {
    /// Engine error of a single connection
    ///
    /// Recoverable protocol errors map to a terminal response status via
    /// `Error::status()`; everything else closes the connection without
    /// a response.
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        ParseError(err: httparse::Error) {
            description("malformed request head")
            display("malformed request head: {:?}", err)
            from()
        }
        ChunkParseError(err: httparse::InvalidChunkSize) {
            description("malformed chunked encoding")
            from()
        }
        UnknownMethod {
            description("unknown request method")
        }
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
        BadRequestTarget {
            description("error parsing request target")
        }
        RequestTargetTooLong {
            description("request line doesn't fit the header buffer")
        }
        HeaderTooLarge {
            description("request headers don't fit the header buffer")
        }
        HostInvalid {
            description("invalid host header")
        }
        HostMismatch {
            description("authority of the request target doesn't match \
                the host header")
        }
        DuplicateHost {
            description("duplicate host header")
        }
        MissingHost {
            description("HTTP/1.1 request without a host header")
        }
        ConnectionInvalid {
            description("invalid connection header")
        }
        ContentLengthInvalid {
            description("invalid content-length header")
        }
        DuplicateContentLength {
            description("duplicate content length header")
        }
        ConflictingBodyHeaders {
            description("both content-length and chunked transfer \
                encoding are present")
        }
        BadTransferEncoding {
            description("transfer encoding other than chunked")
        }
        PayloadTooLarge {
            description("request body doesn't fit the form-data buffer")
        }
        TrailersTooLarge {
            description("trailers don't fit the header buffer")
        }
        PoolExhausted {
            description("connection buffer pool exhausted")
        }
        Timeout {
            description("connection timed out")
        }
        EofBeforeRequest {
            description("connection closed before a full request head")
        }
        EofInBody {
            description("connection closed in the middle of request body")
        }
        Serializer(err: HeaderError) {
            description("response serialization error")
            display("response serialization error: {}", err)
            from()
        }
        /// Handler asked to terminate the connection
        ///
        /// With a status a terminal response is sent first; without one
        /// the connection just closes.
        Terminated(status: Option<Status>) {
            description("connection terminated by handler")
        }
    }
}

impl Error {
    /// The terminal response for recoverable protocol errors
    ///
    /// Returns `None` when the connection must close without a
    /// response (I/O errors, timeouts, EOF).
    pub fn status(&self) -> Option<Status> {
        use self::Error::*;
        match *self {
            Io(..) => None,
            Timeout => None,
            EofBeforeRequest => None,
            EofInBody => None,
            Terminated(status) => status,
            ParseError(..) => Some(Status::BadRequest),
            ChunkParseError(..) => Some(Status::BadRequest),
            UnknownMethod => Some(Status::NotImplemented),
            UnsupportedVersion => Some(Status::VersionNotSupported),
            BadRequestTarget => Some(Status::BadRequest),
            RequestTargetTooLong => Some(Status::RequestUriTooLong),
            HeaderTooLarge => Some(Status::RequestHeaderFieldsTooLarge),
            TrailersTooLarge
            => Some(Status::RequestHeaderFieldsTooLarge),
            HostInvalid | HostMismatch | DuplicateHost | MissingHost
            => Some(Status::BadRequest),
            ConnectionInvalid => Some(Status::BadRequest),
            ContentLengthInvalid | DuplicateContentLength
            | ConflictingBodyHeaders | BadTransferEncoding
            => Some(Status::BadRequest),
            PayloadTooLarge => Some(Status::PayloadTooLarge),
            PoolExhausted => Some(Status::ServiceUnavailable),
            Serializer(..) => None,
        }
    }

    /// True for capacity errors which are logged at WARN
    pub fn is_capacity(&self) -> bool {
        matches!(*self, Error::PoolExhausted | Error::HeaderTooLarge |
            Error::TrailersTooLarge | Error::PayloadTooLarge |
            Error::RequestTargetTooLong)
    }
}

#[cfg(test)]
mod test {
    use enums::Status;
    use super::Error;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::HeaderTooLarge.status(),
                   Some(Status::RequestHeaderFieldsTooLarge));
        assert_eq!(Error::PayloadTooLarge.status(),
                   Some(Status::PayloadTooLarge));
        assert_eq!(Error::UnknownMethod.status(),
                   Some(Status::NotImplemented));
        assert_eq!(Error::RequestTargetTooLong.status(),
                   Some(Status::RequestUriTooLong));
        assert_eq!(Error::PoolExhausted.status(),
                   Some(Status::ServiceUnavailable));
        assert_eq!(Error::Timeout.status(), None);
        assert_eq!(Error::Terminated(Some(Status::Forbidden)).status(),
                   Some(Status::Forbidden));
        assert_eq!(Error::Terminated(None).status(), None);
    }

    #[test]
    fn capacity_errors() {
        assert!(Error::PoolExhausted.is_capacity());
        assert!(Error::HeaderTooLarge.is_capacity());
        assert!(!Error::Timeout.is_capacity());
    }
}
