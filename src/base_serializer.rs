//! Serialization of a response head into the (fixed) response-header
//! segment, with body accounting
//!
//! Unlike a growable-buffer serializer this one defers the body-framing
//! decision to `done_headers()`: the handler declares a length or asks
//! for chunked, and the final `Content-Length` / `Transfer-Encoding`
//! line is only emitted once the engine knows whether a compressor is
//! active. Body bytes themselves never pass through here, they go
//! through the staging segment; this state machine only accounts for
//! them against the declared length.

use std::fmt::{self, Display, Write as FmtWrite};

use enums::Version;
use compress;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("Header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("Header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
        RequireBodyless {
            description("This message must not contain body length fields.")
        }
        HeadTooLarge {
            description("Response head exceeds the header segment")
        }
    }
}

/// A bounded writer over the response-header segment
///
/// All head serialization goes through this view; overflowing the
/// segment is a capacity error (`HeadTooLarge`), not a panic.
pub struct HeadBuf<'a> {
    buf: &'a mut [u8],
    len: &'a mut usize,
}

impl<'a> HeadBuf<'a> {
    pub fn new(buf: &'a mut [u8], len: &'a mut usize) -> HeadBuf<'a> {
        HeadBuf { buf: buf, len: len }
    }
    pub fn len(&self) -> usize {
        *self.len
    }
    fn put(&mut self, data: &[u8]) -> Result<(), HeaderError> {
        if *self.len + data.len() > self.buf.len() {
            return Err(HeaderError::HeadTooLarge);
        }
        self.buf[*self.len..*self.len + data.len()].copy_from_slice(data);
        *self.len += data.len();
        Ok(())
    }
    fn put_fmt(&mut self, args: fmt::Arguments) -> Result<(), HeaderError> {
        let mut adapter = FmtAdapter { buf: self };
        match adapter.write_fmt(args) {
            Ok(()) => Ok(()),
            Err(_) => Err(HeaderError::HeadTooLarge),
        }
    }
    fn truncate(&mut self, to: usize) {
        debug_assert!(to <= *self.len);
        *self.len = to;
    }
    fn tail(&self, from: usize) -> &[u8] {
        &self.buf[from..*self.len]
    }
}

struct FmtAdapter<'a, 'b: 'a> {
    buf: &'a mut HeadBuf<'b>,
}

impl<'a, 'b> fmt::Write for FmtAdapter<'a, 'b> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.put(s.as_bytes()).is_err() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}

/// Response serializer state
///
/// Note: while we pass the buffer view to each method, we expect the
/// same underlying segment each time.
#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent.
    ResponseStart { version: Version, body: Body, close: bool },
    /// Status line is already in the buffer.
    Headers {
        version: Version,
        body: Body,
        close: bool,
        framing: Option<Framing>,
        date: bool,
        server: bool,
        connection: bool,
    },
    /// Headers are closed, body bytes are being accounted.
    BodyPhase {
        is_head: bool,
        // bytes still owed when a length was declared
        declared: Option<u64>,
        chunked: bool,
    },
    /// The message contains no body.
    ///
    /// All 1xx (Informational), 204 (No Content), and 304 (Not
    /// Modified) responses do not include a message body.
    Bodyless,
    /// A message in final state.
    Done,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Body {
    /// Message contains a body.
    Normal,
    /// Message body is ignored: responses to HEAD requests.
    Head,
    /// Message must not have a body: all 1xx (Informational),
    /// 204 (No Content), and 304 (Not Modified) responses
    Denied,
}

/// Body framing the handler declared before `done_headers`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Framing {
    Fixed(u64),
    Chunked,
}

/// What `done_headers` decided
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeadSummary {
    /// Body bytes are expected (false for HEAD and bodyless statuses)
    pub expect_body: bool,
    /// The wire format is chunked
    pub chunked: bool,
    /// The connection must close after this response
    pub close: bool,
}

fn invalid_header(value: &[u8]) -> bool {
    return value.iter().any(|&x| x == b'\r' || x == b'\n')
}

impl MessageState {
    /// Write status line.
    ///
    /// # Panics
    ///
    /// When the status line is already written. It's expected that your
    /// request handler state machine will never call the method twice.
    ///
    /// When the status code is 100 (Continue). 100 is not allowed
    /// as a final status code.
    pub fn response_status(&mut self, buf: &mut HeadBuf, code: u16,
        reason: &str)
        -> Result<(), HeaderError>
    {
        use self::Body::*;
        use self::MessageState::*;
        match *self {
            ResponseStart { version, mut body, close } => {
                // 100 (Continue) interim status code is not allowed as
                // a final response status.
                assert!(code != 100);
                // Ancient HTTP/0.9 responses are bare bodies without
                // a status line or headers.
                if version != Version::Http09 {
                    buf.put_fmt(
                        format_args!("{} {} {}\r\n", version, code, reason))?;
                }
                // Responses without body:
                //
                // * 1xx (Informational)
                // * 204 (No Content)
                // * 304 (Not Modified)
                if (code >= 100 && code < 200) || code == 204 || code == 304 {
                    body = Denied
                }
                *self = Headers {
                    version: version,
                    body: body,
                    close: close || version == Version::Http09,
                    framing: None,
                    date: false,
                    server: false,
                    connection: false,
                };
                Ok(())
            }
            ref state => {
                panic!("Called response_status() method on response \
                    in state {:?}", state)
            }
        }
    }

    fn write_header(&mut self, buf: &mut HeadBuf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        if invalid_header(value) {
            return Err(HeaderError::InvalidHeaderValue);
        }
        let start = buf.len();
        let result = buf.put(name.as_bytes())
            .and_then(|()| buf.put(b": "))
            .and_then(|()| buf.put(value))
            .and_then(|()| buf.put(b"\r\n"));
        if result.is_err() {
            buf.truncate(start);
        }
        result
    }

    fn write_formatted<D: Display>(&mut self, buf: &mut HeadBuf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        let result = buf.put(name.as_bytes())
            .and_then(|()| buf.put(b": "))
            .and_then(|()| {
                let value_start = buf.len();
                buf.put_fmt(format_args!("{}", value))?;
                if invalid_header(buf.tail(value_start)) {
                    return Err(HeaderError::InvalidHeaderValue);
                }
                Ok(())
            })
            .and_then(|()| buf.put(b"\r\n"));
        if result.is_err() {
            buf.truncate(start);
        }
        result
    }

    /// Add a header to the message.
    ///
    /// `Content-Length` must be set using the `add_length` method and
    /// `Transfer-Encoding: chunked` with the `add_chunked` method. These
    /// two headers are important for the security of HTTP.
    ///
    /// We return Result here to make implementing proxies easier. In
    /// the application handler it's okay to unwrap the result and to
    /// get a meaningful panic (that is basically an assertion).
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut HeadBuf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers { ref mut date, ref mut server,
                      ref mut connection, .. } => {
                if name.eq_ignore_ascii_case("Date") {
                    *date = true;
                }
                if name.eq_ignore_ascii_case("Server") {
                    *server = true;
                }
                if name.eq_ignore_ascii_case("Connection") {
                    *connection = true;
                }
            }
            ref state => {
                panic!("Called add_header() method on a message in state \
                    {:?}", state)
            }
        }
        self.write_header(buf, name, value)
    }

    /// Same as `add_header` but allows value to be formatted directly
    /// into the buffer
    ///
    /// Useful for dates and numeric headers, as well as some strongly
    /// typed wrappers
    pub fn format_header<D: Display>(&mut self, buf: &mut HeadBuf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers { ref mut date, ref mut server,
                      ref mut connection, .. } => {
                if name.eq_ignore_ascii_case("Date") {
                    *date = true;
                }
                if name.eq_ignore_ascii_case("Server") {
                    *server = true;
                }
                if name.eq_ignore_ascii_case("Connection") {
                    *connection = true;
                }
            }
            ref state => {
                panic!("Called format_header() method on a message in state \
                    {:?}", state)
            }
        }
        self.write_formatted(buf, name, value)
    }

    /// Whether an engine `Date` header is still needed
    pub fn needs_date(&self) -> bool {
        matches!(*self, MessageState::Headers { date: false, .. })
    }
    /// Whether an engine `Server` header is still needed
    pub fn needs_server(&self) -> bool {
        matches!(*self, MessageState::Headers { server: false, .. })
    }

    /// Declare a fixed body length.
    ///
    /// The length is recorded; the actual `Content-Length` line is
    /// emitted by `done_headers` (a compressor may override the wire
    /// format, the declared length then only validates the body
    /// source).
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, n: u64) -> Result<(), HeaderError> {
        use self::MessageState::*;
        use self::HeaderError::*;
        use self::Body::*;
        match *self {
            Headers { framing: Some(Framing::Fixed(..)), .. }
            => Err(DuplicateContentLength),
            Headers { framing: Some(Framing::Chunked), .. }
            => Err(ContentLengthAfterTransferEncoding),
            Headers { body: Denied, .. } => Err(RequireBodyless),
            Headers { ref mut framing, .. } => {
                *framing = Some(Framing::Fixed(n));
                Ok(())
            }
            ref state => {
                panic!("Called add_length() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Declare the body as chunked.
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self) -> Result<(), HeaderError> {
        use self::MessageState::*;
        use self::HeaderError::*;
        use self::Body::*;
        match *self {
            Headers { framing: Some(Framing::Fixed(..)), .. }
            => Err(TransferEncodingAfterContentLength),
            Headers { framing: Some(Framing::Chunked), .. }
            => Err(DuplicateTransferEncoding),
            Headers { body: Denied, .. } => Err(RequireBodyless),
            Headers { ref mut framing, .. } => {
                *framing = Some(Framing::Chunked);
                Ok(())
            }
            ref state => {
                panic!("Called add_chunked() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Force `Connection: close` on a response that hasn't started yet
    ///
    /// Used by the engine for terminal responses on connections it is
    /// about to drop. No-op once the status line is written.
    pub fn force_close(&mut self) {
        use self::MessageState::*;
        match *self {
            ResponseStart { ref mut close, .. } |
            Headers { ref mut close, .. } => *close = true,
            _ => {}
        }
    }

    /// Returns true if at least `response_status()` has been called
    ///
    /// This is mostly useful to find out whether we can build an error
    /// page or it's already too late.
    pub fn is_started(&self) -> bool {
        !matches!(*self, MessageState::ResponseStart { .. })
    }

    /// Close the HTTP head, emitting the body-framing and connection
    /// headers
    ///
    /// The wire format is decided here: an active compressor forces
    /// chunked (and emits `Content-Encoding`); a declared length maps
    /// to `Content-Length`; everything else is chunked on HTTP/1.1 and
    /// close-delimited on HTTP/1.0.
    ///
    /// # Panics
    ///
    /// Panics when the response is in a wrong state.
    pub fn done_headers(&mut self, buf: &mut HeadBuf,
        compression: Option<compress::Method>)
        -> Result<HeadSummary, HeaderError>
    {
        use self::Body::*;
        use self::MessageState::*;
        let (version, body, mut close, framing, connection) = match *self {
            Headers { version, body, close, framing, connection, .. } => {
                (version, body, close, framing, connection)
            }
            ref state => {
                panic!("Called done_headers() method on message in state \
                    {:?}", state)
            }
        };
        if version == Version::Http09 {
            *self = BodyPhase {
                is_head: body == Head,
                declared: None,
                chunked: false,
            };
            return Ok(HeadSummary {
                expect_body: body != Denied && body != Head,
                chunked: false,
                close: true,
            });
        }
        let is_head = body == Head;
        let (summary, state) = match body {
            Denied => {
                (HeadSummary {
                    expect_body: false,
                    chunked: false,
                    close: close,
                }, Bodyless)
            }
            Normal | Head => match (compression, framing) {
                (Some(method), framing) => {
                    // compression is only negotiated on HTTP/1.1
                    debug_assert!(version == Version::Http11);
                    self.write_header(buf, "Content-Encoding",
                        method.token().as_bytes())?;
                    self.write_header(buf, "Transfer-Encoding", b"chunked")?;
                    (HeadSummary {
                        expect_body: !is_head,
                        chunked: true,
                        close: close,
                    }, BodyPhase {
                        is_head: is_head,
                        declared: framing.and_then(|f| match f {
                            Framing::Fixed(n) => Some(n),
                            Framing::Chunked => None,
                        }),
                        chunked: true,
                    })
                }
                (None, Some(Framing::Fixed(n))) => {
                    self.write_formatted(buf, "Content-Length", n)?;
                    (HeadSummary {
                        expect_body: !is_head,
                        chunked: false,
                        close: close,
                    }, BodyPhase {
                        is_head: is_head,
                        declared: Some(n),
                        chunked: false,
                    })
                }
                (None, _) => {
                    // chunked was requested or the length is unknown
                    let chunked = version >= Version::Http11;
                    if chunked {
                        self.write_header(buf,
                            "Transfer-Encoding", b"chunked")?;
                    } else {
                        // HTTP/1.0 delimits the body by closing
                        close = true;
                    }
                    (HeadSummary {
                        expect_body: !is_head,
                        chunked: chunked,
                        close: close,
                    }, BodyPhase {
                        is_head: is_head,
                        declared: None,
                        chunked: chunked,
                    })
                }
            }
        };
        // a handler that set its own Connection disposition (e.g.
        // `upgrade` on a 101) wins
        if !connection {
            if summary.close {
                self.write_header(buf, "Connection", b"close")?;
            } else {
                self.write_header(buf, "Connection", b"keep-alive")?;
            }
        }
        *self = state;
        buf.put(b"\r\n")?;
        Ok(summary)
    }

    /// Account body-source bytes against the declared length
    ///
    /// # Panics
    ///
    /// When more bytes are written than were declared, or when the
    /// message has no body phase.
    pub fn account_body(&mut self, len: usize) {
        use self::MessageState::*;
        match *self {
            Bodyless => panic!("Message must not contain body."),
            BodyPhase { declared: Some(ref mut left), .. } => {
                if len as u64 > *left {
                    panic!("Fixed size response error. \
                        Bytes left {} but got additional {}", left, len);
                }
                *left -= len as u64;
            }
            BodyPhase { declared: None, .. } => {}
            ref state => {
                panic!("Called account_body() method on message \
                    in state {:?}", state)
            }
        }
    }

    /// True for responses whose body must not reach the wire
    /// (HEAD requests)
    pub fn is_head(&self) -> bool {
        matches!(*self, MessageState::BodyPhase { is_head: true, .. })
    }

    /// Returns true if headers are already serialized
    pub fn is_after_headers(&self) -> bool {
        matches!(*self, MessageState::Bodyless | MessageState::Done |
            MessageState::BodyPhase { .. })
    }

    /// Returns true if `done()` method is already called
    pub fn is_complete(&self) -> bool {
        matches!(*self, MessageState::Done)
    }

    /// Mark the message as finished without validating the accounting
    ///
    /// Only for the raw-body escape hatch, where bytes bypass the
    /// serializer entirely.
    pub fn done_unchecked(&mut self) {
        *self = MessageState::Done;
    }

    /// Mark the message as finished, validating the body accounting
    ///
    /// The method may be called multiple times. The terminating chunk
    /// of a chunked body is emitted by the encoder, not here.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the body is not
    /// finished.
    pub fn done(&mut self) {
        use self::MessageState::*;
        match *self {
            Bodyless => *self = Done,
            // Don't check responses to HEAD requests: the body was
            // accounted but never staged.
            BodyPhase { is_head: true, .. } => *self = Done,
            BodyPhase { declared: Some(0), .. } |
            BodyPhase { declared: None, .. } => *self = Done,
            BodyPhase { declared: Some(left), .. } => {
                panic!("Tried to close message with {} bytes remaining.",
                       left)
            }
            Done => {}  // multiple invocations are okay.
            ref state => {
                panic!("Called done() method on response in state {:?}",
                       state);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use enums::Version;
    use super::{MessageState, Body, HeadBuf};

    fn run<F>(version: Version, body: Body, close: bool, fun: F) -> String
        where F: FnOnce(&mut MessageState, &mut HeadBuf)
    {
        let mut storage = [0u8; 4096];
        let mut len = 0;
        {
            let mut buf = HeadBuf::new(&mut storage, &mut len);
            let mut msg = MessageState::ResponseStart {
                version: version,
                body: body,
                close: close,
            };
            fun(&mut msg, &mut buf);
        }
        String::from_utf8_lossy(&storage[..len]).to_string()
    }

    #[test]
    fn minimal_response() {
        assert_eq!(run(Version::Http10, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                msg.add_length(0).unwrap();
                msg.done_headers(buf, None).unwrap();
            }),
            concat!("HTTP/1.0 200 OK\r\nContent-Length: 0\r\n",
                    "Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn close_response11() {
        assert_eq!(run(Version::Http11, Body::Normal, true,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                msg.add_length(0).unwrap();
                msg.done_headers(buf, None).unwrap();
            }),
            concat!("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n",
                    "Connection: close\r\n\r\n"));
    }

    #[test]
    fn head_response_keeps_length() {
        // The response to a HEAD request may contain the real body
        // length.
        assert_eq!(run(Version::Http11, Body::Head, false,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                msg.add_length(500).unwrap();
                let summary = msg.done_headers(buf, None).unwrap();
                assert!(!summary.expect_body);
            }),
            concat!("HTTP/1.1 200 OK\r\nContent-Length: 500\r\n",
                    "Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn informational_response() {
        // No response with an 1xx status code may contain a body length.
        assert_eq!(run(Version::Http11, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 142, "Foo").unwrap();
                msg.add_length(500).unwrap_err();
                msg.done_headers(buf, None).unwrap();
            }),
            "HTTP/1.1 142 Foo\r\nConnection: keep-alive\r\n\r\n");
    }

    #[test]
    fn unknown_length_is_chunked_on_11() {
        assert_eq!(run(Version::Http11, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                let summary = msg.done_headers(buf, None).unwrap();
                assert!(summary.chunked);
                assert!(!summary.close);
            }),
            concat!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n",
                    "Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn unknown_length_closes_on_10() {
        assert_eq!(run(Version::Http10, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                let summary = msg.done_headers(buf, None).unwrap();
                assert!(!summary.chunked);
                assert!(summary.close);
            }),
            "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn compression_overrides_fixed_length() {
        use compress::Method;
        assert_eq!(run(Version::Http11, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 200, "OK").unwrap();
                msg.add_length(11).unwrap();
                let summary =
                    msg.done_headers(buf, Some(Method::Brotli)).unwrap();
                assert!(summary.chunked);
                // the declared length still validates the body source
                msg.account_body(11);
                msg.done();
            }),
            concat!("HTTP/1.1 200 OK\r\nContent-Encoding: br\r\n",
                    "Transfer-Encoding: chunked\r\n",
                    "Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    #[should_panic(expected = "bytes remaining")]
    fn short_body_panics() {
        run(Version::Http11, Body::Normal, false, |msg, buf| {
            msg.response_status(buf, 200, "OK").unwrap();
            msg.add_length(5).unwrap();
            msg.done_headers(buf, None).unwrap();
            msg.account_body(3);
            msg.done();
        });
    }

    #[test]
    fn head_overflow_is_an_error() {
        use base_serializer::HeaderError;
        let mut storage = [0u8; 64];
        let mut len = 0;
        let mut buf = HeadBuf::new(&mut storage, &mut len);
        let mut msg = MessageState::ResponseStart {
            version: Version::Http11,
            body: Body::Normal,
            close: false,
        };
        msg.response_status(&mut buf, 200, "OK").unwrap();
        let err = msg.add_header(&mut buf, "X-Filler",
            &[b'x'; 128][..]).unwrap_err();
        assert!(matches!(err, HeaderError::HeadTooLarge));
    }

    #[test]
    fn bodyless_status() {
        assert_eq!(run(Version::Http11, Body::Normal, false,
            |msg, buf| {
                msg.response_status(buf, 204, "No Content").unwrap();
                let summary = msg.done_headers(buf, None).unwrap();
                assert!(!summary.expect_body);
            }),
            concat!("HTTP/1.1 204 No Content\r\n",
                    "Connection: keep-alive\r\n\r\n"));
    }

    #[test]
    fn date_and_server_are_tracked() {
        run(Version::Http11, Body::Normal, false, |msg, buf| {
            msg.response_status(buf, 200, "OK").unwrap();
            assert!(msg.needs_date());
            assert!(msg.needs_server());
            msg.add_header(buf, "Date",
                b"Thu, 01 Jan 1970 00:00:00 GMT").unwrap();
            assert!(!msg.needs_date());
            assert!(msg.needs_server());
        });
    }
}
