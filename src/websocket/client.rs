//! Client-side websocket handshake
//!
//! This is how outgoing fixed-buffer messaging sessions are opened:
//! connect a transport, run `HandshakeProto` over it, then hand the
//! framed halves to the messaging connection.

use std::str::from_utf8;

use futures::{Async, Future, Poll};
use httparse::{self, Header};
use tk_bufstream::{IoBuf, ReadBuf, ReadFramed, WriteBuf, WriteFramed};
use tokio_io::{AsyncRead, AsyncWrite};

use websocket::error::ErrorEnum;
use websocket::keys::{Accept, Key};
use websocket::{ClientCodec, Error};

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Authorizer sends all the necessary headers and checks response
/// headers to establish a websocket connection
///
/// The `SimpleAuthorizer` implementation is good enough for most
/// cases, but a custom authorizer may be helpful for `Cookie` or
/// `Authorization` headers.
pub trait Authorizer<S> {
    /// The type that may be returned from `headers_received`. It
    /// should encompass everything parsed from the response headers.
    type Result: Sized;
    /// Write request headers
    ///
    /// Websocket-specific headers like `Connection`, `Upgrade`, and
    /// `Sec-WebSocket-Key` are written automatically. But other
    /// important things like `Host`, `Origin`, `User-Agent` must be
    /// written by this method, as well as the path encoded in the
    /// request line.
    fn write_headers(&mut self, e: Encoder<S>) -> EncoderDone<S>;
    /// A handler of response headers
    ///
    /// It's called when the websocket has been successfully connected
    /// or when the server returned an error; the 101 status and the
    /// `Sec-WebSocket-Accept` value are verified by the protocol
    /// itself before this is invoked.
    fn headers_received(&mut self, headers: &Head)
        -> Result<Self::Result, Error>;
}

/// A borrowed structure that represents response headers
///
/// It's passed to `Authorizer::headers_received` and you are free to
/// store or discard any needed fields and headers from it.
#[derive(Debug)]
pub struct Head<'a> {
    code: u16,
    reason: &'a str,
    headers: &'a [Header<'a>],
}

/// This is a handshake request writer that you receive in
/// `Authorizer::write_headers`
pub struct Encoder<S> {
    buf: WriteBuf<S>,
    started: bool,
    done: bool,
}

/// A continuation returned from `Encoder::done`
pub struct EncoderDone<S> {
    buf: WriteBuf<S>,
}

/// A future that performs the client side of a websocket handshake
pub struct HandshakeProto<S, A> {
    input: Option<ReadBuf<S>>,
    output: Option<WriteBuf<S>>,
    authorizer: A,
    accept: String,
}

/// An authorizer that only sends the obligatory headers
pub struct SimpleAuthorizer {
    host: String,
    path: String,
}

impl SimpleAuthorizer {
    /// Create an authorizer for the host and path
    pub fn new<A, B>(host: A, path: B) -> SimpleAuthorizer
        where A: Into<String>,
              B: Into<String>,
    {
        SimpleAuthorizer {
            host: host.into(),
            path: path.into(),
        }
    }
}

impl<S> Authorizer<S> for SimpleAuthorizer {
    type Result = ();
    fn write_headers(&mut self, mut e: Encoder<S>) -> EncoderDone<S> {
        e.request_line(&self.path);
        e.add_header("Host", self.host.as_bytes());
        e.format_header("Origin",
            format_args!("http://{}{}", self.host, self.path));
        e.add_header("User-Agent",
            concat!("tk-fbm/", env!("CARGO_PKG_VERSION")).as_bytes());
        e.done()
    }
    fn headers_received(&mut self, _headers: &Head)
        -> Result<Self::Result, Error>
    {
        Ok(())
    }
}

fn check_header(name: &str) {
    if name.eq_ignore_ascii_case("Connection")
        || name.eq_ignore_ascii_case("Upgrade")
        || name.eq_ignore_ascii_case("Sec-WebSocket-Key")
        || name.eq_ignore_ascii_case("Sec-WebSocket-Version")
    {
        panic!("you shouldn't set websocket specific headers yourself");
    }
}

impl<S> Encoder<S> {
    /// Write the request line
    ///
    /// # Panics
    ///
    /// When the request line is already written.
    pub fn request_line(&mut self, path: &str) {
        use std::io::Write;
        assert!(!self.started, "request line is already written");
        write!(&mut self.buf.out_buf, "GET {} HTTP/1.1\r\n", path)
            .expect("buffer write never fails");
        self.started = true;
    }
    /// Add a header to the handshake request
    ///
    /// # Panics
    ///
    /// When the request line is not written yet, and when you add one
    /// of the special headers `Connection`, `Upgrade`,
    /// `Sec-WebSocket-*` which are set by the protocol itself.
    pub fn add_header(&mut self, name: &str, value: &[u8]) {
        use std::io::Write;
        assert!(self.started, "write the request line first");
        check_header(name);
        self.buf.out_buf.write_all(name.as_bytes()).unwrap();
        self.buf.out_buf.write_all(b": ").unwrap();
        self.buf.out_buf.write_all(value).unwrap();
        self.buf.out_buf.write_all(b"\r\n").unwrap();
    }
    /// Same as `add_header` but formats the value in place
    pub fn format_header(&mut self, name: &str,
        value: ::std::fmt::Arguments)
    {
        use std::io::Write;
        assert!(self.started, "write the request line first");
        check_header(name);
        self.buf.out_buf.write_all(name.as_bytes()).unwrap();
        self.buf.out_buf.write_all(b": ").unwrap();
        self.buf.out_buf.write_fmt(value).unwrap();
        self.buf.out_buf.write_all(b"\r\n").unwrap();
    }
    /// Finish the headers
    ///
    /// The websocket-specific headers and the key are appended here.
    pub fn done(mut self) -> EncoderDone<S> {
        use std::io::Write;
        assert!(!self.done, "done() called twice");
        self.done = true;
        let key = Key::new();
        write!(&mut self.buf.out_buf,
            "Connection: upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {}\r\n\
             \r\n", key)
            .expect("buffer write never fails");
        EncoderDone { buf: self.buf }
    }
}

pub(crate) fn expected_accept(out_buf: &::netbuf::Buf) -> String {
    // the key we generated is in the buffered request; digest it
    let data = &out_buf[..];
    let marker = b"Sec-WebSocket-Key: ";
    let start = data.windows(marker.len())
        .position(|w| w == marker)
        .expect("key header is always written") + marker.len();
    let end = start + data[start..].iter()
        .position(|&x| x == b'\r')
        .expect("key header is terminated");
    format!("{}", Accept::from_key_bytes(&data[start..end]))
}

impl<S, A: Authorizer<S>> HandshakeProto<S, A>
    where S: AsyncRead + AsyncWrite,
{
    /// Start a handshake over a freshly connected transport
    pub fn new(transport: S, mut authorizer: A) -> HandshakeProto<S, A> {
        let (tx, rx) = IoBuf::new(transport).split();
        let out = authorizer.write_headers(Encoder {
            buf: tx,
            started: false,
            done: false,
        }).buf;
        let accept = expected_accept(&out.out_buf);
        HandshakeProto {
            authorizer: authorizer,
            input: Some(rx),
            output: Some(out),
            accept: accept,
        }
    }

    fn parse_headers(&mut self) -> Result<Option<A::Result>, Error> {
        let (result, bytes) = {
            let buf = &mut self.input.as_mut()
                .expect("buffer still exists")
                .in_buf;
            let mut vec;
            let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let (code, reason, headers, bytes) = {
                let mut raw = httparse::Response::new(&mut headers);
                let mut result = raw.parse(&buf[..]);
                if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                    vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                    raw = httparse::Response::new(&mut vec);
                    result = raw.parse(&buf[..]);
                }
                match result.map_err(ErrorEnum::HeaderError)? {
                    httparse::Status::Complete(bytes) => {
                        (raw.code.unwrap(), raw.reason.unwrap_or(""),
                         raw.headers, bytes)
                    }
                    httparse::Status::Partial => return Ok(None),
                }
            };
            if code != 101 {
                return Err(ErrorEnum::HandshakeRefused(code).into());
            }
            let mut accepted = false;
            for h in headers.iter() {
                if h.name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
                    let value = from_utf8(h.value).unwrap_or("").trim();
                    accepted = value == self.accept;
                }
            }
            if !accepted {
                debug!("Websocket accept header is wrong or missing");
                return Err(ErrorEnum::HandshakeRefused(code).into());
            }
            let head = Head {
                code: code,
                reason: reason,
                headers: headers,
            };
            let result = self.authorizer.headers_received(&head)?;
            (result, bytes)
        };
        self.input.as_mut().expect("buffer still exists")
            .in_buf.consume(bytes);
        Ok(Some(result))
    }
}

impl<'a> Head<'a> {
    /// Raw status code and reason of the response
    pub fn raw_status(&self) -> (u16, &'a str) {
        (self.code, self.reason)
    }
    /// All headers of the handshake response
    pub fn headers(&self) -> &'a [Header<'a>] {
        self.headers
    }
}

impl<S, A> Future for HandshakeProto<S, A>
    where A: Authorizer<S>,
          S: AsyncRead + AsyncWrite,
{
    type Item = (WriteFramed<S, ClientCodec>, ReadFramed<S, ClientCodec>,
                 A::Result);
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Error> {
        self.output.as_mut().expect("poll after complete").flush()?;
        self.input.as_mut().expect("poll after complete").read()?;
        if self.input.as_ref().expect("poll after complete").done() {
            return Err(ErrorEnum::PrematureResponse.into());
        }
        match self.parse_headers()? {
            Some(result) => {
                let inp = self.input.take()
                    .expect("input still here")
                    .framed(ClientCodec);
                let out = self.output.take()
                    .expect("output still here")
                    .framed(ClientCodec);
                Ok(Async::Ready((out, inp, result)))
            }
            None => Ok(Async::NotReady),
        }
    }
}
