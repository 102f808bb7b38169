use std::str::from_utf8;

use httparse;

use enums::{Method, Version};
use form::FormData;
use headers::{is_chunked, is_close, is_continue, is_keep_alive, is_upgrade};
use server::{Config, Dispatcher, Error, RequestTarget};
use server::request_target::{split_fragment, split_query};

/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

static NO_HEADERS: [httparse::Header<'static>; 0] = [];

/// How the request body is delimited
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    /// Fixed number of bytes; requests without body headers are
    /// `Fixed(0)`
    Fixed(u64),
    /// Chunked transfer encoding
    Chunked,
}

/// A borrowed structure that represents request headers
///
/// It's passed to `Dispatcher::headers_received` and you are free to
/// store or discard any needed fields and headers from it. All views
/// point into the request-header segment and live only for the current
/// connection turn.
///
/// Note, we don't strip hop-by-hop headers (`Connection: close`,
/// `Transfer-Encoding`) and we use them to ensure correctness of the
/// protocol. You must skip them if proxying headers somewhere.
#[derive(Debug)]
pub struct Head<'a> {
    method: Method,
    version: Version,
    raw_target: &'a str,
    target: RequestTarget<'a>,
    fragment: Option<&'a str>,
    host: Option<&'a str>,
    headers: &'a [httparse::Header<'a>],
    body_kind: BodyKind,
    connection_close: bool,
    expect_continue: bool,
    upgrade: bool,
}

/// Owned per-turn facts the connection engine keeps after the borrowed
/// head is gone
#[derive(Debug, Clone)]
pub(crate) struct RequestSetup {
    pub version: Version,
    pub is_head: bool,
    pub close: bool,
    pub body: BodyKind,
    pub expect_continue: bool,
    pub accept_encoding: Option<Vec<u8>>,
}

struct Scan<'a> {
    body: BodyKind,
    close: bool,
    expect_continue: bool,
    connection_upgrade: bool,
    upgrade_header: bool,
    host: Option<&'a str>,
    accept_encoding: Option<&'a [u8]>,
}

fn scan_headers<'a>(version: Version, headers: &[httparse::Header<'a>])
    -> Result<Scan<'a>, Error>
{
    // Implements the body length algorithm for requests:
    // http://httpwg.github.io/specs/rfc7230.html#message.body.length
    //
    // The length of a request body is determined by one of the
    // following (in order of precedence):
    //
    // 1. A valid `Transfer-Encoding` header ending with `chunked`
    //    makes the request chunked
    // 2. A valid `Content-Length` header gives the length in octets
    // 3. If neither is present the request has an empty body
    //
    // A request carrying both is rejected outright.
    use self::BodyKind::*;
    let mut chunked = false;
    let mut content_length = None::<u64>;
    let mut close_token = false;
    let mut keep_alive_token = false;
    let mut connection_upgrade = false;
    let mut upgrade_header = false;
    let mut expect_continue = false;
    let mut host = None;
    let mut accept_encoding = None;
    for header in headers.iter() {
        if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            if content_length.is_some() {
                return Err(Error::ConflictingBodyHeaders);
            }
            match header.value.split(|&x| x == b',').last() {
                Some(enc) if is_chunked(enc) => chunked = true,
                _ => return Err(Error::BadTransferEncoding),
            }
        } else if header.name.eq_ignore_ascii_case("Content-Length") {
            if content_length.is_some() {
                return Err(Error::DuplicateContentLength);
            }
            if chunked {
                return Err(Error::ConflictingBodyHeaders);
            }
            let s = from_utf8(header.value)
                .map_err(|_| Error::ContentLengthInvalid)?;
            let len = s.trim().parse()
                .map_err(|_| Error::ContentLengthInvalid)?;
            content_length = Some(len);
        } else if header.name.eq_ignore_ascii_case("Host") {
            if host.is_some() {
                return Err(Error::DuplicateHost);
            }
            let value = from_utf8(header.value)
                .map_err(|_| Error::HostInvalid)?
                .trim();
            if value.len() == 0 {
                return Err(Error::HostInvalid);
            }
            host = Some(value);
        } else if header.name.eq_ignore_ascii_case("Connection") {
            for token in header.value.split(|&x| x == b',') {
                if is_close(token) {
                    close_token = true;
                } else if is_keep_alive(token) {
                    keep_alive_token = true;
                } else if is_upgrade(token) {
                    connection_upgrade = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("Expect") {
            if is_continue(header.value) {
                expect_continue = true;
            }
        } else if header.name.eq_ignore_ascii_case("Upgrade") {
            upgrade_header = true;
        } else if header.name.eq_ignore_ascii_case("Accept-Encoding") {
            if accept_encoding.is_none() {
                accept_encoding = Some(header.value);
            }
        }
    }
    let close = match version {
        Version::Http09 => true,
        Version::Http10 => !keep_alive_token,
        Version::Http11 => close_token,
    };
    Ok(Scan {
        body: if chunked {
            Chunked
        } else {
            Fixed(content_length.unwrap_or(0))
        },
        close: close,
        expect_continue: expect_continue,
        connection_upgrade: connection_upgrade,
        upgrade_header: upgrade_header,
        host: host,
        accept_encoding: accept_encoding,
    })
}

fn build_head<'a>(method: Method, version: Version, raw_target: &'a str,
    headers: &'a [httparse::Header<'a>], config: &Config)
    -> Result<(Head<'a>, Scan<'a>), Error>
{
    let scan = scan_headers(version, headers)?;
    let (target, fragment) = split_fragment(raw_target);
    let target = RequestTarget::parse(target)
        .ok_or(Error::BadRequestTarget)?;
    let mut host = scan.host;
    if let RequestTarget::Absolute { authority, .. } = target {
        match host {
            Some(host_value) => {
                if !authority.eq_ignore_ascii_case(host_value)
                    && !config.allow_proxy_target
                {
                    return Err(Error::HostMismatch);
                }
            }
            None => {
                host = Some(authority);
            }
        }
    }
    if version == Version::Http11 && host.is_none() {
        return Err(Error::MissingHost);
    }
    let head = Head {
        method: method,
        version: version,
        raw_target: raw_target,
        target: target,
        fragment: fragment,
        host: host,
        headers: headers,
        body_kind: scan.body,
        connection_close: scan.close,
        expect_continue: scan.expect_continue,
        upgrade: scan.connection_upgrade && scan.upgrade_header,
    };
    Ok((head, scan))
}

fn parse_09_line(data: &[u8]) -> Result<Option<(&str, usize)>, Error> {
    let line_end = match data.windows(2).position(|w| w == b"\r\n") {
        Some(x) => x,
        None => return Ok(None),
    };
    let line = from_utf8(&data[..line_end])
        .map_err(|_| Error::BadRequestTarget)?;
    let mut words = line.split(' ').filter(|w| w.len() > 0);
    let method = words.next().ok_or(Error::BadRequestTarget)?;
    let target = words.next().ok_or(Error::BadRequestTarget)?;
    if words.next().is_some() {
        return Err(Error::BadRequestTarget);
    }
    // only the original single-line GET exists in HTTP/0.9
    if method != "GET" {
        return Err(Error::UnsupportedVersion);
    }
    Ok(Some((target, line_end + 2)))
}

/// Parse one request head from the request-header segment and hand it
/// to the dispatcher
///
/// Returns `None` when the data is incomplete. On success yields the
/// codec, the owned per-turn setup and the number of bytes the head
/// occupied.
pub(crate) fn parse_request<S, D>(data: &[u8], dispatcher: &mut D,
    config: &Config)
    -> Result<Option<(D::Codec, RequestSetup, usize)>, Error>
    where D: Dispatcher<S>
{
    let mut vec;
    let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut raw = httparse::Request::new(&mut headers);
    let mut result = raw.parse(data);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut vec);
        result = raw.parse(data);
    }
    let bytes = match result {
        Ok(httparse::Status::Complete(bytes)) => bytes,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::Version) => {
            // a line without " HTTP/x.x" is an ancient 0.9 request
            let (target, bytes) = match parse_09_line(data)? {
                Some(x) => x,
                None => return Ok(None),
            };
            let (head, _) = build_head(Method::Get, Version::Http09,
                target, &NO_HEADERS[..], config)?;
            let setup = RequestSetup {
                version: Version::Http09,
                is_head: false,
                close: true,
                body: BodyKind::Fixed(0),
                expect_continue: false,
                accept_encoding: None,
            };
            let codec = dispatcher.headers_received(&head)?;
            return Ok(Some((codec, setup, bytes)));
        }
        Err(e) => return Err(Error::ParseError(e)),
    };
    let method = Method::from_token(raw.method.unwrap());
    if method == Method::Unsupported {
        return Err(Error::UnknownMethod);
    }
    let version = if raw.version.unwrap() == 1 {
        Version::Http11
    } else {
        Version::Http10
    };
    let (head, scan) = build_head(method, version, raw.path.unwrap(),
        raw.headers, config)?;
    let setup = RequestSetup {
        version: version,
        is_head: method == Method::Head,
        close: scan.close,
        body: scan.body,
        expect_continue: scan.expect_continue,
        accept_encoding: scan.accept_encoding.map(|x| x.to_vec()),
    };
    let codec = dispatcher.headers_received(&head)?;
    Ok(Some((codec, setup, bytes)))
}

/// The error for a header segment that filled up while the head is
/// still incomplete
///
/// If not even the request line fit, it's the request target that is
/// too long; otherwise the header block is.
pub(crate) fn overflow_error(data: &[u8]) -> Error {
    match data.windows(2).position(|w| w == b"\r\n") {
        Some(..) => Error::HeaderTooLarge,
        None => Error::RequestTargetTooLong,
    }
}

impl<'a> Head<'a> {
    /// Request method
    pub fn method(&self) -> Method {
        self.method
    }
    /// Request version
    pub fn version(&self) -> Version {
        self.version
    }
    /// The target as written on the request line, fragment included
    pub fn raw_target(&self) -> &'a str {
        self.raw_target
    }
    /// The parsed request target (fragment stripped)
    pub fn target(&self) -> &RequestTarget<'a> {
        &self.target
    }
    /// Path with the query string, without the fragment
    pub fn path(&self) -> &'a str {
        self.target.path_and_query()
    }
    /// The fragment of the request target, if the client sent one
    pub fn fragment(&self) -> Option<&'a str> {
        self.fragment
    }
    /// Raw query string (after `?`, before any fragment)
    pub fn query(&self) -> Option<&'a str> {
        split_query(self.target.path_and_query()).1
    }
    /// Query decoded into a multimap
    pub fn query_pairs(&self) -> FormData {
        match self.query() {
            Some(query) => FormData::parse(query.as_bytes()),
            None => FormData::empty(),
        }
    }
    /// The authority the request is addressed to
    ///
    /// Either the `Host` header or the authority of an absolute-form
    /// target.
    pub fn host(&self) -> Option<&'a str> {
        self.host
    }
    /// All headers of the request in their original order
    pub fn headers(&self) -> &'a [httparse::Header<'a>] {
        self.headers
    }
    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers.iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
    /// How the request body is delimited
    pub fn body_kind(&self) -> BodyKind {
        self.body_kind
    }
    /// True if the request announces a body
    pub fn has_body(&self) -> bool {
        self.body_kind != BodyKind::Fixed(0)
    }
    /// True if the client asked to close the connection after this
    /// request (or the protocol defaults to closing)
    pub fn connection_close(&self) -> bool {
        self.connection_close
    }
    /// True for requests with `Expect: 100-continue`
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }
    /// True when both `Connection: upgrade` and an `Upgrade` header
    /// are present
    pub fn upgrade_requested(&self) -> bool {
        self.upgrade
    }
}
