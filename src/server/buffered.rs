//! Higher-level interface for serving fully buffered requests
//!
use std::marker::PhantomData;
use std::net::SocketAddr;

use futures::future::{ok, FutureResult, Map};
use futures::{Async, Future};
use tk_bufstream::{ReadBuf, ReadFramed, WriteBuf, WriteFramed};
use tokio_core::reactor::Handle;

use enums::{Method, Version};
use form::{self, FormData};
use server::websocket::get_handshake;
use server::{Codec, Dispatcher, Encoder, EncoderDone, Error, Head};
use server::{Outcome, RecvMode, WebsocketHandshake};
use websocket::ServerCodec;

/// Buffered request struct
///
/// Everything is copied out of the connection buffer, so the request
/// owns its data and can be freely moved into response futures.
#[derive(Debug)]
pub struct Request {
    peer_addr: SocketAddr,
    method: Method,
    path: String,
    host: Option<String>,
    version: Version,
    headers: Vec<(String, Vec<u8>)>,
    query: FormData,
    fragment: Option<String>,
    body: Vec<u8>,
    websocket_handshake: Option<WebsocketHandshake>,
}

/// A dispatcher that buffers the whole request and passes it to a
/// service function
pub struct BufferedDispatcher<S, N: NewService<S>> {
    addr: SocketAddr,
    max_request_length: usize,
    service: N,
    handle: Handle,
    phantom: PhantomData<S>,
}

/// The codec of `BufferedDispatcher`
pub struct BufferedCodec<R> {
    max_request_length: usize,
    service: R,
    request: Option<Request>,
    handle: Handle,
}

/// Service factory that also serves websockets
pub struct WebsocketFactory<F, G> {
    service: F,
    websockets: G,
}

/// An instance of `WebsocketFactory` service
pub struct WebsocketService<F, G, T, U> {
    service: F,
    websockets: G,
    phantom: PhantomData<(T, U)>,
}

/// A factory of per-request service instances
pub trait NewService<S> {
    /// Future returned by the service
    type Future: Future<Item=EncoderDone<S>, Error=Error>;
    /// The service instance
    type Instance: Service<S, Future=Self::Future>;
    /// Create a service instance for one request
    fn new(&self) -> Self::Instance;
}

/// A buffered request handler
pub trait Service<S> {
    /// Future that writes the response
    type Future: Future<Item=EncoderDone<S>, Error=Error>;
    /// Future that drives a websocket connection after an upgrade
    type WebsocketFuture: Future<Item=(), Error=()> + 'static;
    /// Handle a request
    fn call(&mut self, request: Request, encoder: Encoder<S>)
        -> Self::Future;
    /// Take over an upgraded websocket connection
    fn start_websocket(&mut self, output: WriteFramed<S, ServerCodec>,
                                  input: ReadFramed<S, ServerCodec>)
        -> Self::WebsocketFuture;
}

impl Request {
    /// Returns the peer address that initiated the HTTP connection
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
    /// Returns the method of the request
    pub fn method(&self) -> Method {
        self.method
    }
    /// Returns the path of the request, with the query string
    pub fn path(&self) -> &str {
        &self.path
    }
    /// Returns the host the request is addressed to
    pub fn host(&self) -> Option<&str> {
        self.host.as_ref().map(|x| &x[..])
    }
    /// Returns the HTTP version used in the request
    pub fn version(&self) -> Version {
        self.version
    }
    /// Returns the request headers (trailers of a chunked body
    /// included, in order)
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }
    /// The decoded query string
    pub fn query(&self) -> &FormData {
        &self.query
    }
    /// The fragment of the request target, if the client sent one
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_ref().map(|x| &x[..])
    }
    /// Returns the request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
    /// Decode an `application/x-www-form-urlencoded` body
    ///
    /// Returns `None` when the content type doesn't match.
    pub fn form(&self) -> Option<FormData> {
        let ctype = self.header("Content-Type")?;
        let text = ::std::str::from_utf8(ctype).ok()?;
        if !text.trim()
            .to_lowercase()
            .starts_with("application/x-www-form-urlencoded")
        {
            return None;
        }
        Some(FormData::parse(&self.body))
    }
    /// Decode a `multipart/form-data` body
    ///
    /// Returns `None` when the content type doesn't match.
    pub fn multipart(&self)
        -> Option<Result<Vec<form::Part>, form::MultipartError>>
    {
        let boundary = form::boundary(self.header("Content-Type")?)?;
        Some(form::parse_multipart(&self.body, &boundary))
    }
    /// Returns the websocket handshake if this is an upgrade request
    pub fn websocket_handshake(&self) -> Option<&WebsocketHandshake> {
        self.websocket_handshake.as_ref()
    }
}

impl<S, T, R> NewService<S> for T
    where T: Fn() -> R,
          R: Service<S>,
{
    type Future = R::Future;
    type Instance = R;
    fn new(&self) -> R {
        (self)()
    }
}

impl<S, T, F> Service<S> for T
    where T: Fn(Request, Encoder<S>) -> F,
          F: Future<Item=EncoderDone<S>, Error=Error>,
{
    type Future = F;
    type WebsocketFuture = FutureResult<(), ()>;
    fn call(&mut self, request: Request, encoder: Encoder<S>) -> F {
        (self)(request, encoder)
    }
    fn start_websocket(&mut self, _output: WriteFramed<S, ServerCodec>,
                                  _input: ReadFramed<S, ServerCodec>)
        -> Self::WebsocketFuture
    {
        // no websockets here
        ok(())
    }
}

impl<F, G, H, I, T, U, S> NewService<S> for WebsocketFactory<F, G>
    where F: Fn() -> H,
          H: FnMut(Request, Encoder<S>) -> T,
          G: Fn() -> I,
          I: FnMut(WriteFramed<S, ServerCodec>,
                   ReadFramed<S, ServerCodec>) -> U,
          T: Future<Item=EncoderDone<S>, Error=Error>,
          U: Future<Item=(), Error=()> + 'static,
{
    type Future = T;
    type Instance = WebsocketService<H, I, T, U>;
    fn new(&self) -> Self::Instance {
        WebsocketService {
            service: (self.service)(),
            websockets: (self.websockets)(),
            phantom: PhantomData,
        }
    }
}

impl<S, H, I, T, U> Service<S> for WebsocketService<H, I, T, U>
    where H: FnMut(Request, Encoder<S>) -> T,
          I: FnMut(WriteFramed<S, ServerCodec>,
                   ReadFramed<S, ServerCodec>) -> U,
          T: Future<Item=EncoderDone<S>, Error=Error>,
          U: Future<Item=(), Error=()> + 'static,
{
    type Future = T;
    type WebsocketFuture = U;
    fn call(&mut self, request: Request, encoder: Encoder<S>) -> T {
        (self.service)(request, encoder)
    }
    fn start_websocket(&mut self, output: WriteFramed<S, ServerCodec>,
                                  input: ReadFramed<S, ServerCodec>)
        -> U
    {
        (self.websockets)(output, input)
    }
}

impl<S, N: NewService<S>> BufferedDispatcher<S, N> {
    /// Create a dispatcher for a service factory
    pub fn new(addr: SocketAddr, handle: &Handle, service: N)
        -> BufferedDispatcher<S, N>
    {
        BufferedDispatcher {
            addr: addr,
            max_request_length: 10_485_760,
            service: service,
            handle: handle.clone(),
            phantom: PhantomData,
        }
    }
    /// Limit the size of a buffered request body
    ///
    /// Bodies are buffered in the form-data segment, so the effective
    /// limit is the smaller of this value and the segment size.
    pub fn max_request_length(&mut self, value: usize) {
        self.max_request_length = value;
    }
}

impl<S, F, G, H, I, T, U> BufferedDispatcher<S, WebsocketFactory<F, G>>
    where F: Fn() -> H,
          H: FnMut(Request, Encoder<S>) -> T,
          G: Fn() -> I,
          I: FnMut(WriteFramed<S, ServerCodec>,
                   ReadFramed<S, ServerCodec>) -> U,
          T: Future<Item=EncoderDone<S>, Error=Error>,
          U: Future<Item=(), Error=()> + 'static,
{
    /// Create a dispatcher that serves both plain requests and
    /// websockets
    pub fn new_with_websockets(addr: SocketAddr, handle: &Handle,
        http: F, websockets: G)
        -> BufferedDispatcher<S, WebsocketFactory<F, G>>
    {
        BufferedDispatcher {
            addr: addr,
            max_request_length: 10_485_760,
            service: WebsocketFactory {
                service: http,
                websockets: websockets,
            },
            handle: handle.clone(),
            phantom: PhantomData,
        }
    }
}

impl<S, N: NewService<S>> Dispatcher<S> for BufferedDispatcher<S, N>
    where N::Instance: 'static
{
    type Codec = BufferedCodec<N::Instance>;

    fn headers_received(&mut self, headers: &Head)
        -> Result<Self::Codec, Error>
    {
        let websocket = match get_handshake(headers) {
            Ok(hs) => hs,
            Err(()) => return Err(Error::BadRequestTarget),
        };
        Ok(BufferedCodec {
            max_request_length: self.max_request_length,
            service: self.service.new(),
            request: Some(Request {
                peer_addr: self.addr,
                method: headers.method(),
                path: headers.path().to_string(),
                host: headers.host().map(|x| x.to_string()),
                version: headers.version(),
                headers: headers.headers().iter().map(|header| {
                    (header.name.to_string(), header.value.to_vec())
                }).collect(),
                query: headers.query_pairs(),
                fragment: headers.fragment().map(|x| x.to_string()),
                body: Vec::new(),
                websocket_handshake: websocket,
            }),
            handle: self.handle.clone(),
        })
    }
}

impl<S, R: Service<S> + 'static> Codec<S> for BufferedCodec<R> {
    type ResponseFuture = Map<R::Future,
        fn(EncoderDone<S>) -> Outcome<S>>;
    fn recv_mode(&mut self) -> RecvMode {
        if self.request.as_ref()
            .expect("request is not dispatched yet")
            .websocket_handshake.is_some()
        {
            RecvMode::hijack()
        } else {
            RecvMode::buffered(self.max_request_length)
        }
    }
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<Async<usize>, Error>
    {
        assert!(end);
        self.request.as_mut()
            .expect("request is not dispatched yet")
            .body = data.to_vec();
        Ok(Async::Ready(data.len()))
    }
    fn trailers_received(&mut self, trailers: &[(String, Vec<u8>)])
        -> Result<(), Error>
    {
        self.request.as_mut()
            .expect("request is not dispatched yet")
            .headers.extend(trailers.iter().cloned());
        Ok(())
    }
    fn start_response(&mut self, e: Encoder<S>) -> Self::ResponseFuture {
        self.service.call(
            self.request.take().expect("request is dispatched once"), e)
            .map(Outcome::Done as fn(EncoderDone<S>) -> Outcome<S>)
    }
    fn hijack(&mut self, write_buf: WriteBuf<S>, read_buf: ReadBuf<S>) {
        let inp = read_buf.framed(ServerCodec);
        let out = write_buf.framed(ServerCodec);
        self.handle.spawn(self.service.start_websocket(out, inp));
    }
}
