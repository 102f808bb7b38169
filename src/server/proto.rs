use std::cmp::min;
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Async, Future, Poll};
use httparse;
use tk_bufstream::IoBuf;
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use body_parser::{BodyProgress, BodyStep};
use buffer::{Block, Pool, Seg};
use chunked;
use enums::Version;
use server::encoder::{self, EncoderDone, ResponseSetup};
use server::headers::{overflow_error, parse_request};
use server::headers::{BodyKind, RequestSetup};
use server::recv_mode::Mode;
use server::simple_error_page::{self, ErrorPage, OVERLOADED};
use server::{Codec, Config, Dispatcher, Error, Outcome};

const CONTINUE_LINE: &'static [u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// A low-level HTTP/1.x server protocol handler
///
/// One instance drives one connection: it parses request heads into
/// the request-header segment of the pooled buffer block, streams the
/// body through the scratch segments, hands an `Encoder` to the codec
/// and flushes the response tail, then either keeps the connection
/// alive for the next turn or closes it.
///
/// Requests are strictly sequential: the next head is not parsed until
/// the previous response is fully flushed.
pub struct Proto<S, D: Dispatcher<S>> {
    dispatcher: D,
    config: Arc<Config>,
    handle: Handle,
    peer: SocketAddr,
    secure: bool,
    state: State<S, D::Codec>,
    // bytes received beyond the current turn; strict request ordering
    // keeps this tiny and usually empty
    carry: Vec<u8>,
    turns: usize,
    timeout: Timeout,
}

struct BodyState {
    raw_start: usize,
    raw_len: usize,
    // payload bytes accumulated in the form segment
    buffered: usize,
    // prefix of `buffered` already consumed by a progressive codec
    delivered: usize,
    limit: usize,
    trailer_start: usize,
    trailer_len: usize,
    trailers_done: bool,
    continue_sent: usize,
    continue_needed: bool,
    decoded_all: bool,
}

enum State<S, C: Codec<S>> {
    ReadingHeaders {
        sock: S,
        block: Block,
        filled: usize,
        keep_alive: bool,
    },
    ReadingBody {
        sock: S,
        block: Block,
        codec: C,
        setup: RequestSetup,
        mode: Mode,
        progress: BodyProgress,
        body: BodyState,
        started: Instant,
    },
    Dispatching {
        fut: C::ResponseFuture,
        codec: Option<C>,
        hijack: bool,
        started: Instant,
    },
    Flushing {
        done: EncoderDone<S>,
        codec: Option<C>,
        hijack: bool,
        error: Option<Error>,
    },
    SendError {
        sock: S,
        block: Block,
        page: ErrorPage,
        head_sent: usize,
        body_sent: usize,
        error: Option<Error>,
    },
    SendStatic {
        sock: S,
        sent: usize,
        error: Option<Error>,
    },
    Closed,
    Void,
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl<S, D> Proto<S, D>
    where S: AsyncRead + AsyncWrite,
          D: Dispatcher<S>,
{
    /// Create a protocol handler for an accepted connection
    ///
    /// The buffer block is rented from the pool here; if the pool is
    /// exhausted the connection is answered with a bare 503 and
    /// closed.
    pub fn new(conn: S, peer: SocketAddr, pool: &Pool,
        cfg: &Arc<Config>, dispatcher: D, handle: &Handle)
        -> Proto<S, D>
    {
        let state = match pool.allocate() {
            Ok(block) => State::ReadingHeaders {
                sock: conn,
                block: block,
                filled: 0,
                keep_alive: false,
            },
            Err(..) => {
                warn!("{}: buffer pool exhausted, rejecting connection",
                    peer);
                State::SendStatic {
                    sock: conn,
                    sent: 0,
                    error: Some(Error::PoolExhausted),
                }
            }
        };
        Proto {
            dispatcher: dispatcher,
            config: cfg.clone(),
            handle: handle.clone(),
            peer: peer,
            secure: false,
            state: state,
            carry: Vec::new(),
            turns: 0,
            timeout: Timeout::new(cfg.first_byte_timeout, handle)
                .expect("can always set a timeout"),
        }
    }

    /// Mark the connection as running over an encrypted transport
    ///
    /// The engine doesn't touch TLS itself; the flag is kept for
    /// handlers and logging.
    pub fn secure(mut self, value: bool) -> Self {
        self.secure = value;
        self
    }

    fn set_deadline(&mut self, duration: Duration) {
        self.timeout = Timeout::new(duration, &self.handle)
            .expect("can always set a timeout");
    }

    fn log_error(&self, e: &Error) {
        if e.is_capacity() {
            warn!("{}{}: closing connection: {}", self.peer,
                if self.secure { " (tls)" } else { "" }, e);
        } else {
            info!("{}{}: closing connection: {}", self.peer,
                if self.secure { " (tls)" } else { "" }, e);
        }
    }

    // Close with an error. When the error maps to a terminal status
    // and we still own the transport, a page is staged and the state
    // machine continues in SendError; otherwise the error propagates
    // right away.
    fn error_close(&mut self, parts: Option<(S, Block)>, e: Error)
        -> Result<(), Error>
    {
        self.log_error(&e);
        let status = match e.status() {
            Some(status) => status,
            None => {
                self.state = State::Closed;
                return Err(e);
            }
        };
        let (sock, mut block) = match parts {
            Some(parts) => parts,
            None => {
                self.state = State::Closed;
                return Err(e);
            }
        };
        // the request that failed may be of any version; answer in
        // the common tongue
        block.start_turn();
        block.start_response();
        match simple_error_page::render(status, Version::Http11,
            &mut block, &self.config)
        {
            Ok(page) => {
                self.state = State::SendError {
                    sock: sock,
                    block: block,
                    page: page,
                    head_sent: 0,
                    body_sent: 0,
                    error: Some(e),
                };
                let timeout = self.config.output_body_byte_timeout;
                self.set_deadline(timeout);
                Ok(())
            }
            Err(..) => {
                self.state = State::Closed;
                Err(e)
            }
        }
    }

    fn start_dispatch(&mut self, sock: S, block: Block, mut codec: D::Codec,
        setup: RequestSetup, hijack: bool)
    {
        let cap_reached = self.config.max_request_turns
            .map(|max| self.turns + 1 >= max)
            .unwrap_or(false);
        let do_close = setup.close || cap_reached
            || setup.version == Version::Http09;
        let compression = match (&self.config.compression,
                                 &setup.accept_encoding)
        {
            (&Some(ref registry), &Some(ref tokens))
                if setup.version == Version::Http11 && !setup.is_head
                    && !hijack
            => registry.negotiate(tokens),
            _ => None,
        };
        let enc = encoder::new(sock, block, &self.config, ResponseSetup {
            version: setup.version,
            is_head: setup.is_head,
            do_close: do_close,
            compression: compression,
        });
        let fut = codec.start_response(enc);
        self.turns += 1;
        self.state = State::Dispatching {
            fut: fut,
            codec: Some(codec),
            hijack: hijack,
            started: Instant::now(),
        };
        let timeout = self.config.output_body_whole_timeout;
        self.set_deadline(timeout);
    }

    fn input_deadline(&mut self, started: Instant) {
        let whole = self.config.input_body_whole_timeout;
        let byte = self.config.input_body_byte_timeout;
        let elapsed = started.elapsed();
        let left = if whole > elapsed {
            whole - elapsed
        } else {
            Duration::new(0, 0)
        };
        self.set_deadline(min(byte, left));
    }

    // A parsed head becomes either a body-reading state or goes
    // straight to dispatch
    fn begin_turn(&mut self, sock: S, block: Block, mut codec: D::Codec,
        setup: RequestSetup, head_bytes: usize)
    {
        let mode = codec.recv_mode().mode;
        if mode == Mode::Hijack {
            self.start_dispatch(sock, block, codec, setup, true);
            return;
        }
        let form_size = block.form().len();
        let limit = match mode {
            Mode::Buffered(max) => min(max, form_size),
            _ => form_size,
        };
        let progress = match setup.body {
            BodyKind::Fixed(n) => BodyProgress::Fixed(n),
            BodyKind::Chunked => {
                BodyProgress::Chunked(chunked::State::new())
            }
        };
        let continue_needed = setup.expect_continue
            && setup.version == Version::Http11
            && setup.body != BodyKind::Fixed(0);
        let started = Instant::now();
        self.state = State::ReadingBody {
            sock: sock,
            block: block,
            codec: codec,
            setup: setup,
            mode: mode,
            progress: progress,
            body: BodyState {
                raw_start: 0,
                raw_len: 0,
                buffered: 0,
                delivered: 0,
                limit: limit,
                trailer_start: head_bytes,
                trailer_len: 0,
                trailers_done: false,
                continue_sent: 0,
                continue_needed: continue_needed,
                decoded_all: false,
            },
            started: started,
        };
        self.input_deadline(started);
    }

    // Drive body reading; Ready means the body is complete and fully
    // delivered to the codec
    fn read_body(&mut self, sock: &mut S, block: &mut Block,
        codec: &mut D::Codec, mode: Mode, progress: &mut BodyProgress,
        body: &mut BodyState, started: Instant)
        -> Poll<(), Error>
    {
        // the interim 100 goes out before the client commits to the
        // body
        while body.continue_needed
            && body.continue_sent < CONTINUE_LINE.len()
        {
            match sock.write(&CONTINUE_LINE[body.continue_sent..]) {
                Ok(0) => return Err(Error::EofInBody),
                Ok(n) => body.continue_sent += n,
                Err(ref e) if would_block(e) => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        loop {
            // decode everything buffered in the raw window
            while !body.decoded_all {
                let step = {
                    let window = &block.staging()
                        [body.raw_start..body.raw_len];
                    progress.step(window)
                        .map_err(Error::ChunkParseError)?
                };
                match step {
                    BodyStep::NeedMore => break,
                    BodyStep::Framing { consumed } => {
                        body.raw_start += consumed;
                    }
                    BodyStep::Payload { consumed, len } => {
                        match mode {
                            Mode::Buffered(..) |
                            Mode::Progressive(..) => {
                                if body.buffered + len > body.limit {
                                    return Err(Error::PayloadTooLarge);
                                }
                                block.copy_between(Seg::Staging,
                                    body.raw_start, len,
                                    Seg::Form, body.buffered);
                                body.buffered += len;
                            }
                            Mode::Discard => {}
                            Mode::Hijack => unreachable!(),
                        }
                        body.raw_start += consumed;
                    }
                    BodyStep::Trailer { consumed } |
                    BodyStep::Done { consumed } => {
                        let seg_len = block.request_header().len();
                        let pos = body.trailer_start + body.trailer_len;
                        if pos + consumed > seg_len {
                            return Err(Error::TrailersTooLarge);
                        }
                        if consumed > 0 {
                            block.copy_between(Seg::Staging,
                                body.raw_start, consumed,
                                Seg::Header, pos);
                            body.trailer_len += consumed;
                            body.raw_start += consumed;
                        }
                        if progress.is_done() {
                            body.decoded_all = true;
                        }
                    }
                }
            }
            // compact the window
            if body.raw_start > 0 {
                if body.raw_len > body.raw_start {
                    let len = body.raw_len - body.raw_start;
                    block.copy_between(Seg::Staging, body.raw_start,
                        len, Seg::Staging, 0);
                    body.raw_len = len;
                } else {
                    body.raw_len = 0;
                }
                body.raw_start = 0;
            }
            if body.decoded_all {
                return self.finish_body(block, codec, body);
            }
            // intermediate delivery for progressive codecs
            if let Mode::Progressive(hint) = mode {
                if body.buffered > body.delivered
                    && body.buffered - body.delivered >= hint
                {
                    let consumed = {
                        let data = &block.form()
                            [body.delivered..body.buffered];
                        codec.data_received(data, false)?
                    };
                    if let Async::Ready(n) = consumed {
                        assert!(n <= body.buffered - body.delivered);
                        body.delivered += n;
                        if body.delivered == body.buffered {
                            body.delivered = 0;
                            body.buffered = 0;
                        }
                    }
                }
            }
            // refill the window: carried bytes first, then the wire
            let free = block.staging().len() - body.raw_len;
            if free == 0 {
                // a single chunk-size line larger than the whole
                // window; no sane client produces that
                return Err(Error::ChunkParseError(
                    httparse::InvalidChunkSize));
            }
            if !self.carry.is_empty() {
                let n = min(free, self.carry.len());
                block.staging_mut()[body.raw_len..body.raw_len + n]
                    .copy_from_slice(&self.carry[..n]);
                self.carry.drain(..n);
                body.raw_len += n;
                continue;
            }
            let read = {
                let staging = block.staging_mut();
                sock.read(&mut staging[body.raw_len..])
            };
            match read {
                Ok(0) => return Err(Error::EofInBody),
                Ok(n) => {
                    body.raw_len += n;
                    self.input_deadline(started);
                }
                Err(ref e) if would_block(e) => {
                    return Ok(Async::NotReady);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    // Parse trailers (once) and run the final data_received round
    fn finish_body(&mut self, block: &mut Block, codec: &mut D::Codec,
        body: &mut BodyState)
        -> Poll<(), Error>
    {
        if !body.trailers_done {
            if body.trailer_len > 2 {
                let mut headers = [httparse::EMPTY_HEADER; 16];
                let parsed = {
                    let data = &block.request_header()
                        [body.trailer_start
                            ..body.trailer_start + body.trailer_len];
                    match httparse::parse_headers(data, &mut headers) {
                        Ok(httparse::Status::Complete((_, parsed))) => {
                            parsed.iter()
                                .map(|h| (h.name.to_string(),
                                          h.value.to_vec()))
                                .collect::<Vec<_>>()
                        }
                        Ok(httparse::Status::Partial) => {
                            return Err(Error::TrailersTooLarge);
                        }
                        Err(e) => return Err(Error::ParseError(e)),
                    }
                };
                codec.trailers_received(&parsed)?;
            }
            body.trailers_done = true;
        }
        loop {
            let remaining = body.buffered - body.delivered;
            let consumed = {
                let data = &block.form()[body.delivered..body.buffered];
                codec.data_received(data, true)?
            };
            match consumed {
                Async::Ready(n) => {
                    assert!(n <= remaining);
                    body.delivered += n;
                    if body.delivered >= body.buffered {
                        return Ok(Async::Ready(()));
                    }
                    if n == 0 {
                        // no progress; nudged again on the next wakeup
                        return Ok(Async::NotReady);
                    }
                }
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }

    fn step(&mut self) -> Poll<(), Error> {
        loop {
            match mem::replace(&mut self.state, State::Void) {
                State::ReadingHeaders {
                    mut sock, mut block, mut filled, keep_alive }
                => {
                    // carried-over bytes are consumed before the
                    // transport is touched
                    if !self.carry.is_empty() {
                        let moved = {
                            let seg = block.request_header_mut();
                            let n = min(self.carry.len(),
                                seg.len() - filled);
                            seg[filled..filled + n]
                                .copy_from_slice(&self.carry[..n]);
                            n
                        };
                        self.carry.drain(..moved);
                        if filled == 0 && moved > 0 {
                            let t = self.config.headers_timeout;
                            self.set_deadline(t);
                        }
                        filled += moved;
                    }
                    loop {
                        let parsed = {
                            let data = &block.request_header()[..filled];
                            parse_request(data, &mut self.dispatcher,
                                &self.config)
                        };
                        match parsed {
                            Ok(Some((codec, setup, bytes))) => {
                                if bytes < filled {
                                    let mut tail = block.request_header()
                                        [bytes..filled].to_vec();
                                    tail.extend(&self.carry);
                                    self.carry = tail;
                                }
                                self.begin_turn(sock, block, codec,
                                    setup, bytes);
                                break;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                self.error_close(Some((sock, block)), e)?;
                                break;
                            }
                        }
                        // no full head yet
                        if filled == block.request_header().len() {
                            let e = {
                                let data =
                                    &block.request_header()[..filled];
                                overflow_error(data)
                            };
                            self.error_close(Some((sock, block)), e)?;
                            break;
                        }
                        let read = {
                            let seg = block.request_header_mut();
                            sock.read(&mut seg[filled..])
                        };
                        match read {
                            Ok(0) => {
                                if filled == 0 {
                                    // clean close between requests
                                    debug!("{}: connection closed by \
                                        peer", self.peer);
                                    self.state = State::Closed;
                                    return Ok(Async::Ready(()));
                                }
                                self.error_close(None,
                                    Error::EofBeforeRequest)?;
                                break;
                            }
                            Ok(n) => {
                                if filled == 0 {
                                    let t = self.config.headers_timeout;
                                    self.set_deadline(t);
                                }
                                filled += n;
                            }
                            Err(ref e) if would_block(e) => {
                                self.state = State::ReadingHeaders {
                                    sock: sock,
                                    block: block,
                                    filled: filled,
                                    keep_alive: keep_alive,
                                };
                                return Ok(Async::NotReady);
                            }
                            Err(e) => {
                                self.error_close(None, Error::Io(e))?;
                                break;
                            }
                        }
                    }
                }
                State::ReadingBody {
                    mut sock, mut block, mut codec, setup, mode,
                    mut progress, mut body, started }
                => {
                    match self.read_body(&mut sock, &mut block,
                        &mut codec, mode, &mut progress, &mut body,
                        started)
                    {
                        Ok(Async::Ready(())) => {
                            self.start_dispatch(sock, block, codec,
                                setup, false);
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::ReadingBody {
                                sock: sock,
                                block: block,
                                codec: codec,
                                setup: setup,
                                mode: mode,
                                progress: progress,
                                body: body,
                                started: started,
                            };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            self.error_close(Some((sock, block)), e)?;
                        }
                    }
                }
                State::Dispatching { mut fut, codec, hijack, started }
                => {
                    match fut.poll() {
                        Ok(Async::Ready(Outcome::Done(done))) => {
                            self.state = State::Flushing {
                                done: done,
                                codec: codec,
                                hijack: hijack,
                                error: None,
                            };
                            let t = self.config.output_body_byte_timeout;
                            self.set_deadline(t);
                        }
                        Ok(Async::Ready(
                            Outcome::Terminate(status, mut enc)))
                        => {
                            let e = Error::Terminated(status);
                            self.log_error(&e);
                            let page = match status {
                                Some(st) if !enc.is_started() => {
                                    enc.force_close();
                                    let mut write = || {
                                        enc.status(st)?;
                                        enc.add_length(0)?;
                                        enc.done_headers()
                                    };
                                    write().is_ok()
                                }
                                _ => false,
                            };
                            if page {
                                self.state = State::Flushing {
                                    done: enc.done(),
                                    codec: None,
                                    hijack: false,
                                    error: Some(e),
                                };
                                let t = self.config
                                    .output_body_byte_timeout;
                                self.set_deadline(t);
                            } else {
                                self.state = State::Closed;
                                return Err(e);
                            }
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::Dispatching {
                                fut: fut,
                                codec: codec,
                                hijack: hijack,
                                started: started,
                            };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            self.log_error(&e);
                            self.state = State::Closed;
                            return Err(e);
                        }
                    }
                }
                State::Flushing { mut done, mut codec, hijack, error }
                => {
                    match done.poll_finish() {
                        Ok(Async::Ready(())) => {
                            if let Some(e) = error {
                                self.state = State::Closed;
                                return Err(e);
                            }
                            if hijack {
                                let (sock, block) = done.into_io();
                                drop(block);
                                let mut io = IoBuf::new(sock);
                                if !self.carry.is_empty() {
                                    io.in_buf.extend(&self.carry);
                                    self.carry.clear();
                                }
                                let (wr, rd) = io.split();
                                codec.as_mut()
                                    .expect("codec is kept until hijack")
                                    .hijack(wr, rd);
                                debug!("{}: connection upgraded",
                                    self.peer);
                                self.state = State::Closed;
                                return Ok(Async::Ready(()));
                            }
                            if done.must_close() {
                                debug!("{}: closing after response",
                                    self.peer);
                                self.state = State::Closed;
                                return Ok(Async::Ready(()));
                            }
                            let (sock, mut block) = done.into_io();
                            block.start_turn();
                            self.state = State::ReadingHeaders {
                                sock: sock,
                                block: block,
                                filled: 0,
                                keep_alive: true,
                            };
                            let t = self.config.keep_alive_timeout;
                            self.set_deadline(t);
                        }
                        Ok(Async::NotReady) => {
                            self.state = State::Flushing {
                                done: done,
                                codec: codec,
                                hijack: hijack,
                                error: error,
                            };
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            let e = Error::Io(e);
                            self.log_error(&e);
                            self.state = State::Closed;
                            return Err(e);
                        }
                    }
                }
                State::SendError {
                    mut sock, block, page, mut head_sent, mut body_sent,
                    mut error }
                => {
                    let mut failed = false;
                    while !failed && (head_sent < page.head_len
                                      || body_sent < page.body_len)
                    {
                        let in_head = head_sent < page.head_len;
                        let written = if in_head {
                            let head = block.response_header();
                            sock.write(&head[head_sent..page.head_len])
                        } else {
                            let staging = block.staging();
                            sock.write(
                                &staging[body_sent..page.body_len])
                        };
                        match written {
                            Ok(0) => failed = true,
                            Ok(n) => {
                                if in_head {
                                    head_sent += n;
                                } else {
                                    body_sent += n;
                                }
                            }
                            Err(ref e) if would_block(e) => {
                                self.state = State::SendError {
                                    sock: sock,
                                    block: block,
                                    page: page,
                                    head_sent: head_sent,
                                    body_sent: body_sent,
                                    error: error,
                                };
                                return Ok(Async::NotReady);
                            }
                            // the error page is best-effort; close on
                            // any failure
                            Err(..) => failed = true,
                        }
                    }
                    self.state = State::Closed;
                    return Err(error.take()
                        .expect("error page always carries an error"));
                }
                State::SendStatic { mut sock, mut sent, mut error } => {
                    let mut failed = false;
                    while !failed && sent < OVERLOADED.len() {
                        match sock.write(&OVERLOADED[sent..]) {
                            Ok(0) => failed = true,
                            Ok(n) => sent += n,
                            Err(ref e) if would_block(e) => {
                                self.state = State::SendStatic {
                                    sock: sock,
                                    sent: sent,
                                    error: error,
                                };
                                return Ok(Async::NotReady);
                            }
                            Err(..) => failed = true,
                        }
                    }
                    self.state = State::Closed;
                    return Err(error.take()
                        .expect("static page always carries an error"));
                }
                State::Closed => {
                    self.state = State::Closed;
                    return Ok(Async::Ready(()));
                }
                State::Void => unreachable!("proto polled in void state"),
            }
        }
    }

    fn on_timeout(&mut self) -> Poll<(), Error> {
        let clean = matches!(self.state,
            State::ReadingHeaders { keep_alive: true, filled: 0, .. });
        self.state = State::Closed;
        if clean {
            debug!("{}: keep-alive connection expired", self.peer);
            Ok(Async::Ready(()))
        } else {
            let e = Error::Timeout;
            self.log_error(&e);
            Err(e)
        }
    }
}

impl<S, D> Future for Proto<S, D>
    where S: AsyncRead + AsyncWrite,
          D: Dispatcher<S>,
{
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        match self.step()? {
            Async::Ready(()) => return Ok(Async::Ready(())),
            Async::NotReady => {}
        }
        match self.timeout.poll().expect("timeout never fails") {
            Async::Ready(()) => self.on_timeout(),
            Async::NotReady => Ok(Async::NotReady),
        }
    }
}
