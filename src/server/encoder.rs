use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;

use futures::{Async, Future, Poll};
use httpdate::HttpDate;
use tokio_io::AsyncWrite;

use base_serializer::{HeadBuf, HeaderError, MessageState};
use buffer::{Block, Seg};
use compress::{self, CompressStream};
use enums::{Status, Version};
use server::Config;

/// This a response writer that you receive in `Codec`
///
/// Methods of this structure ensure that everything you write into a
/// buffer is consistent and valid protocol. The head accumulates in the
/// response-header segment and is flushed as a unit; body bytes go
/// through the staging segment, get compressed on the way when a
/// compressor was negotiated, and, for chunked responses, are framed in
/// the chunk accumulator before hitting the transport.
pub struct Encoder<S> {
    state: MessageState,
    io: Inner<S>,
}

/// This structure is returned from `Encoder::done` and works as a
/// continuation that should be returned from the future that writes the
/// response. The connection engine drives the remaining flush
/// (compressor finalization, terminal chunk, buffered bytes).
pub struct EncoderDone<S> {
    io: Inner<S>,
    state: MessageState,
}

struct Inner<S> {
    sock: S,
    block: Block,
    config: Arc<Config>,
    version: Version,
    head_len: usize,
    head_sent: usize,
    staging_len: usize,
    staging_sent: usize,
    acc_len: usize,
    acc_sent: usize,
    compressor: Option<Box<CompressStream>>,
    method: Option<compress::Method>,
    // the compressor still holds undrained output
    pending_output: bool,
    compressor_finished: bool,
    chunked: bool,
    terminal_needed: bool,
    terminal_staged: bool,
    close: bool,
}

/// Everything the engine knows about the response before the handler
/// runs
pub(crate) struct ResponseSetup {
    pub version: Version,
    pub is_head: bool,
    pub do_close: bool,
    pub compression: Option<(compress::Method, Box<CompressStream>)>,
}

pub(crate) fn new<S>(sock: S, mut block: Block, config: &Arc<Config>,
    setup: ResponseSetup)
    -> Encoder<S>
{
    use base_serializer::Body::*;
    block.start_response();
    let (method, compressor) = match setup.compression {
        // responses to HEAD carry the headers of the uncompressed
        // entity, don't bother encoding nothing
        Some(..) if setup.is_head => (None, None),
        Some((method, stream)) => (Some(method), Some(stream)),
        None => (None, None),
    };
    Encoder {
        state: MessageState::ResponseStart {
            version: setup.version,
            body: if setup.is_head { Head } else { Normal },
            close: setup.do_close,
        },
        io: Inner {
            sock: sock,
            block: block,
            config: config.clone(),
            version: setup.version,
            head_len: 0,
            head_sent: 0,
            staging_len: 0,
            staging_sent: 0,
            acc_len: 0,
            acc_sent: 0,
            compressor: compressor,
            method: method,
            pending_output: false,
            compressor_finished: false,
            chunked: false,
            terminal_needed: false,
            terminal_staged: false,
            close: setup.do_close,
        },
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

impl<S> Inner<S> {
    fn staging_free(&self) -> usize {
        self.block.staging().len() - self.staging_len
    }

    fn bytes_buffered(&self) -> usize {
        (self.head_len - self.head_sent)
            + (self.staging_len - self.staging_sent)
            + (self.acc_len - self.acc_sent)
    }

    // Frame staged payload into the accumulator, as much as fits in
    // one chunk. Returns false when nothing could be framed; the
    // accumulator then has to be drained to the transport first.
    fn wrap_staging(&mut self) -> bool {
        // worst case framing overhead: 8 hex digits + two CRLFs
        const OVERHEAD: usize = 12;
        debug_assert!(self.chunked);
        if self.staging_len == 0 {
            return false;
        }
        let free = self.block.accumulator().len() - self.acc_len;
        if free <= OVERHEAD {
            return false;
        }
        let take = if self.staging_len < free - OVERHEAD {
            self.staging_len
        } else {
            free - OVERHEAD
        };
        let prefix = format!("{:x}\r\n", take);
        let mut pos = self.acc_len;
        {
            let acc = self.block.accumulator_mut();
            acc[pos..pos + prefix.len()].copy_from_slice(prefix.as_bytes());
        }
        pos += prefix.len();
        self.block.copy_between(Seg::Staging, 0, take,
            Seg::Accumulator, pos);
        pos += take;
        {
            let acc = self.block.accumulator_mut();
            acc[pos..pos + 2].copy_from_slice(b"\r\n");
        }
        self.acc_len = pos + 2;
        if take < self.staging_len {
            let rest = self.staging_len - take;
            self.block.copy_between(Seg::Staging, take, rest,
                Seg::Staging, 0);
            self.staging_len = rest;
        } else {
            self.staging_len = 0;
        }
        true
    }

    fn stage_plain(&mut self, data: &[u8]) -> usize {
        let free = self.staging_free();
        let take = if data.len() < free { data.len() } else { free };
        if take > 0 {
            let len = self.staging_len;
            self.block.staging_mut()[len..len + take]
                .copy_from_slice(&data[..take]);
            self.staging_len += take;
        }
        take
    }

    // Feed body bytes to the compressor, output landing in staging
    fn stage_compressed(&mut self, data: &[u8]) -> io::Result<usize> {
        let free = self.staging_free();
        if free == 0 {
            return Ok(0);
        }
        // bound the input so the codec's internal buffering stays
        // proportional to the staging segment
        let take = if data.len() < free { data.len() } else { free };
        let len = self.staging_len;
        let result = {
            let compressor = self.compressor.as_mut()
                .expect("compressor is alive");
            let staging = self.block.staging_mut();
            compressor.compress(&data[..take], &mut staging[len..])?
        };
        self.staging_len += result.written;
        self.pending_output = result.needs_output;
        Ok(result.consumed)
    }

    // Drain output the compressor kept for itself
    fn drain_compressor(&mut self) -> io::Result<bool> {
        if !self.pending_output || self.compressor.is_none() {
            return Ok(false);
        }
        let before = self.staging_len;
        self.stage_compressed(b"")?;
        Ok(self.staging_len > before)
    }
}

impl<S: AsyncWrite> Inner<S> {
    // Push buffered bytes to the transport; stops on WouldBlock
    fn pump(&mut self) -> io::Result<bool> {
        let mut progress = false;
        while self.head_sent < self.head_len {
            let result = {
                let head = self.block.response_header();
                self.sock.write(&head[self.head_sent..self.head_len])
            };
            match result {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero,
                        "zero-length write on response head"));
                }
                Ok(n) => {
                    self.head_sent += n;
                    progress = true;
                }
                Err(ref e) if would_block(e) => return Ok(progress),
                Err(e) => return Err(e),
            }
        }
        if self.chunked {
            while self.acc_sent < self.acc_len {
                let result = {
                    let acc = self.block.accumulator();
                    self.sock.write(&acc[self.acc_sent..self.acc_len])
                };
                match result {
                    Ok(0) => {
                        return Err(io::Error::new(io::ErrorKind::WriteZero,
                            "zero-length write on response body"));
                    }
                    Ok(n) => {
                        self.acc_sent += n;
                        progress = true;
                    }
                    Err(ref e) if would_block(e) => return Ok(progress),
                    Err(e) => return Err(e),
                }
            }
            self.acc_sent = 0;
            self.acc_len = 0;
        } else {
            while self.staging_sent < self.staging_len {
                let result = {
                    let staging = self.block.staging();
                    self.sock.write(
                        &staging[self.staging_sent..self.staging_len])
                };
                match result {
                    Ok(0) => {
                        return Err(io::Error::new(io::ErrorKind::WriteZero,
                            "zero-length write on response body"));
                    }
                    Ok(n) => {
                        self.staging_sent += n;
                        progress = true;
                    }
                    Err(ref e) if would_block(e) => return Ok(progress),
                    Err(e) => return Err(e),
                }
            }
            self.staging_sent = 0;
            self.staging_len = 0;
        }
        Ok(progress)
    }

    // One round of making bytes move: drain codec leftovers, frame
    // staged bytes, push to the transport
    fn make_progress(&mut self) -> io::Result<bool> {
        let mut progress = self.pump()?;
        progress |= self.drain_compressor()?;
        if self.chunked && self.staging_free() == 0 {
            progress |= self.wrap_staging();
        }
        Ok(progress)
    }

    // Flush everything that is already staged (used by explicit
    // flushes; wraps partial chunks)
    fn poll_flush_buffers(&mut self) -> Poll<(), io::Error> {
        loop {
            let mut progress = self.make_progress()?;
            if self.chunked && self.staging_len > 0 {
                progress |= self.wrap_staging();
            }
            if !progress {
                break;
            }
        }
        if self.bytes_buffered() == 0 && !self.pending_output {
            self.sock.flush().or_else(|e| {
                if would_block(&e) { Ok(()) } else { Err(e) }
            })?;
            Ok(Async::Ready(()))
        } else {
            Ok(Async::NotReady)
        }
    }
}

// TODO: support responses to CONNECT requests
impl<S> Encoder<S> {
    /// Write status line using the `Status` enum
    ///
    /// This puts the status line into the head buffer immediately.
    ///
    /// # Panics
    ///
    /// When the status line is already written. It's expected that your
    /// request handler state machine will never call the method twice.
    ///
    /// When the status code is 100 (Continue). 100 is not allowed
    /// as a final status code.
    pub fn status(&mut self, status: Status) -> Result<(), HeaderError> {
        let Inner { ref mut block, ref mut head_len, .. } = self.io;
        self.state.response_status(
            &mut HeadBuf::new(block.response_header_mut(), head_len),
            status.code(), status.reason())
    }

    /// Write a custom status line
    ///
    /// # Panics
    ///
    /// Same as `status()`.
    pub fn custom_status(&mut self, code: u16, reason: &str)
        -> Result<(), HeaderError>
    {
        let Inner { ref mut block, ref mut head_len, .. } = self.io;
        self.state.response_status(
            &mut HeadBuf::new(block.response_header_mut(), head_len),
            code, reason)
    }

    /// Add a header to the message
    ///
    /// `Content-Length` must be set using the `add_length` method and
    /// `Transfer-Encoding: chunked` with the `add_chunked` method.
    /// These two headers are important for the security of HTTP.
    ///
    /// In an application handler it's okay to unwrap the result and to
    /// get a meaningful panic (that is basically an assertion); the
    /// Result matters for proxies.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header<V: AsRef<[u8]>>(&mut self, name: &str, value: V)
        -> Result<(), HeaderError>
    {
        let Inner { ref mut block, ref mut head_len, .. } = self.io;
        self.state.add_header(
            &mut HeadBuf::new(block.response_header_mut(), head_len),
            name, value.as_ref())
    }

    /// Same as `add_header` but allows value to be formatted directly
    /// into the buffer
    ///
    /// Useful for dates and numeric headers, as well as some strongly
    /// typed wrappers
    pub fn format_header<D: ::std::fmt::Display>(&mut self, name: &str,
        value: D)
        -> Result<(), HeaderError>
    {
        let Inner { ref mut block, ref mut head_len, .. } = self.io;
        self.state.format_header(
            &mut HeadBuf::new(block.response_header_mut(), head_len),
            name, value)
    }

    /// Declare a fixed body length
    ///
    /// The `Content-Length` header is emitted when the head is closed,
    /// unless a compressor took over the wire format; the declared
    /// length always validates the number of body bytes written.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, n: u64) -> Result<(), HeaderError> {
        self.state.add_length(n)
    }

    /// Declare the body as chunked
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self) -> Result<(), HeaderError> {
        self.state.add_chunked()
    }

    /// Returns true if at least `status()` has been called
    ///
    /// This is mostly useful to find out whether we can build an error
    /// page or it's already too late.
    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    /// The compression method negotiated for this response, if any
    pub fn compression(&self) -> Option<compress::Method> {
        self.io.method
    }

    /// Force `Connection: close` on this response
    ///
    /// No-op once the status line is written.
    pub fn force_close(&mut self) {
        self.state.force_close();
        self.io.close = true;
    }

    /// Close the head and return `true` if an entity body is expected
    ///
    /// The engine appends its required headers here: `Date`, `Server`,
    /// the body-framing header (`Content-Length` or
    /// `Transfer-Encoding: chunked`), `Content-Encoding` when a
    /// compressor is active, and the `Connection` disposition.
    ///
    /// Specifically `false` is returned when status is 1xx, 204, 304
    /// or in the response to a `HEAD` request, but not if the body has
    /// zero length.
    ///
    /// # Panics
    ///
    /// Panics when the response is in the wrong state.
    pub fn done_headers(&mut self) -> Result<bool, HeaderError> {
        if self.io.version != Version::Http09 {
            let Inner { ref mut block, ref mut head_len,
                ref config, .. } = self.io;
            if self.state.needs_date() {
                self.state.format_header(
                    &mut HeadBuf::new(block.response_header_mut(), head_len),
                    "Date", HttpDate::from(SystemTime::now()))?;
            }
            if self.state.needs_server() {
                let server = config.server_header.clone();
                self.state.add_header(
                    &mut HeadBuf::new(block.response_header_mut(), head_len),
                    "Server", server.as_bytes())?;
            }
        }
        let summary = {
            let Inner { ref mut block, ref mut head_len, method, .. }
                = self.io;
            self.state.done_headers(
                &mut HeadBuf::new(block.response_header_mut(), head_len),
                method)?
        };
        self.io.chunked = summary.chunked;
        self.io.close = summary.close;
        self.io.terminal_needed = summary.chunked && summary.expect_body;
        if !summary.expect_body {
            // nothing will be staged, drop the codec state early
            self.io.compressor = None;
            self.io.method = None;
        }
        Ok(summary.expect_body)
    }

    /// Write a chunk of the message body
    ///
    /// Returns the number of bytes accepted into the staging segment.
    /// Zero means the buffers are full: flush them with `wait_flush`
    /// (or `poll_flush` in a hand-written future) and try again.
    ///
    /// You may write a body of a response to a HEAD request just like
    /// a real one; the bytes are counted against the declared length
    /// but never staged or sent.
    ///
    /// # Panics
    ///
    /// When the response is in a wrong state, or when more bytes are
    /// written than the declared `Content-Length`.
    pub fn write_body(&mut self, data: &[u8]) -> usize {
        assert!(self.state.is_after_headers(),
            "write_body() called before done_headers()");
        if data.len() == 0 {
            return 0;
        }
        if self.state.is_head() {
            self.state.account_body(data.len());
            return data.len();
        }
        let mut accepted = 0;
        loop {
            if self.io.staging_free() == 0 {
                // without a transport write we can still make room by
                // framing the staged bytes into the accumulator
                if !(self.io.chunked && self.io.wrap_staging()) {
                    break;
                }
            }
            let n = if self.io.compressor.is_some() {
                match self.io.stage_compressed(&data[accepted..]) {
                    Ok(n) => n,
                    // the spill path of the codecs never fails; treat
                    // a failure as a full buffer and let the flush
                    // surface it
                    Err(_) => 0,
                }
            } else {
                self.io.stage_plain(&data[accepted..])
            };
            accepted += n;
            if accepted == data.len() || n == 0 {
                break;
            }
        }
        self.state.account_body(accepted);
        accepted
    }

    /// Returns bytes currently buffered (head, staging and chunk
    /// accumulator together)
    pub fn bytes_buffered(&self) -> usize {
        self.io.bytes_buffered()
    }

    /// Returns true if `done()` was already called
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Finish the body and return the continuation
    ///
    /// Everything still buffered (including the compressor tail and
    /// the terminal chunk) is flushed by the connection engine while it
    /// holds the `EncoderDone`.
    ///
    /// # Panics
    ///
    /// When the response is in the wrong state or the body is shorter
    /// than declared.
    pub fn done(mut self) -> EncoderDone<S> {
        self.state.done();
        EncoderDone {
            io: self.io,
            state: self.state,
        }
    }
}

impl<S: AsyncWrite> Encoder<S> {
    /// Try to flush buffered bytes to the transport
    ///
    /// Returns `Async::Ready` when all buffers are empty. Partial
    /// chunks are framed and sent, so calling this mid-body trades
    /// chunking efficiency for latency.
    pub fn poll_flush(&mut self) -> Poll<(), io::Error> {
        self.io.poll_flush_buffers()
    }

    /// Returns a future which yields the encoder back when the
    /// buffered byte count drops below `watermark`
    pub fn wait_flush(self, watermark: usize) -> WaitFlush<S> {
        WaitFlush(Some(self), watermark)
    }

    /// Returns a raw body writer for zero-copy techniques
    ///
    /// Note: we don't assert on the format or the length of the body
    /// if you're using this interface; it is specifically designed for
    /// `sendfile`-style file serving.
    ///
    /// # Panics
    ///
    /// Panics when headers are not written yet, or when the body is
    /// chunked or compressed (raw writes can't be framed).
    pub fn raw_body(self) -> RawBodyFuture<S> {
        assert!(self.state.is_after_headers(),
            "raw_body() called before done_headers()");
        assert!(!self.io.chunked && self.io.compressor.is_none(),
            "raw_body() is only available for plain fixed-length bodies");
        RawBodyFuture(Some(self))
    }
}

/// A future that yields `RawBody` after the head is flushed
pub struct RawBodyFuture<S>(Option<Encoder<S>>);

/// The actual raw body
///
/// The object is used to write data directly to the socket without
/// any buffering or framing.
pub struct RawBody<S> {
    io: Inner<S>,
    state: MessageState,
}

/// A future that yields `Encoder` again after the buffers have fewer
/// bytes than the watermark
pub struct WaitFlush<S>(Option<Encoder<S>>, usize);

impl<S: AsyncWrite> Future for RawBodyFuture<S> {
    type Item = RawBody<S>;
    type Error = io::Error;
    fn poll(&mut self) -> Poll<RawBody<S>, io::Error> {
        let flushed = {
            let enc = self.0.as_mut().expect("future is polled twice");
            enc.io.poll_flush_buffers()?
        };
        match flushed {
            Async::Ready(()) => {
                let enc = self.0.take().unwrap();
                Ok(Async::Ready(RawBody {
                    io: enc.io,
                    state: enc.state,
                }))
            }
            Async::NotReady => Ok(Async::NotReady),
        }
    }
}

impl<S: AsyncWrite> Future for WaitFlush<S> {
    type Item = Encoder<S>;
    type Error = io::Error;
    fn poll(&mut self) -> Poll<Encoder<S>, io::Error> {
        let buffered = {
            let enc = self.0.as_mut().expect("future is polled twice");
            match enc.io.poll_flush_buffers()? {
                Async::Ready(()) => 0,
                Async::NotReady => enc.io.bytes_buffered(),
            }
        };
        if buffered < self.1 {
            Ok(Async::Ready(self.0.take().unwrap()))
        } else {
            Ok(Async::NotReady)
        }
    }
}

impl<S> RawBody<S> {
    /// Returns the `EncoderDone` object to pass back to the protocol
    pub fn done(mut self) -> EncoderDone<S> {
        self.state.done_unchecked();
        EncoderDone {
            io: self.io,
            state: self.state,
        }
    }
}

impl<S: AsyncWrite> io::Write for RawBody<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.sock.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.io.sock.flush()
    }
}

impl<S> io::Write for Encoder<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_body(buf) {
            0 if buf.len() > 0 => Err(io::Error::new(
                io::ErrorKind::WouldBlock, "response buffers are full")),
            n => Ok(n),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: AsyncWrite> EncoderDone<S> {
    /// Drive the response tail: compressor finalization, the terminal
    /// chunk and the remaining buffered bytes
    pub(crate) fn poll_finish(&mut self) -> Poll<(), io::Error> {
        loop {
            let mut progress = false;
            if self.io.compressor.is_some()
                && !self.io.compressor_finished
            {
                let free = self.io.staging_free();
                if free > 0 {
                    let n = {
                        let len = self.io.staging_len;
                        let compressor = self.io.compressor.as_mut()
                            .expect("compressor is alive");
                        let staging = self.io.block.staging_mut();
                        compressor.finish(&mut staging[len..])?
                    };
                    self.io.staging_len += n;
                    self.io.pending_output = false;
                    if n == 0 {
                        self.io.compressor_finished = true;
                        self.io.compressor = None;
                    } else {
                        progress = true;
                    }
                }
            }
            if self.io.chunked {
                if self.io.staging_len > 0 {
                    progress |= self.io.wrap_staging();
                }
                let tail_ready = self.io.compressor.is_none()
                    && self.io.staging_len == 0;
                if tail_ready && self.io.terminal_needed
                    && !self.io.terminal_staged
                {
                    let pos = self.io.acc_len;
                    if self.io.block.accumulator().len() - pos >= 5 {
                        self.io.block.accumulator_mut()[pos..pos + 5]
                            .copy_from_slice(b"0\r\n\r\n");
                        self.io.acc_len = pos + 5;
                        self.io.terminal_staged = true;
                        progress = true;
                    }
                }
            }
            progress |= self.io.pump()?;
            let done = self.io.bytes_buffered() == 0
                && self.io.compressor.is_none()
                && (!self.io.terminal_needed || self.io.terminal_staged);
            if done {
                self.io.sock.flush().or_else(|e| {
                    if would_block(&e) { Ok(()) } else { Err(e) }
                })?;
                return Ok(Async::Ready(()));
            }
            if !progress {
                return Ok(Async::NotReady);
            }
        }
    }
}

impl<S> EncoderDone<S> {
    /// Whether the connection must close after this response
    pub(crate) fn must_close(&self) -> bool {
        self.io.close
    }
    /// Recover the transport and the buffer block for the next turn
    pub(crate) fn into_io(self) -> (S, Block) {
        (self.io.sock, self.io.block)
    }
}
