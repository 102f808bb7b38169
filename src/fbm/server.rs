//! The server side of a messaging session
//!
//! A `Session` future owns a hijacked websocket connection, parses
//! incoming request frames and feeds them to a `Handler`. Several
//! handler futures may run at once (up to the configured in-flight
//! limit); replies are written back by the session task alone, with
//! the id of the request they answer.

use std::collections::VecDeque;
use std::io::Cursor;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Instant;

use futures::{Async, Future, Poll};
use netbuf::Buf;
use tk_bufstream::{ReadBuf, ReadFramed, WriteBuf, WriteFramed};
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use fbm::frame::Message;
use fbm::{Config, Error};
use websocket::zero_copy::{parse_frame, write_close, write_packet};
use websocket::{Frame, ServerCodec};

/// A handler of messaging requests
pub trait Handler {
    /// Future producing the reply message
    ///
    /// The id of the reply is overwritten with the id of the request
    /// before it is sent, so handlers don't have to care about it.
    type Future: Future<Item=Message, Error=Error>;

    /// Handle one request
    ///
    /// The body was detached from the message and is presented as a
    /// separate reader.
    fn message(&mut self, request: &Message, body: MessageBody)
        -> Self::Future;
}

/// The body of a received message
///
/// A reader over the buffered body bytes, with the content type that
/// was attached to the message.
#[derive(Debug)]
pub struct MessageBody {
    content_type: Option<String>,
    data: Cursor<Vec<u8>>,
    closed: bool,
}

/// A server-side messaging session over one websocket connection
///
/// Dropping the session cancels all handler futures still in flight.
pub struct Session<S, H: Handler> {
    handler: H,
    output: WriteBuf<S>,
    input: ReadBuf<S>,
    config: Arc<Config>,
    inflight: VecDeque<(u32, H::Future)>,
    last_received: Instant,
    last_ping: Instant,
    timeout: Timeout,
    handle: Handle,
    close_sent: bool,
}

impl MessageBody {
    pub(crate) fn new(message: &mut Message) -> MessageBody {
        MessageBody {
            content_type: message.content_type().map(|x| x.to_string()),
            data: Cursor::new(message.take_body()),
            closed: false,
        }
    }
    /// Content type of the body, if the message carried one
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_ref().map(|x| &x[..])
    }
    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        if self.closed {
            return 0;
        }
        self.data.get_ref().len() - self.data.position() as usize
    }
    /// Drop the remaining bytes
    pub fn close(&mut self) {
        self.closed = true;
        self.data = Cursor::new(Vec::new());
    }
}

impl Read for MessageBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        self.data.read(buf)
    }
}

impl<S, H: Handler> Session<S, H> {
    /// Wrap a hijacked websocket connection into a messaging session
    ///
    /// This is typically called from the `hijack` method of an HTTP
    /// codec after the 101 response; the session future is then
    /// spawned on the handle.
    pub fn new(outp: WriteFramed<S, ServerCodec>,
        inp: ReadFramed<S, ServerCodec>,
        handler: H, cfg: &Arc<Config>, handle: &Handle)
        -> Session<S, H>
    {
        Session {
            handler: handler,
            output: outp.into_inner(),
            input: inp.into_inner(),
            config: cfg.clone(),
            inflight: VecDeque::new(),
            last_received: Instant::now(),
            last_ping: Instant::now(),
            timeout: Timeout::new(
                ::std::cmp::min(cfg.ping_interval,
                                cfg.inactivity_timeout),
                handle)
                .expect("can always set a timeout"),
            handle: handle.clone(),
            close_sent: false,
        }
    }

    fn rearm_timeout(&mut self) {
        let deadline = ::std::cmp::min(
            self.last_received + self.config.inactivity_timeout,
            self.last_ping + self.config.ping_interval);
        self.timeout = Timeout::new_at(deadline, &self.handle)
            .expect("can always set a timeout");
    }

    fn send_reply(&mut self, id: u32, mut reply: Message) {
        reply.set_id(id);
        let mut frame = Buf::new();
        reply.serialize(self.config.text_encoding, &mut frame);
        write_packet(&mut self.output.out_buf, 0x2, &frame[..], false);
    }

    // Poll every in-flight handler once; completed ones produce reply
    // frames, failed ones a status-only error reply
    fn poll_handlers(&mut self) -> bool {
        let mut progress = false;
        for _ in 0..self.inflight.len() {
            let (id, mut fut) = self.inflight.pop_front()
                .expect("queue length is checked");
            match fut.poll() {
                Ok(Async::Ready(reply)) => {
                    self.send_reply(id, reply);
                    progress = true;
                }
                Ok(Async::NotReady) => {
                    self.inflight.push_back((id, fut));
                }
                Err(e) => {
                    debug!("handler failed for message {}: {}", id, e);
                    let mut reply = Message::new(id);
                    reply.set_status(self.config.error_status);
                    self.send_reply(id, reply);
                    progress = true;
                }
            }
        }
        progress
    }
}

impl<S, H> Future for Session<S, H>
    where S: AsyncRead + AsyncWrite,
          H: Handler,
{
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        loop {
            let mut progress = self.poll_handlers();

            // accept new requests while there is handler capacity
            while self.inflight.len() < self.config.max_inflight {
                enum Action {
                    Request(Message),
                    Pong(Vec<u8>),
                    CloseReply(u16),
                    None,
                }
                let (action, bytes) = {
                    let frame_size = self.config.max_frame_size;
                    let parsed = parse_frame(&mut self.input.in_buf,
                            frame_size, true)
                        .map_err(|e| Error::Websocket(e.into()))?;
                    match parsed {
                        Some((Frame::Binary(data), bytes)) => {
                            let encoding = self.config.text_encoding;
                            let message =
                                Message::parse(data, encoding)?;
                            (Action::Request(message), bytes)
                        }
                        Some((Frame::Ping(data), bytes)) => {
                            (Action::Pong(data.to_vec()), bytes)
                        }
                        Some((Frame::Pong(..), bytes)) => {
                            (Action::None, bytes)
                        }
                        Some((Frame::Text(..), bytes)) => {
                            debug!("ignoring unexpected text frame");
                            (Action::None, bytes)
                        }
                        Some((Frame::Close(code, reason), bytes)) => {
                            debug!("session closed by peer [{}]{:?}",
                                code, reason);
                            (Action::CloseReply(code), bytes)
                        }
                        None => break,
                    }
                };
                self.input.in_buf.consume(bytes);
                self.last_received = Instant::now();
                self.rearm_timeout();
                progress = true;
                match action {
                    Action::Request(mut message) => {
                        let body = MessageBody::new(&mut message);
                        let fut = self.handler.message(&message, body);
                        self.inflight.push_back((message.id(), fut));
                    }
                    Action::Pong(data) => {
                        write_packet(&mut self.output.out_buf, 0xA,
                            &data, false);
                    }
                    Action::CloseReply(code) => {
                        if !self.close_sent {
                            write_close(&mut self.output.out_buf,
                                code, "", false);
                            self.close_sent = true;
                        }
                        let _ = self.output.flush();
                        return Ok(Async::Ready(()));
                    }
                    Action::None => {}
                }
            }

            self.output.flush()?;

            match self.input.read() {
                Ok(0) => {
                    if self.input.done() {
                        // in-flight handlers are cancelled by drop
                        debug!("messaging peer went away");
                        return Ok(Async::Ready(()));
                    }
                }
                Ok(..) => continue,
                Err(e) => return Err(Error::Io(e)),
            }

            if progress {
                continue;
            }

            match self.timeout.poll().expect("timeout never fails") {
                Async::Ready(()) => {
                    let now = Instant::now();
                    let quiet = self.last_received
                        + self.config.inactivity_timeout;
                    if now >= quiet {
                        return Err(Error::Timeout);
                    }
                    if now >= self.last_ping
                        + self.config.ping_interval
                    {
                        debug!("sending ping");
                        write_packet(&mut self.output.out_buf, 0x9,
                            b"tk-fbm-ping", false);
                        self.last_ping = now;
                        self.output.flush()?;
                    }
                    self.rearm_timeout();
                    match self.timeout.poll()
                        .expect("timeout never fails")
                    {
                        Async::Ready(()) => continue,
                        Async::NotReady => {}
                    }
                }
                Async::NotReady => {}
            }
            return Ok(Async::NotReady);
        }
    }
}
