//! The client side of a messaging session
//!
//! A `Client` is a cheap cloneable handle that rents a request record,
//! serializes the frame into its scratch buffer and queues it for the
//! `Connection` future, which is the single writer and single reader
//! of the underlying websocket. Responses are matched by message id
//! and delivered through one-shot channels; nothing about the arrival
//! order is assumed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::sync::{mpsc, oneshot};
use futures::{Async, Future, Poll, Stream};
use tk_bufstream::{ReadBuf, ReadFramed, WriteBuf, WriteFramed};
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use fbm::frame::Message;
use fbm::record::{Record, RecordPool};
use fbm::{Config, Error};
use websocket::zero_copy::{parse_frame, write_close, write_packet};
use websocket::{ClientCodec, Frame};

struct Slot {
    record: Record,
    sender: oneshot::Sender<Result<Message, Error>>,
}

struct Shared {
    config: Arc<Config>,
    pool: RecordPool,
    pending: Mutex<HashMap<u32, Slot>>,
    stray: AtomicUsize,
}

/// A handle for issuing requests over a messaging session
#[derive(Clone)]
pub struct Client {
    tx: mpsc::UnboundedSender<u32>,
    shared: Arc<Shared>,
    handle: Handle,
}

/// A future of a single response
///
/// Dropping it cancels the request: the correlator entry is removed
/// and a response arriving later is silently discarded (and counted).
pub struct ResponseFuture {
    id: u32,
    rx: Option<oneshot::Receiver<Result<Message, Error>>>,
    early_error: Option<Error>,
    shared: Option<Arc<Shared>>,
    timeout: Option<Timeout>,
    done: bool,
}

/// The connection task of a client session
///
/// This future owns both directions of the websocket; poll it to
/// completion (usually via `handle.spawn`) while clients issue
/// requests.
pub struct Connection<S> {
    output: WriteBuf<S>,
    input: ReadBuf<S>,
    rx: mpsc::UnboundedReceiver<u32>,
    shared: Arc<Shared>,
    last_received: Instant,
    last_ping: Instant,
    timeout: Timeout,
    handle: Handle,
    closing: bool,
    close_sent: bool,
}

impl Shared {
    fn cancel(&self, id: u32) {
        let slot = self.pending.lock()
            .expect("correlator lock")
            .remove(&id);
        if let Some(slot) = slot {
            self.pool.dispose(slot.record);
        }
    }
    fn complete(&self, message: Message) {
        let slot = self.pending.lock()
            .expect("correlator lock")
            .remove(&message.id());
        match slot {
            Some(slot) => {
                self.pool.dispose(slot.record);
                // the waiter may be gone (cancelled); that's fine
                let _ = slot.sender.send(Ok(message));
            }
            None => {
                self.stray.fetch_add(1, Ordering::Relaxed);
                debug!("discarding stray response for message {}",
                    message.id());
            }
        }
    }
    fn fail_all(&self) {
        let slots: Vec<Slot> = {
            let mut pending = self.pending.lock()
                .expect("correlator lock");
            pending.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            self.pool.dispose(slot.record);
            let _ = slot.sender.send(Err(Error::Closed));
        }
    }
}

impl Client {
    /// Send a request, await the matching response
    ///
    /// The message id is assigned here (from the record pool) and any
    /// id already set on the message is overwritten. With a timeout
    /// the future resolves to `Error::Timeout` and the record is
    /// recycled when the deadline passes.
    pub fn request(&self, mut message: Message,
        timeout: Option<Duration>)
        -> ResponseFuture
    {
        let mut record = match self.shared.pool.rent() {
            Some(record) => record,
            None => return ResponseFuture::early(Error::InFlightLimit),
        };
        let id = record.id();
        message.set_id(id);
        message.serialize(self.shared.config.text_encoding,
            record.buf_mut());
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock()
            .expect("correlator lock")
            .insert(id, Slot {
                record: record,
                sender: tx,
            });
        if self.tx.unbounded_send(id).is_err() {
            self.shared.cancel(id);
            return ResponseFuture::early(Error::Closed);
        }
        ResponseFuture {
            id: id,
            rx: Some(rx),
            early_error: None,
            shared: Some(self.shared.clone()),
            timeout: timeout.map(|dur| {
                Timeout::new(dur, &self.handle)
                    .expect("can always set a timeout")
            }),
            done: false,
        }
    }

    /// Number of responses dropped because no request was waiting for
    /// them (late arrivals after a timeout or cancellation)
    pub fn stray_responses(&self) -> usize {
        self.shared.stray.load(Ordering::Relaxed)
    }

    /// Number of requests that can be started right now
    pub fn available_slots(&self) -> usize {
        self.shared.pool.available()
    }
}

impl ResponseFuture {
    fn early(e: Error) -> ResponseFuture {
        ResponseFuture {
            id: 0,
            rx: None,
            early_error: Some(e),
            shared: None,
            timeout: None,
            done: false,
        }
    }
}

impl Future for ResponseFuture {
    type Item = Message;
    type Error = Error;
    fn poll(&mut self) -> Poll<Message, Error> {
        if let Some(e) = self.early_error.take() {
            self.done = true;
            return Err(e);
        }
        let rx = self.rx.as_mut().expect("future polled after completion");
        match rx.poll() {
            Ok(Async::Ready(Ok(message))) => {
                self.done = true;
                Ok(Async::Ready(message))
            }
            Ok(Async::Ready(Err(e))) => {
                self.done = true;
                Err(e)
            }
            Ok(Async::NotReady) => {
                if let Some(ref mut timeout) = self.timeout {
                    match timeout.poll().expect("timeout never fails") {
                        Async::Ready(()) => {
                            self.done = true;
                            self.shared.as_ref()
                                .expect("regular future has state")
                                .cancel(self.id);
                            return Err(Error::Timeout);
                        }
                        Async::NotReady => {}
                    }
                }
                Ok(Async::NotReady)
            }
            Err(oneshot::Canceled) => {
                self.done = true;
                Err(Error::Closed)
            }
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if !self.done {
            if let Some(ref shared) = self.shared {
                shared.cancel(self.id);
            }
        }
    }
}

impl<S> Connection<S> {
    /// Wrap a fresh websocket connection (the output of the
    /// handshake) into a messaging session
    pub fn new(outp: WriteFramed<S, ClientCodec>,
        inp: ReadFramed<S, ClientCodec>,
        cfg: &Arc<Config>, handle: &Handle)
        -> (Client, Connection<S>)
    {
        let (tx, rx) = mpsc::unbounded();
        let shared = Arc::new(Shared {
            config: cfg.clone(),
            pool: RecordPool::new(cfg.max_inflight),
            pending: Mutex::new(HashMap::new()),
            stray: AtomicUsize::new(0),
        });
        let client = Client {
            tx: tx,
            shared: shared.clone(),
            handle: handle.clone(),
        };
        let conn = Connection {
            output: outp.into_inner(),
            input: inp.into_inner(),
            rx: rx,
            shared: shared,
            last_received: Instant::now(),
            last_ping: Instant::now(),
            timeout: Timeout::new(
                ::std::cmp::min(cfg.ping_interval,
                                cfg.inactivity_timeout),
                handle)
                .expect("can always set a timeout"),
            handle: handle.clone(),
            closing: false,
            close_sent: false,
        };
        (client, conn)
    }

    fn rearm_timeout(&mut self) {
        let deadline = ::std::cmp::min(
            self.last_received + self.shared.config.inactivity_timeout,
            self.last_ping + self.shared.config.ping_interval);
        self.timeout = Timeout::new_at(deadline, &self.handle)
            .expect("can always set a timeout");
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Connection<S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        loop {
            if let Some(result) = self.step()? {
                return Ok(result);
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    // One round of the write/read loop; `None` means "go again"
    fn step(&mut self) -> Result<Option<Async<()>>, Error> {
        // queued requests; this task is the only writer
        loop {
            match self.rx.poll() {
                Ok(Async::Ready(Some(id))) => {
                    let pending = self.shared.pending.lock()
                        .expect("correlator lock");
                    if let Some(slot) = pending.get(&id) {
                        write_packet(&mut self.output.out_buf, 0x2,
                            &slot.record.buf()[..], true);
                    }
                    // a cancelled request simply isn't sent
                }
                Ok(Async::Ready(None)) | Err(()) => {
                    self.closing = true;
                    break;
                }
                Ok(Async::NotReady) => break,
            }
        }
        if self.closing && !self.close_sent
            && self.shared.pending.lock()
                .expect("correlator lock").is_empty()
        {
            write_close(&mut self.output.out_buf, 1000, "", true);
            self.close_sent = true;
        }
        if let Err(e) = self.output.flush() {
            self.shared.fail_all();
            return Err(Error::Io(e));
        }
        // incoming frames; this task is the only reader
        loop {
            enum Action {
                Pong(Vec<u8>),
                CloseReply(u16),
                None,
            }
            let (action, bytes) = {
                let frame_size = self.shared.config.max_frame_size;
                let parsed =
                    parse_frame(&mut self.input.in_buf, frame_size,
                                false)
                    .map_err(|e| Error::Websocket(e.into()))?;
                match parsed {
                    Some((Frame::Binary(data), bytes)) => {
                        let encoding =
                            self.shared.config.text_encoding;
                        match Message::parse(data, encoding) {
                            Ok(message) => {
                                self.shared.complete(message);
                            }
                            Err(Error::Frame(diag)) => {
                                self.shared.stray
                                    .fetch_add(1, Ordering::Relaxed);
                                debug!("dropping malformed response \
                                    frame: {}", diag);
                            }
                            Err(..) => unreachable!(),
                        }
                        (Action::None, bytes)
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
            match action {
                Action::Pong(data) => {
                    write_packet(&mut self.output.out_buf, 0xA,
                        &data, true);
                }
                Action::CloseReply(code) => {
                    if !self.close_sent {
                        write_close(&mut self.output.out_buf, code,
                            "", true);
                    }
                    let _ = self.output.flush();
                    self.shared.fail_all();
                    return Ok(Some(Async::Ready(())));
                }
                Action::None => {}
            }
        }
        match self.input.read() {
            Ok(0) => {
                if self.input.done() {
                    self.shared.fail_all();
                    if self.close_sent {
                        return Ok(Some(Async::Ready(())));
                    }
                    return Err(Error::Closed);
                }
            }
            Ok(..) => {
                // data arrived; make sure it is processed before we
                // sleep
                return Ok(None);
            }
            Err(e) => {
                self.shared.fail_all();
                return Err(Error::Io(e));
            }
        }
        if let Err(e) = self.output.flush() {
            self.shared.fail_all();
            return Err(Error::Io(e));
        }
        match self.timeout.poll().expect("timeout never fails") {
            Async::Ready(()) => {
                let now = Instant::now();
                let quiet = self.last_received
                    + self.shared.config.inactivity_timeout;
                if now >= quiet {
                    self.shared.fail_all();
                    return Err(Error::Timeout);
                }
                if now >= self.last_ping
                    + self.shared.config.ping_interval
                {
                    debug!("sending ping");
                    write_packet(&mut self.output.out_buf, 0x9,
                        b"tk-fbm-ping", true);
                    self.last_ping = now;
                    if let Err(e) = self.output.flush() {
                        self.shared.fail_all();
                        return Err(Error::Io(e));
                    }
                }
                self.rearm_timeout();
                match self.timeout.poll().expect("timeout never fails") {
                    Async::Ready(()) => return Ok(None),
                    Async::NotReady => {}
                }
            }
            Async::NotReady => {}
        }
        Ok(Some(Async::NotReady))
    }
}
