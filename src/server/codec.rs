use futures::{Async, Future};
use tk_bufstream::{ReadBuf, WriteBuf};

use enums::Status;
use super::{Error, Encoder, EncoderDone, Head, RecvMode};

/// What a response future resolved to
///
/// Connection termination is an explicit outcome, not an error escape
/// hatch: a handler that wants the connection gone returns `Terminate`,
/// optionally with a terminal status the engine sends before closing.
pub enum Outcome<S> {
    /// The response was written, keep the connection going if allowed
    Done(EncoderDone<S>),
    /// Close the connection
    ///
    /// With `Some(status)` (and a response that hasn't started yet)
    /// the engine emits a terminal response first; with `None` the
    /// connection just closes. The untouched encoder is handed back so
    /// the engine still owns the transport.
    Terminate(Option<Status>, Encoder<S>),
}

/// This is a low-level interface to the http server
///
/// The dispatcher yields one `Codec` per request as soon as the head is
/// parsed.
pub trait Dispatcher<S> {
    /// The codec type for a single request/response turn
    type Codec: Codec<S>;

    /// Received headers of a request
    ///
    /// At this point we already extracted all the headers and other
    /// data that we need to ensure correctness of the protocol. If you
    /// need to handle some data from the headers you need to store them
    /// somewhere (for example on `self`) for further processing.
    fn headers_received(&mut self, headers: &Head)
        -> Result<Self::Codec, Error>;
}

/// A handler of a single request/response turn
pub trait Codec<S> {
    /// The future that writes the response
    type ResponseFuture: Future<Item=Outcome<S>, Error=Error>;

    /// Return a mode which will be used to receive the request body
    ///
    /// Called once, right after `headers_received`.
    fn recv_mode(&mut self) -> RecvMode;

    /// A chunk of the request body has been received
    ///
    /// `end` equals `true` for the last chunk of data.
    ///
    /// Returns `Async::Ready(x)` to denote that it has consumed `x`
    /// bytes. If some bytes are left they are passed again on the next
    /// call.
    ///
    /// In buffered mode this is called exactly once, with the whole
    /// body and `end == true`.
    ///
    /// The protocol panics if the returned number of bytes is larger
    /// than `data.len()`.
    fn data_received(&mut self, data: &[u8], end: bool)
        -> Result<Async<usize>, Error>;

    /// Trailers of a chunked request body have been received
    ///
    /// They were validated against the header-segment limit and belong
    /// to the request header list. The default implementation drops
    /// them.
    fn trailers_received(&mut self,
        #[allow(unused_variables)] trailers: &[(String, Vec<u8>)])
        -> Result<(), Error>
    {
        Ok(())
    }

    /// Start writing a response
    ///
    /// This method is called when the request body is fully received
    /// (strict turn ordering: the next request head is not even read
    /// until the future resolves and the response is flushed).
    fn start_response(&mut self, e: Encoder<S>) -> Self::ResponseFuture;

    /// The connection was upgraded to an alternate protocol
    ///
    /// Called after the 101 response is flushed, for codecs that
    /// returned `RecvMode::hijack()`. The engine no longer owns the
    /// transport; bytes that arrived early are already in the read
    /// buffer.
    fn hijack(&mut self, write_buf: WriteBuf<S>, read_buf: ReadBuf<S>) {
        let (_, _) = (write_buf, read_buf);
        panic!("this codec never asks for an upgrade");
    }
}
