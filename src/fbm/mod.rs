//! Fixed-buffer messaging (FBM)
//!
//! A binary request/response protocol multiplexed over a single
//! websocket connection. Many requests may be in flight at once; each
//! carries a 32-bit message id and responses are matched to requests
//! by id only, in whatever order they arrive.
//!
//! The client side (`Client` + `Connection`) correlates responses via
//! a fixed pool of request records; the server side (`Session`) feeds
//! each incoming message to a `Handler` and writes the replies back,
//! serialized by the single session task.

pub mod client;
pub mod server;
mod error;
mod frame;
mod record;

pub use self::client::{Client, Connection, ResponseFuture};
pub use self::error::{Error, ParseDiag};
pub use self::frame::{commands, Encoding, Message};
pub use self::server::{Handler, MessageBody, Session};

use std::sync::Arc;
use std::time::Duration;

/// Configuration of one messaging session (either side)
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) max_inflight: usize,
    pub(crate) text_encoding: Encoding,
    pub(crate) error_status: u16,
    pub(crate) ping_interval: Duration,
    pub(crate) inactivity_timeout: Duration,
    pub(crate) max_frame_size: usize,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            max_inflight: 10,
            text_encoding: Encoding::Utf8,
            error_status: 500,
            ping_interval: Duration::new(10, 0),
            inactivity_timeout: Duration::new(30, 0),
            max_frame_size: 10 << 20,
        }
    }
    /// Number of requests that may be in flight at once
    ///
    /// On the client this is the size of the request record pool; on
    /// the server the number of handler futures run concurrently.
    pub fn max_inflight(&mut self, value: usize) -> &mut Self {
        self.max_inflight = value;
        self
    }
    /// Text encoding of header values
    ///
    /// UTF-8 by default; the setting is a per-session constant, both
    /// sides must agree on it out of band.
    pub fn text_encoding(&mut self, value: Encoding) -> &mut Self {
        self.text_encoding = value;
        self
    }
    /// The status code a server session reports when a handler fails
    pub fn error_status(&mut self, value: u16) -> &mut Self {
        self.error_status = value;
        self
    }
    /// Set ping interval
    ///
    /// If no messages have been received within this interval, a ping
    /// frame is sent.
    pub fn ping_interval(&mut self, dur: Duration) -> &mut Self {
        self.ping_interval = dur;
        self
    }
    /// Set inactivity timeout
    ///
    /// The session is shut down when nothing was received for this
    /// long.
    pub fn inactivity_timeout(&mut self, dur: Duration) -> &mut Self {
        self.inactivity_timeout = dur;
        self
    }
    /// Maximum websocket frame size accepted in this session
    pub fn max_frame_size(&mut self, size: usize) -> &mut Self {
        self.max_frame_size = size;
        self
    }
    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}
