//! HTTP server protocol implementation
//!
mod config;
mod error;
mod codec;
mod proto;
mod encoder;
mod request_target;
mod headers;
mod websocket;
mod recv_mode;
mod simple_error_page;
pub mod buffered;

pub use self::error::Error;
pub use self::encoder::{Encoder, EncoderDone, RawBody, RawBodyFuture};
pub use self::encoder::WaitFlush;
pub use self::codec::{Codec, Dispatcher, Outcome};
pub use self::proto::Proto;
pub use self::headers::{Head, BodyKind};
pub use self::request_target::RequestTarget;
pub use self::recv_mode::RecvMode;
pub use self::websocket::{WebsocketAccept, WebsocketHandshake};

use std::sync::Arc;
use std::time::Duration;

use compress;

/// Fine-grained configuration of the HTTP server
#[derive(Clone)]
pub struct Config {
    first_byte_timeout: Duration,
    keep_alive_timeout: Duration,
    headers_timeout: Duration,
    input_body_byte_timeout: Duration,
    input_body_whole_timeout: Duration,
    output_body_byte_timeout: Duration,
    output_body_whole_timeout: Duration,
    max_request_turns: Option<usize>,
    server_header: String,
    allow_proxy_target: bool,
    compression: Option<Arc<compress::Registry>>,
}
