//! Websocket support stuff
//!
//! The HTTP side of a websocket (handshake detection, the 101
//! response) lives in the `server` module; this one contains the frame
//! codec, handshake keys and the client handshake used to open
//! outgoing sessions. Fixed-buffer messaging rides in binary frames of
//! this layer.

mod error;
pub(crate) mod zero_copy;
mod alloc;
mod codec;
pub mod client;

mod keys;

pub use self::error::Error;
pub use self::zero_copy::Frame;
pub use self::alloc::Packet;
pub use self::codec::{ClientCodec, ServerCodec};
pub use self::keys::{Accept, Key};
pub use self::client::{Authorizer, HandshakeProto, SimpleAuthorizer};
