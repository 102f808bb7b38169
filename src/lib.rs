//! HTTP/1.x server engine with fixed-buffer messaging over websockets,
//! based on `tokio` tools
#![recursion_limit="100"]

extern crate brotli;
extern crate byteorder;
extern crate flate2;
extern crate futures;
extern crate httparse;
extern crate httpdate;
extern crate netbuf;
extern crate rand;
extern crate sha1;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tokio_io;
extern crate url;
extern crate zstd;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod buffer;
pub mod compress;
pub mod fbm;
pub mod form;
pub mod server;
pub mod websocket;
mod enums;
mod headers;
mod base_serializer;
mod chunked;
mod body_parser;

pub use enums::{Version, Method, Status};
