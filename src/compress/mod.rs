//! Pluggable streaming compression for response bodies
//!
//! A `Compressor` is a factory registered at startup; it creates one
//! `CompressStream` per response. The stream works in blocks: the caller
//! feeds an input slice and a non-empty output slice, and gets back how
//! much of each was used. At the end of the body `finish` is called
//! until it reports zero additional output.
//!
//! When nothing else is registered and compression is not disabled in
//! the server config, the engine registers a brotli-only compressor with
//! quality 9 and a 24-bit window.

mod encoders;

pub use self::encoders::{BrotliCompressor, DeflateCompressor};
pub use self::encoders::{GzipCompressor, ZstdCompressor};

use std::fmt;
use std::io;
use std::sync::Arc;

use headers::accept_encoding_tokens;

/// A content-coding we know how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Brotli,
    Gzip,
    Deflate,
    Zstd,
}

/// Result of one compression block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Bytes of input consumed (`<= input.len()`)
    pub consumed: usize,
    /// Bytes written into the output slice (`<= output.len()`)
    pub written: usize,
    /// More output is pending; call again with a fresh output slice
    /// before feeding more input
    pub needs_output: bool,
}

/// Per-response compression state
///
/// The state is never shared: each response gets its own instance from
/// `Compressor::start` and drops it when the body ends.
pub trait CompressStream {
    /// Compress a block of the body
    fn compress(&mut self, input: &[u8], output: &mut [u8])
        -> io::Result<Block>;
    /// Finalize the stream
    ///
    /// Must be called once at the end of the body and then repeatedly
    /// until it returns zero bytes written.
    fn finish(&mut self, output: &mut [u8]) -> io::Result<usize>;
}

/// Factory for compression streams
pub trait Compressor {
    /// Methods this compressor can encode
    fn methods(&self) -> &[Method];
    /// Create a stream for one of the supported methods
    ///
    /// # Panics
    ///
    /// Implementations may panic when `method` is not in `methods()`.
    fn start(&self, method: Method) -> Box<CompressStream>;
}

/// The set of compressors registered with a server
pub struct Registry {
    compressors: Vec<Box<Compressor>>,
}

impl Method {
    /// The `Accept-Encoding` / `Content-Encoding` token
    pub fn token(&self) -> &'static str {
        match *self {
            Method::Brotli => "br",
            Method::Gzip => "gzip",
            Method::Deflate => "deflate",
            Method::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Registry {
        Registry {
            compressors: Vec::new(),
        }
    }
    /// Register a compressor
    ///
    /// Compressors registered earlier win the method negotiation.
    pub fn register<C: Compressor + 'static>(&mut self, compressor: C)
        -> &mut Self
    {
        self.compressors.push(Box::new(compressor));
        self
    }
    /// Finish building and wrap into an Arc to share with the server
    pub fn done(self) -> Arc<Registry> {
        Arc::new(self)
    }
    /// The default registry: brotli only, quality 9, 24-bit window
    pub fn default() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register(BrotliCompressor::new(9, 24));
        Arc::new(registry)
    }

    /// Pick a method for a client `Accept-Encoding` value
    ///
    /// Registration order decides between several acceptable methods.
    pub fn negotiate(&self, accept_encoding: &[u8])
        -> Option<(Method, Box<CompressStream>)>
    {
        let accepted: Vec<String> =
            accept_encoding_tokens(accept_encoding).collect();
        if accepted.is_empty() {
            return None;
        }
        for compressor in &self.compressors {
            for &method in compressor.methods() {
                if accepted.iter().any(|tok| tok == method.token()) {
                    return Some((method, compressor.start(method)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::{Method, Registry};
    use super::{BrotliCompressor, GzipCompressor};

    #[test]
    fn negotiation_prefers_registration_order() {
        let mut registry = Registry::new();
        registry.register(BrotliCompressor::new(9, 24));
        registry.register(GzipCompressor::new(6));
        let (method, _) = registry.negotiate(b"gzip, br").unwrap();
        assert_eq!(method, Method::Brotli);
        let (method, _) = registry.negotiate(b"gzip;q=0.5").unwrap();
        assert_eq!(method, Method::Gzip);
        assert!(registry.negotiate(b"identity").is_none());
        assert!(registry.negotiate(b"").is_none());
    }

    #[test]
    fn default_registry_is_brotli_only() {
        let registry = Registry::default();
        assert!(registry.negotiate(b"br").is_some());
        assert!(registry.negotiate(b"gzip, deflate").is_none());
    }
}
