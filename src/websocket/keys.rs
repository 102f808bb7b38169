use std::fmt;
use std::str::from_utf8_unchecked;

use rand::{thread_rng, Rng};
use sha1::Sha1;

/// WebSocket GUID constant (provided by spec)
pub const GUID: &'static str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The `Sec-WebSocket-Accept` header value
///
/// You can add it using `enc.format_header("Sec-WebSocket-Accept",
/// accept)`. Or use any other thing that supports `Display`.
pub struct Accept([u8; 20]);

/// The `Sec-WebSocket-Key` header value
///
/// You can add it using `enc.format_header("Sec-WebSocket-Key", key)`.
/// Or use any other thing that supports `Display`.
pub struct Key([u8; 16]);

const CHARS: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                               abcdefghijklmnopqrstuvwxyz\
                               0123456789+/";

fn base64(data: &[u8], f: &mut fmt::Formatter) -> fmt::Result {
    // enough for both the 16-byte key and the 20-byte accept
    let mut buf = [0u8; 28];
    let mut out = 0;
    let mut iter = data.chunks(3);
    while let Some(chunk) = iter.next() {
        let n = ((chunk[0] as usize) << 16)
            | ((*chunk.get(1).unwrap_or(&0) as usize) << 8)
            | (*chunk.get(2).unwrap_or(&0) as usize);
        buf[out] = CHARS[(n >> 18) & 63];
        buf[out+1] = CHARS[(n >> 12) & 63];
        buf[out+2] = if chunk.len() > 1 { CHARS[(n >> 6) & 63] } else { b'=' };
        buf[out+3] = if chunk.len() > 2 { CHARS[n & 63] } else { b'=' };
        out += 4;
    }
    fmt::Write::write_str(f, unsafe {
        from_utf8_unchecked(&buf[..out])
    })
}

impl Key {
    /// Create a new (random) key, eligible to use for a client
    /// connection
    pub fn new() -> Key {
        let mut key = [0u8; 16];
        thread_rng().fill_bytes(&mut key);
        return Key(key);
    }
}

impl Accept {
    /// Create an Accept header value from a key received in a header
    ///
    /// Note: key here is a key as passed in the header value
    /// (base64-encoded). This does not validate the key (which is not
    /// required by the spec).
    pub fn from_key_bytes(key: &[u8]) -> Accept {
        let mut sha1 = Sha1::new();
        sha1.update(key);
        sha1.update(GUID.as_bytes());
        Accept(sha1.digest().bytes())
    }
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        base64(&self.0, f)
    }
}

impl fmt::Debug for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "websocket::Accept({})", self)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        base64(&self.0, f)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "websocket::Key({})", self)
    }
}

#[cfg(test)]
mod test {
    use super::Accept;

    #[test]
    fn rfc_6455_sample_accept() {
        // the handshake example straight from the RFC
        let accept = Accept::from_key_bytes(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(format!("{}", accept),
                   "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
