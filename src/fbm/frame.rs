use std::str::from_utf8;

use byteorder::{BigEndian, ByteOrder};
use netbuf::Buf;

use fbm::error::ParseDiag;
use fbm::Error;

/// The two-byte delimiter after every header value and after the
/// whole header block
pub const SENTINEL: [u8; 2] = [0xFF, 0xF1];

/// Reserved header command codes
///
/// Everything else in the `0x00`-`0xFE` range is application-defined
/// and passes through the parser as opaque pairs.
pub mod commands {
    /// Carries the 4-byte message id at the head of every frame; in
    /// the header block of a response it carries a decimal status
    /// code instead
    pub const CONTROL: u8 = 0x01;
    /// Content type of the body
    pub const CONTENT_TYPE: u8 = 0x03;
    /// Generic ad-hoc header
    pub const HEADER: u8 = 0xA1;
}

/// Text encoding of header values, constant per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Le,
}

/// One FBM message: id, ordered headers, optional body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u32,
    headers: Vec<(u8, String)>,
    body: Vec<u8>,
}

impl Encoding {
    fn encode_into(&self, value: &str, buf: &mut Buf) {
        match *self {
            Encoding::Utf8 => buf.extend(value.as_bytes()),
            Encoding::Utf16Le => {
                for unit in value.encode_utf16() {
                    buf.extend(&[(unit & 0xFF) as u8, (unit >> 8) as u8]);
                }
            }
        }
    }
    fn decode(&self, data: &[u8]) -> Option<String> {
        match *self {
            Encoding::Utf8 => from_utf8(data).ok().map(|x| x.to_string()),
            Encoding::Utf16Le => {
                if data.len() % 2 != 0 {
                    return None;
                }
                let units: Vec<u16> = data.chunks(2)
                    .map(|pair| (pair[0] as u16) | ((pair[1] as u16) << 8))
                    .collect();
                String::from_utf16(&units).ok()
            }
        }
    }
}

fn find_sentinel(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == SENTINEL)
}

impl Message {
    /// Create an empty message with the given id
    pub fn new(id: u32) -> Message {
        Message {
            id: id,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
    /// The message id
    pub fn id(&self) -> u32 {
        self.id
    }
    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = id;
    }
    /// Append a header
    ///
    /// The id pseudo-header at the frame start is written by the
    /// framer itself; a `0x01` header added here is a response status
    /// (`set_status` is the shortcut).
    ///
    /// # Panics
    ///
    /// Panics on the `0xFF` sentinel lead-in, which can never be a
    /// command.
    pub fn add_header<V: Into<String>>(&mut self, command: u8, value: V)
        -> &mut Self
    {
        assert!(command != 0xFF, "0xFF is reserved for the sentinel");
        self.headers.push((command, value.into()));
        self
    }
    /// Append a generic (`0xA1`) header
    pub fn add_generic<V: Into<String>>(&mut self, value: V) -> &mut Self
    {
        self.headers.push((commands::HEADER, value.into()));
        self
    }
    /// Set the content type header
    pub fn set_content_type<V: Into<String>>(&mut self, value: V)
        -> &mut Self
    {
        self.headers.push((commands::CONTENT_TYPE, value.into()));
        self
    }
    /// Set a response status (a `0x01` header in the block)
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.headers.push((commands::CONTROL, code.to_string()));
        self
    }
    /// Replace the body
    pub fn set_body<V: Into<Vec<u8>>>(&mut self, body: V) -> &mut Self {
        self.body = body.into();
        self
    }

    /// All headers in wire order (the id pseudo-header excluded)
    pub fn headers(&self) -> &[(u8, String)] {
        &self.headers
    }
    /// First header with the given command
    pub fn header(&self, command: u8) -> Option<&str> {
        self.headers.iter()
            .find(|&&(cmd, _)| cmd == command)
            .map(|&(_, ref value)| &value[..])
    }
    /// The content type, if present
    pub fn content_type(&self) -> Option<&str> {
        self.header(commands::CONTENT_TYPE)
    }
    /// A response status carried in a `0x01` header
    pub fn status(&self) -> Option<u16> {
        self.header(commands::CONTROL)
            .and_then(|value| value.trim().parse().ok())
    }
    /// The message body
    pub fn body(&self) -> &[u8] {
        &self.body
    }
    /// Take the body out, leaving the headers in place
    pub fn take_body(&mut self) -> Vec<u8> {
        ::std::mem::replace(&mut self.body, Vec::new())
    }

    /// Serialize the message into an output buffer
    pub fn serialize(&self, encoding: Encoding, buf: &mut Buf) {
        let mut id_bytes = [commands::CONTROL, 0, 0, 0, 0];
        BigEndian::write_u32(&mut id_bytes[1..], self.id);
        buf.extend(&id_bytes);
        buf.extend(&SENTINEL);
        for &(command, ref value) in &self.headers {
            buf.extend(&[command]);
            encoding.encode_into(value, buf);
            buf.extend(&SENTINEL);
        }
        buf.extend(&SENTINEL);
        buf.extend(&self.body);
    }

    /// Parse a message from one websocket frame payload
    pub fn parse(data: &[u8], encoding: Encoding)
        -> Result<Message, Error>
    {
        // shortest valid frame: id segment + empty header block
        if data.len() < 5 + 2 + 2 {
            return Err(Error::Frame(ParseDiag::BUFFER_TOO_SMALL));
        }
        let id_end = match find_sentinel(data) {
            Some(x) => x,
            None => {
                return Err(Error::Frame(ParseDiag::MISSING_TERMINATOR));
            }
        };
        if id_end != 5 {
            return Err(Error::Frame(ParseDiag::INVALID_HEADER_READ));
        }
        if data[0] != commands::CONTROL {
            return Err(Error::Frame(ParseDiag::INVALID_HEADER_READ
                | ParseDiag::UNKNOWN_COMMAND));
        }
        let id = BigEndian::read_u32(&data[1..5]);
        let mut message = Message::new(id);
        let mut pos = id_end + 2;
        loop {
            if data.len() < pos + 2 {
                return Err(Error::Frame(ParseDiag::MISSING_TERMINATOR));
            }
            if data[pos..pos + 2] == SENTINEL {
                // end of the header block; the rest is the body
                message.body = data[pos + 2..].to_vec();
                return Ok(message);
            }
            let value_end = match find_sentinel(&data[pos..]) {
                Some(x) => pos + x,
                None => {
                    return Err(Error::Frame(
                        ParseDiag::MISSING_TERMINATOR));
                }
            };
            let command = data[pos];
            let value = match encoding.decode(&data[pos + 1..value_end]) {
                Some(value) => value,
                None => {
                    return Err(Error::Frame(
                        ParseDiag::INVALID_HEADER_READ));
                }
            };
            message.headers.push((command, value));
            pos = value_end + 2;
        }
    }
}
