//! Decoding of query strings and form bodies
//!
//! Query strings and `application/x-www-form-urlencoded` bodies decode
//! into a flat ordered multimap; `multipart/form-data` bodies are
//! scanned for boundary markers and yield their parts with sub-headers.
//! Both operate on an already buffered byte slice (the form-data
//! segment of the connection buffer).

mod urlencoded;
mod multipart;

pub use self::urlencoded::FormData;
pub use self::multipart::{parse_multipart, boundary, Part, MultipartError};
