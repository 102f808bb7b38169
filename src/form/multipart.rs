use std::str::from_utf8;

use httparse;

/// Number of part headers to allocate on a stack
const MAX_PART_HEADERS: usize = 16;

quick_error! {
    /// Errors of multipart/form-data decoding
    #[derive(Debug, PartialEq)]
    pub enum MultipartError {
        /// Opening boundary is missing
        MissingBoundary {
            description("multipart body doesn't start with the boundary")
        }
        /// Body ends before the closing boundary
        Truncated {
            description("multipart body is truncated")
        }
        /// Part headers can't be parsed
        BadPartHeaders {
            description("invalid part headers")
        }
        /// Too many headers in a single part
        TooManyPartHeaders {
            description("too many headers in a multipart part")
        }
    }
}

/// A single decoded part of a multipart/form-data body
///
/// Header values and the payload borrow the buffered body bytes.
#[derive(Debug)]
pub struct Part<'a> {
    headers: Vec<(&'a str, &'a [u8])>,
    /// Raw payload of the part
    pub data: &'a [u8],
}

impl<'a> Part<'a> {
    /// Part headers in order of appearance
    pub fn headers(&self) -> &[(&'a str, &'a [u8])] {
        &self.headers
    }
    fn header(&self, name: &str) -> Option<&'a [u8]> {
        self.headers.iter()
            .find(|&&(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, v)| v)
    }
    /// `Content-Type` of the part, if present
    pub fn content_type(&self) -> Option<&'a [u8]> {
        self.header("Content-Type")
    }
    /// The `name` parameter of `Content-Disposition`
    pub fn name(&self) -> Option<&'a str> {
        self.disposition_param("name")
    }
    /// The `filename` parameter of `Content-Disposition`
    pub fn filename(&self) -> Option<&'a str> {
        self.disposition_param("filename")
    }
    fn disposition_param(&self, param: &str) -> Option<&'a str> {
        let disp = self.header("Content-Disposition")?;
        let disp = from_utf8(disp).ok()?;
        for item in disp.split(';').skip(1) {
            let mut kv = item.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim();
            if !key.eq_ignore_ascii_case(param) {
                continue;
            }
            let value = kv.next().unwrap_or("").trim();
            return Some(value.trim_matches('"'));
        }
        None
    }
}

/// Extract the boundary parameter from a `Content-Type` value
pub fn boundary(content_type: &[u8]) -> Option<String> {
    let text = from_utf8(content_type).ok()?;
    let mut items = text.split(';');
    if !items.next()?.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    for item in items {
        let mut kv = item.splitn(2, '=');
        if kv.next().unwrap_or("").trim()
            .eq_ignore_ascii_case("boundary")
        {
            let value = kv.next()?.trim().trim_matches('"');
            if value.len() > 0 {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scan a fully buffered body for boundary markers and decode parts
pub fn parse_multipart<'a>(body: &'a [u8], boundary: &str)
    -> Result<Vec<Part<'a>>, MultipartError>
{
    use self::MultipartError::*;

    let mut delim = Vec::with_capacity(boundary.len() + 4);
    delim.extend(b"--");
    delim.extend(boundary.as_bytes());

    // a preamble before the first boundary is legal and skipped
    let mut pos = match find(body, &delim) {
        Some(x) => x + delim.len(),
        None => return Err(MissingBoundary),
    };
    let mut parts = Vec::new();
    loop {
        // after a delimiter: "--" closes the body, CRLF opens a part
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(Truncated);
        }
        pos += 2;

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (header_bytes, headers) =
            match httparse::parse_headers(&body[pos..], &mut headers) {
                Ok(httparse::Status::Complete((bytes, parsed))) => {
                    (bytes, parsed)
                }
                Ok(httparse::Status::Partial) => return Err(Truncated),
                Err(httparse::Error::TooManyHeaders) => {
                    return Err(TooManyPartHeaders);
                }
                Err(_) => return Err(BadPartHeaders),
            };
        pos += header_bytes;

        // payload runs to the CRLF preceding the next delimiter
        let mut marker = Vec::with_capacity(delim.len() + 2);
        marker.extend(b"\r\n");
        marker.extend(&delim);
        let data_len = match find(&body[pos..], &marker) {
            Some(x) => x,
            None => return Err(Truncated),
        };
        parts.push(Part {
            headers: headers.iter()
                .map(|h| (h.name, h.value))
                .collect(),
            data: &body[pos..pos + data_len],
        });
        pos += data_len + marker.len();
    }
}

#[cfg(test)]
mod test {
    use super::{boundary, parse_multipart, MultipartError};

    const BODY: &'static [u8] = b"--xyzzy\r\n\
        Content-Disposition: form-data; name=\"greeting\"\r\n\
        \r\n\
        hello\r\n\
        --xyzzy\r\n\
        Content-Disposition: form-data; name=\"upload\"; \
            filename=\"data.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n\
        \x01\x02\r\n\x03\r\n\
        --xyzzy--\r\n";

    #[test]
    fn boundary_extraction() {
        assert_eq!(
            boundary(b"multipart/form-data; boundary=xyzzy"),
            Some("xyzzy".to_string()));
        assert_eq!(
            boundary(b"multipart/form-data; boundary=\"quo ted\""),
            Some("quo ted".to_string()));
        assert_eq!(boundary(b"application/x-www-form-urlencoded"), None);
        assert_eq!(boundary(b"multipart/form-data"), None);
    }

    #[test]
    fn two_parts() {
        let parts = parse_multipart(BODY, "xyzzy").unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name(), Some("greeting"));
        assert_eq!(parts[0].filename(), None);
        assert_eq!(parts[0].data, b"hello");

        assert_eq!(parts[1].name(), Some("upload"));
        assert_eq!(parts[1].filename(), Some("data.bin"));
        assert_eq!(parts[1].content_type(),
                   Some(&b"application/octet-stream"[..]));
        // binary payload with embedded CRLF survives
        assert_eq!(parts[1].data, b"\x01\x02\r\n\x03");
    }

    #[test]
    fn preamble_is_skipped() {
        let mut body = Vec::new();
        body.extend(b"this is ignored\r\n".iter());
        body.extend(BODY.iter());
        let parts = parse_multipart(&body, "xyzzy").unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn missing_boundary() {
        assert_eq!(parse_multipart(b"no delimiters here", "xyzzy")
                       .unwrap_err(),
                   MultipartError::MissingBoundary);
    }

    #[test]
    fn truncated_body() {
        let cut = &BODY[..BODY.len() - 12];
        assert_eq!(parse_multipart(cut, "xyzzy").unwrap_err(),
                   MultipartError::Truncated);
    }

    #[test]
    fn empty_part_list() {
        let parts = parse_multipart(b"--xyzzy--\r\n", "xyzzy").unwrap();
        assert!(parts.is_empty());
    }
}
