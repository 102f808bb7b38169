use std::sync::Arc;

use base_serializer::{HeadBuf, HeaderError, MessageState};
use buffer::Block;
use enums::{Status, Version};
use server::Config;

const PART1: &'static str = "\
    <!DOCTYPE html>\
    <html>\
        <head>\
            <title>\
    ";
const PART2: &'static str = "\
            </title>\
        </head>\
        <body>\
            <h1>\
    ";
const PART3: &'static str = concat!("\
            </h1>\
            <hr>\
            <p>Yours faithfully,<br>\
                tk-fbm/", env!("CARGO_PKG_VERSION"), "\
            </p>\
        </body>\
    </html>\
    ");

/// The last-resort response when not even a buffer block could be
/// allocated for the connection
pub(crate) const OVERLOADED: &'static [u8] = b"\
    HTTP/1.1 503 Service Unavailable\r\n\
    Content-Type: text/html\r\n\
    Content-Length: 0\r\n\
    Connection: close\r\n\
    \r\n";

/// A rendered terminal page: head in the header segment, body in
/// staging
pub(crate) struct ErrorPage {
    pub head_len: usize,
    pub body_len: usize,
}

/// Render the default error page for a terminal response
///
/// The head lands in the response-header segment and the tiny HTML
/// body in the staging segment, so the page can be flushed like any
/// other response tail. Terminal responses always close.
pub(crate) fn render(status: Status, version: Version, block: &mut Block,
    config: &Arc<Config>)
    -> Result<ErrorPage, HeaderError>
{
    let code = status.code();
    let reason = status.reason();
    let mut body_len = 0;
    if status.response_has_body() && version != Version::Http09 {
        let staging = block.staging_mut();
        for piece in &[PART1.as_bytes(), format!("{:03} {}", code, reason)
                .as_bytes(), PART2.as_bytes(),
                format!("{:03} {}", code, reason).as_bytes(),
                PART3.as_bytes()]
        {
            staging[body_len..body_len + piece.len()]
                .copy_from_slice(piece);
            body_len += piece.len();
        }
    }
    let mut head_len = 0;
    {
        let mut buf = HeadBuf::new(block.response_header_mut(),
            &mut head_len);
        let mut msg = MessageState::ResponseStart {
            version: version,
            body: ::base_serializer::Body::Normal,
            close: true,
        };
        msg.response_status(&mut buf, code, reason)?;
        if version != Version::Http09 {
            msg.add_header(&mut buf, "Content-Type", b"text/html")?;
            msg.add_header(&mut buf, "Server",
                config.server_header.as_bytes())?;
            msg.add_length(body_len as u64)?;
        }
        msg.done_headers(&mut buf, None)?;
    }
    Ok(ErrorPage {
        head_len: head_len,
        body_len: body_len,
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use buffer::{BufferConfig, Pool};
    use enums::{Status, Version};
    use server::Config;
    use super::render;

    #[test]
    fn renders_a_small_page() {
        let pool = Pool::new(&BufferConfig::new(), 1);
        let mut block = pool.allocate().unwrap();
        block.start_response();
        let cfg = Arc::new(Config::new());
        let page = render(Status::RequestHeaderFieldsTooLarge,
            Version::Http11, &mut block, &cfg).unwrap();
        let head = String::from_utf8_lossy(
            &block.response_header()[..page.head_len]).to_string();
        assert!(head.starts_with(
            "HTTP/1.1 431 Request Header Fields Too Large\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains(
            &format!("Content-Length: {}\r\n", page.body_len)));
        let body = String::from_utf8_lossy(
            &block.staging()[..page.body_len]).to_string();
        assert!(body.contains("431 Request Header Fields Too Large"));
    }

    #[test]
    fn bare_page_for_09() {
        let pool = Pool::new(&BufferConfig::new(), 1);
        let mut block = pool.allocate().unwrap();
        block.start_response();
        let cfg = Arc::new(Config::new());
        let page = render(Status::BadRequest, Version::Http09,
            &mut block, &cfg).unwrap();
        assert_eq!(page.head_len, 0);
        assert_eq!(page.body_len, 0);
    }
}
