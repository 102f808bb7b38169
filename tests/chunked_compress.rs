extern crate brotli;
extern crate futures;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tk_fbm;

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{Async, Future, Poll};
use tk_bufstream::MockData;
use tokio_core::reactor::Core;

use tk_fbm::buffer::{BufferConfig, Pool};
use tk_fbm::server::buffered::{BufferedDispatcher, Request};
use tk_fbm::server::{Config, Encoder, EncoderDone, Error, Proto};
use tk_fbm::server::WaitFlush;
use tk_fbm::Status;

const SOURCE_LEN: usize = 1 << 20;

fn source_data() -> Vec<u8> {
    let mut data = Vec::with_capacity(SOURCE_LEN);
    let mut n: u32 = 0x1234_5678;
    while data.len() < SOURCE_LEN {
        data.extend(format!("record {:08x} with some padding text\n", n)
            .as_bytes());
        n = n.wrapping_mul(1664525).wrapping_add(1013904223);
    }
    data.truncate(SOURCE_LEN);
    data
}

// A handler future that streams the megabyte through the bounded
// buffers, yielding whenever they fill up
struct StreamBody {
    enc: Option<Encoder<MockData>>,
    wait: Option<WaitFlush<MockData>>,
    data: Arc<Vec<u8>>,
    written: usize,
}

impl Future for StreamBody {
    type Item = EncoderDone<MockData>;
    type Error = Error;
    fn poll(&mut self) -> Poll<EncoderDone<MockData>, Error> {
        loop {
            if let Some(mut wait) = self.wait.take() {
                match wait.poll().map_err(Error::Io)? {
                    Async::Ready(enc) => self.enc = Some(enc),
                    Async::NotReady => {
                        self.wait = Some(wait);
                        return Ok(Async::NotReady);
                    }
                }
            }
            let mut enc = self.enc.take().expect("encoder is here");
            let n = enc.write_body(&self.data[self.written..]);
            self.written += n;
            if self.written == self.data.len() {
                return Ok(Async::Ready(enc.done()));
            }
            if n == 0 {
                self.wait = Some(enc.wait_flush(1));
            } else {
                self.enc = Some(enc);
            }
        }
    }
}

fn run_once(input: &[u8]) -> String {
    let mut lp = Core::new().unwrap();
    let handle = lp.handle();
    let cfg = Config::new()
        .keep_alive_timeout(Duration::from_millis(50))
        .done();
    let pool = Pool::new(&BufferConfig::new(), 1);
    let mock = MockData::new();
    mock.add_input(input);
    let data = Arc::new(source_data());
    let service = move |_req: Request, mut e: Encoder<MockData>| {
        e.status(Status::Ok).unwrap();
        e.add_chunked().unwrap();
        e.add_header("Content-Type", "text/plain").unwrap();
        e.done_headers().unwrap();
        StreamBody {
            enc: Some(e),
            wait: None,
            data: data.clone(),
            written: 0,
        }
    };
    let proto = Proto::new(mock.clone(), addr(), &pool, &cfg,
        BufferedDispatcher::new(addr(), &handle, move || {
            let service = service.clone();
            move |req, e| service(req, e)
        }),
        &handle);
    lp.run(proto).expect("connection completes");
    String::from_utf8_lossy(&mock.output(..)).to_string()
}

fn addr() -> SocketAddr {
    "127.0.0.1:1234".parse().unwrap()
}

fn split_head(raw: &str) -> (&str, &[u8]) {
    let pos = raw.find("\r\n\r\n").expect("response head ends");
    (&raw[..pos + 2], &raw.as_bytes()[pos + 4..])
}

fn dechunk(mut data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let line_end = data.windows(2).position(|w| w == b"\r\n")
            .expect("chunk size line");
        let size = usize::from_str_radix(
            ::std::str::from_utf8(&data[..line_end]).unwrap(), 16)
            .unwrap();
        data = &data[line_end + 2..];
        if size == 0 {
            assert_eq!(data, b"\r\n");
            return body;
        }
        body.extend(&data[..size]);
        assert_eq!(&data[size..size + 2], b"\r\n");
        data = &data[size + 2..];
    }
}

#[test]
fn chunked_brotli_round_trip() {
    let raw = run_once(
        b"GET /big HTTP/1.1\r\nHost: x\r\nAccept-Encoding: br\r\n\r\n");
    let (head, body) = split_head(&raw);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{}", head);
    assert!(head.contains("Transfer-Encoding: chunked\r\n"), "{}", head);
    assert!(head.contains("Content-Encoding: br\r\n"), "{}", head);
    assert!(!head.contains("Content-Length"), "{}", head);

    let compressed = dechunk(body);
    assert!(compressed.len() < SOURCE_LEN / 2,
        "1MB of text compresses well, got {}", compressed.len());
    let mut decoded = Vec::new();
    brotli::Decompressor::new(&compressed[..], 8192)
        .read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded.len(), SOURCE_LEN);
    assert_eq!(decoded, source_data());
}

#[test]
fn chunked_without_accepted_encoding_is_plain() {
    let raw = run_once(b"GET /big HTTP/1.1\r\nHost: x\r\n\r\n");
    let (head, body) = split_head(&raw);
    assert!(head.contains("Transfer-Encoding: chunked\r\n"), "{}", head);
    assert!(!head.contains("Content-Encoding"), "{}", head);
    let plain = dechunk(body);
    assert_eq!(plain.len(), SOURCE_LEN);
    assert_eq!(plain, source_data());
}

#[test]
fn gzip_is_not_offered_by_default_registry() {
    let raw = run_once(
        b"GET /big HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip\r\n\r\n");
    let (head, _) = split_head(&raw);
    assert!(!head.contains("Content-Encoding"), "{}", head);
}
