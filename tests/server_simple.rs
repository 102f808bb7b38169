extern crate futures;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tk_fbm;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{ok, FutureResult};
use tk_bufstream::MockData;
use tokio_core::reactor::Core;

use tk_fbm::buffer::{BufferConfig, Pool};
use tk_fbm::server::buffered::{BufferedDispatcher, Request};
use tk_fbm::server::{Config, Encoder, EncoderDone, Error, Proto};
use tk_fbm::Status;

fn addr() -> SocketAddr {
    "127.0.0.1:1234".parse().unwrap()
}

fn test_config() -> Arc<Config> {
    Config::new()
        .first_byte_timeout(Duration::from_millis(200))
        .headers_timeout(Duration::from_millis(200))
        .keep_alive_timeout(Duration::from_millis(50))
        .input_body_byte_timeout(Duration::from_millis(200))
        .output_body_byte_timeout(Duration::from_millis(200))
        .done()
}

fn hello_service(req: Request, mut e: Encoder<MockData>)
    -> FutureResult<EncoderDone<MockData>, Error>
{
    let _ = req;
    e.status(Status::Ok).unwrap();
    e.add_length(5).unwrap();
    e.add_header("Content-Type", "text/plain").unwrap();
    if e.done_headers().unwrap() {
        e.write_body(b"world");
    }
    ok(e.done())
}

fn echo_service(req: Request, mut e: Encoder<MockData>)
    -> FutureResult<EncoderDone<MockData>, Error>
{
    let body = req.body().to_vec();
    e.status(Status::Ok).unwrap();
    e.add_length(body.len() as u64).unwrap();
    if e.done_headers().unwrap() {
        let mut off = 0;
        while off < body.len() {
            let n = e.write_body(&body[off..]);
            assert!(n > 0, "mock transport never blocks");
            off += n;
        }
    }
    ok(e.done())
}

// Runs a connection over mock data until it closes (by keep-alive
// timeout at the latest) and returns everything the server wrote
fn run_conn<F>(input: &[u8], cfg: &Arc<Config>, buffers: &BufferConfig,
    service: fn(Request, Encoder<MockData>)
        -> FutureResult<EncoderDone<MockData>, Error>,
    check: F)
    -> String
    where F: FnOnce(Result<(), Error>)
{
    let mut lp = Core::new().unwrap();
    let handle = lp.handle();
    let pool = Pool::new(buffers, 2);
    let mock = MockData::new();
    mock.add_input(input);
    let proto = Proto::new(mock.clone(), addr(), &pool, cfg,
        BufferedDispatcher::new(addr(), &handle, move || service),
        &handle);
    check(lp.run(proto));
    String::from_utf8_lossy(&mock.output(..)).to_string()
}

#[test]
fn basic_get() {
    let output = run_conn(
        b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n",
        &test_config(), &BufferConfig::new(), hello_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{}", output);
    assert!(output.contains("Content-Length: 5\r\n"));
    assert!(output.contains("Content-Type: text/plain\r\n"));
    assert!(output.contains("Connection: keep-alive\r\n"));
    assert!(output.contains("Date: "));
    assert!(output.contains("Server: tk-fbm/"));
    assert!(output.ends_with("\r\n\r\nworld"), "{}", output);
}

#[test]
fn header_too_large_is_431() {
    let mut buffers = BufferConfig::new();
    // both views alias one segment, so both sizes must shrink
    buffers.request_header_size(256).response_header_size(256);
    let mut input = b"GET / HTTP/1.1\r\nHost: x\r\nX-Filler: ".to_vec();
    // one byte more than the header segment can hold
    while input.len() <= 256 {
        input.push(b'a');
    }
    let output = run_conn(&input, &test_config(), &buffers,
        hello_service,
        |r| match r {
            Err(Error::HeaderTooLarge) => {}
            other => panic!("expected HeaderTooLarge, got {:?}", other),
        });
    assert!(output.starts_with(
        "HTTP/1.1 431 Request Header Fields Too Large\r\n"), "{}", output);
    assert!(output.contains("Connection: close\r\n"));
}

#[test]
fn header_exactly_filling_the_buffer_succeeds() {
    let mut buffers = BufferConfig::new();
    buffers.request_header_size(256).response_header_size(256);
    let mut input = b"GET /hello HTTP/1.1\r\nHost: x\r\nX-Pad: ".to_vec();
    while input.len() < 252 {
        input.push(b'a');
    }
    input.extend(b"\r\n\r\n");
    assert_eq!(input.len(), 256);
    let output = run_conn(&input, &test_config(), &buffers,
        hello_service, |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.starts_with("HTTP/1.1 200 OK\r\n"), "{}", output);
}

#[test]
fn request_line_too_long_is_414() {
    let mut buffers = BufferConfig::new();
    buffers.request_header_size(256).response_header_size(256);
    let mut input = b"GET /".to_vec();
    while input.len() < 300 {
        input.push(b'x');
    }
    let output = run_conn(&input, &test_config(), &buffers,
        hello_service,
        |r| match r {
            Err(Error::RequestTargetTooLong) => {}
            other => panic!("expected RequestTargetTooLong, got {:?}",
                other),
        });
    assert!(output.starts_with("HTTP/1.1 414 Request-URI Too Long\r\n"),
        "{}", output);
}

#[test]
fn keep_alive_request_cap() {
    let cfg = Config::new()
        .keep_alive_timeout(Duration::from_millis(50))
        .max_request_turns(3)
        .done();
    let one = &b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n"[..];
    let mut input = Vec::new();
    for _ in 0..3 {
        input.extend(one);
    }
    let output = run_conn(&input, &cfg, &BufferConfig::new(),
        hello_service, |r| assert!(r.is_ok(), "{:?}", r));
    let responses = output.matches("HTTP/1.1 200 OK\r\n").count();
    assert_eq!(responses, 3, "{}", output);
    assert_eq!(output.matches("Connection: keep-alive\r\n").count(), 2);
    assert_eq!(output.matches("Connection: close\r\n").count(), 1);
    // the close is on the last response
    let last = output.rfind("HTTP/1.1 200 OK").unwrap();
    assert!(output[last..].contains("Connection: close\r\n"));
}

#[test]
fn fixed_length_body_echo() {
    let output = run_conn(
        b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\n\
          hello world",
        &test_config(), &BufferConfig::new(), echo_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.contains("Content-Length: 11\r\n"));
    assert!(output.ends_with("\r\n\r\nhello world"), "{}", output);
}

#[test]
fn chunked_body_with_trailers() {
    let output = run_conn(
        b"POST /echo HTTP/1.1\r\nHost: x\r\n\
          Transfer-Encoding: chunked\r\n\r\n\
          6\r\nhello \r\n5\r\nworld\r\n0\r\nx-check: yes\r\n\r\n",
        &test_config(), &BufferConfig::new(), echo_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.contains("Content-Length: 11\r\n"), "{}", output);
    assert!(output.ends_with("\r\n\r\nhello world"), "{}", output);
}

#[test]
fn zero_length_terminal_chunk_completes() {
    let output = run_conn(
        b"POST /echo HTTP/1.1\r\nHost: x\r\n\
          Transfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        &test_config(), &BufferConfig::new(), echo_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.contains("Content-Length: 0\r\n"), "{}", output);
}

#[test]
fn http_10_closes_by_default() {
    let output = run_conn(
        b"GET /hello HTTP/1.0\r\n\r\n",
        &test_config(), &BufferConfig::new(), hello_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.starts_with("HTTP/1.0 200 OK\r\n"), "{}", output);
    assert!(output.contains("Connection: close\r\n"));
}

#[test]
fn unknown_method_is_501() {
    let output = run_conn(
        b"BREW /pot HTTP/1.1\r\nHost: x\r\n\r\n",
        &test_config(), &BufferConfig::new(), hello_service,
        |r| match r {
            Err(Error::UnknownMethod) => {}
            other => panic!("expected UnknownMethod, got {:?}", other),
        });
    assert!(output.starts_with("HTTP/1.1 501 Not Implemented\r\n"),
        "{}", output);
}

#[test]
fn form_decoding() {
    fn form_service(req: Request, mut e: Encoder<MockData>)
        -> FutureResult<EncoderDone<MockData>, Error>
    {
        let form = req.form().expect("urlencoded body");
        let greeting = format!("hello, {}", form.get("name").unwrap());
        e.status(Status::Ok).unwrap();
        e.add_length(greeting.len() as u64).unwrap();
        if e.done_headers().unwrap() {
            e.write_body(greeting.as_bytes());
        }
        ok(e.done())
    }
    let output = run_conn(
        b"POST /greet HTTP/1.1\r\nHost: x\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          Content-Length: 21\r\n\r\n\
          name=world&lang=en%21",
        &test_config(), &BufferConfig::new(), form_service,
        |r| assert!(r.is_ok(), "{:?}", r));
    assert!(output.ends_with("hello, world"), "{}", output);
}
