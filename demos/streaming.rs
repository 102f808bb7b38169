//! Streams a large chunked response; with `Accept-Encoding: br` the
//! body is compressed on the fly.
extern crate futures;
extern crate tokio_core;
extern crate tk_fbm;
extern crate env_logger;

use std::env;

use futures::{Async, Future, Poll, Stream};
use tokio_core::net::TcpListener;
use tokio_core::reactor::Core;
use tokio_core::net::TcpStream;

use tk_fbm::buffer::{BufferConfig, Pool};
use tk_fbm::server::buffered::{BufferedDispatcher, Request};
use tk_fbm::server::{Config, Encoder, EncoderDone, Error, Proto};
use tk_fbm::server::WaitFlush;
use tk_fbm::Status;

const TOTAL: usize = 64 << 20;
const PATTERN: &'static [u8] = b"all work and no play \
    makes jack a dull boy\n";

struct Waterfall {
    enc: Option<Encoder<TcpStream>>,
    wait: Option<WaitFlush<TcpStream>>,
    written: usize,
}

impl Future for Waterfall {
    type Item = EncoderDone<TcpStream>;
    type Error = Error;
    fn poll(&mut self) -> Poll<EncoderDone<TcpStream>, Error> {
        'outer: loop {
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
            while self.written < TOTAL {
                let piece = &PATTERN[self.written % PATTERN.len()..];
                let n = enc.write_body(piece);
                self.written += n;
                if n == 0 {
                    self.wait = Some(enc.wait_flush(4096));
                    continue 'outer;
                }
            }
            return Ok(Async::Ready(enc.done()));
        }
    }
}

fn service(req: Request, mut e: Encoder<TcpStream>) -> Waterfall {
    println!("{:?} {} (compression: {:?})",
        req.method(), req.path(), e.compression());
    e.status(Status::Ok).unwrap();
    e.add_chunked().unwrap();
    e.add_header("Content-Type", "text/plain").unwrap();
    e.done_headers().unwrap();
    Waterfall {
        enc: Some(e),
        wait: None,
        written: 0,
    }
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();
    let handle = lp.handle();

    let addr = "0.0.0.0:8080".parse().unwrap();
    let listener = TcpListener::bind(&addr, &handle).unwrap();
    let cfg = Config::new().done();
    let pool = Pool::new(&BufferConfig::new(), 1000);
    let h1 = handle.clone();

    let done = listener.incoming()
        .map_err(|e| { println!("Accept error: {}", e); })
        .map(move |(socket, addr)| {
            Proto::new(socket, addr, &pool, &cfg,
                BufferedDispatcher::new(addr, &h1, || service),
                &h1)
            .map_err(|_| ())
        })
        .buffer_unordered(1000)
          .for_each(|()| Ok(()));

    lp.run(done).unwrap();
}
