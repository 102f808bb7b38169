extern crate futures;
extern crate tokio_core;
extern crate tk_fbm;
extern crate env_logger;

use std::env;

use futures::future::{ok, FutureResult};
use futures::{Future, Stream};
use tokio_core::net::TcpListener;
use tokio_core::reactor::Core;

use tk_fbm::buffer::{BufferConfig, Pool};
use tk_fbm::server::buffered::{BufferedDispatcher, Request};
use tk_fbm::server::{Config, Encoder, EncoderDone, Error, Proto};
use tk_fbm::Status;

const BODY: &'static str = "Hello World!";

fn service<S>(_req: Request, mut e: Encoder<S>)
    -> FutureResult<EncoderDone<S>, Error>
{
    e.status(Status::Ok).unwrap();
    e.add_length(BODY.as_bytes().len() as u64).unwrap();
    e.add_header("Content-Type", "text/plain").unwrap();
    if e.done_headers().unwrap() {
        e.write_body(BODY.as_bytes());
    }
    ok(e.done())
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
    let pool = Pool::new(&BufferConfig::new(), 10000);
    let h1 = handle.clone();

    let done = listener.incoming()
        .map_err(|e| { println!("Accept error: {}", e); })
        .map(move |(socket, addr)| {
            Proto::new(socket, addr, &pool, &cfg,
                BufferedDispatcher::new(addr, &h1, || service),
                &h1)
            .map_err(|_| ())
        })
        .buffer_unordered(200000)
          .for_each(|()| Ok(()));

    lp.run(done).unwrap();
}
