//! A messaging echo server: HTTP on the outside, FBM over the
//! websocket upgrade path.
extern crate futures;
extern crate tokio_core;
extern crate tk_fbm;
extern crate env_logger;

use std::env;
use std::io::Read;

use futures::future::{ok, FutureResult};
use futures::{Future, Stream};
use tokio_core::net::{TcpListener, TcpStream};
use tokio_core::reactor::{Core, Handle};

use tk_fbm::buffer::{BufferConfig, Pool};
use tk_fbm::fbm::{self, Message, MessageBody, Session};
use tk_fbm::server::buffered::{BufferedDispatcher, Request};
use tk_fbm::server::{Config, Encoder, EncoderDone, Error, Proto};
use tk_fbm::Status;

struct Echo;

impl fbm::Handler for Echo {
    type Future = FutureResult<Message, fbm::Error>;
    fn message(&mut self, request: &Message, mut body: MessageBody)
        -> Self::Future
    {
        println!("message {} ({} body bytes)",
            request.id(), body.remaining());
        let mut data = Vec::new();
        body.read_to_end(&mut data).expect("buffered body");
        let mut reply = Message::new(0);
        reply.set_status(200);
        if let Some(ctype) = body.content_type() {
            reply.set_content_type(ctype.to_string());
        }
        reply.set_body(data);
        ok(reply)
    }
}

fn http(req: Request, mut e: Encoder<TcpStream>)
    -> FutureResult<EncoderDone<TcpStream>, Error>
{
    if let Some(ws) = req.websocket_handshake() {
        e.status(Status::SwitchingProtocol).unwrap();
        e.add_header("Connection", "upgrade").unwrap();
        e.add_header("Upgrade", "websocket").unwrap();
        e.format_header("Sec-WebSocket-Accept", &ws.accept).unwrap();
        e.done_headers().unwrap();
        ok(e.done())
    } else {
        const PAGE: &'static str =
            "connect a fixed-buffer messaging client here\n";
        e.status(Status::Ok).unwrap();
        e.add_length(PAGE.len() as u64).unwrap();
        e.add_header("Content-Type", "text/plain").unwrap();
        if e.done_headers().unwrap() {
            e.write_body(PAGE.as_bytes());
        }
        ok(e.done())
    }
}

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();
    let handle: Handle = lp.handle();

    let addr = "0.0.0.0:8080".parse().unwrap();
    let listener = TcpListener::bind(&addr, &handle).unwrap();
    let cfg = Config::new().done();
    let fbm_cfg = fbm::Config::new().done();
    let pool = Pool::new(&BufferConfig::new(), 1000);
    let h1 = handle.clone();

    let done = listener.incoming()
        .map_err(|e| { println!("Accept error: {}", e); })
        .map(move |(socket, addr)| {
            let h2 = h1.clone();
            let fbm_cfg = fbm_cfg.clone();
            Proto::new(socket, addr, &pool, &cfg,
                BufferedDispatcher::new_with_websockets(addr, &h1,
                    || http,
                    move || {
                        let fbm_cfg = fbm_cfg.clone();
                        let h2 = h2.clone();
                        move |out, inp| {
                            Session::new(out, inp, Echo, &fbm_cfg, &h2)
                                .map_err(|e| println!("session: {}", e))
                        }
                    }),
                &h1)
            .map_err(|_| ())
        })
        .buffer_unordered(1000)
          .for_each(|()| Ok(()));

    lp.run(done).unwrap();
}
