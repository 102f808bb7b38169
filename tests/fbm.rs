extern crate futures;
extern crate netbuf;
extern crate tk_bufstream;
extern crate tokio_core;
extern crate tk_fbm;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{err, join_all, ok, FutureResult};
use futures::Future;
use netbuf::Buf;
use tk_bufstream::{IoBuf, MockData};
use tokio_core::reactor::{Core, Timeout};

use tk_fbm::fbm::{commands, Config, Connection, Encoding, Error};
use tk_fbm::fbm::{Handler, Message, MessageBody, Session};
use tk_fbm::websocket::{ClientCodec, ServerCodec};

/// The known-good request bytes for message id 2
const KNOWN_FRAME: &'static [u8] = &[
    0x01, 0x00, 0x00, 0x00, 0x02, 0xFF, 0xF1,
    0xA1, 0x68, 0x65, 0x6C, 0x6C, 0x6F, 0xFF, 0xF1,
    0xA1, 0x77, 0x6F, 0x72, 0x6C, 0x64, 0xFF, 0xF1,
    0x03, 0x61, 0x70, 0x70, 0x6C, 0x69, 0x63, 0x61, 0x74, 0x69,
    0x6F, 0x6E, 0x2F, 0x6F, 0x63, 0x74, 0x65, 0x74, 0x2D, 0x73,
    0x74, 0x72, 0x65, 0x61, 0x6D, 0xFF, 0xF1,
    0xFF, 0xF1,
    0x01, 0x02, 0x03, 0x04,
];

fn small_config(inflight: usize) -> Arc<Config> {
    Config::new()
        .max_inflight(inflight)
        .ping_interval(Duration::from_secs(600))
        .inactivity_timeout(Duration::from_millis(200))
        .done()
}

// A binary server->client frame (unmasked)
fn server_frame(message: &Message) -> Vec<u8> {
    let mut payload = Buf::new();
    message.serialize(Encoding::Utf8, &mut payload);
    assert!(payload.len() < 126);
    let mut frame = vec![0x82, payload.len() as u8];
    frame.extend(&payload[..]);
    frame
}

// A binary client->server frame, "masked" with a zero key
fn masked_frame(message: &Message) -> Vec<u8> {
    let mut payload = Buf::new();
    message.serialize(Encoding::Utf8, &mut payload);
    assert!(payload.len() < 126);
    let mut frame = vec![0x82, 0x80 | payload.len() as u8, 0, 0, 0, 0];
    frame.extend(&payload[..]);
    frame
}

// Unmask the first client frame in `data`, returning the payload and
// the total frame length
fn unmask_frame(data: &[u8]) -> (Vec<u8>, usize) {
    assert_eq!(data[0], 0x82, "binary final frame");
    assert!(data[1] & 0x80 != 0, "client frames are masked");
    let len = (data[1] & 0x7F) as usize;
    assert!(len < 126, "tests use small frames");
    let mask = &data[2..6];
    let payload = data[6..6 + len].iter().enumerate()
        .map(|(idx, &byte)| byte ^ mask[idx % 4])
        .collect();
    (payload, 6 + len)
}

fn new_session(cfg: &Arc<Config>)
    -> (Core, MockData, tk_fbm::fbm::Client,
        Connection<MockData>)
{
    let lp = Core::new().unwrap();
    let handle = lp.handle();
    let mock = MockData::new();
    let (wr, rd) = IoBuf::new(mock.clone()).split();
    let (client, conn) = Connection::new(
        wr.framed(ClientCodec), rd.framed(ClientCodec), cfg, &handle);
    (lp, mock, client, conn)
}

#[test]
fn known_frame_hits_the_wire() {
    // a pool of two hands out id 2 first
    let cfg = small_config(2);
    let (mut lp, mock, client, conn) = new_session(&cfg);
    let handle = lp.handle();
    handle.spawn(conn.map_err(|_| ()));

    let mut msg = Message::new(0);
    msg.add_generic("hello")
        .add_generic("world")
        .set_content_type("application/octet-stream")
        .set_body(vec![1, 2, 3, 4]);
    let response = client.request(msg, Some(Duration::from_millis(50)));
    // no response is coming, the send itself is what we check
    match lp.run(response) {
        Err(Error::Timeout) => {}
        other => panic!("expected the timeout, got {:?}", other),
    }
    let output = mock.output(..);
    let (payload, _) = unmask_frame(&output);
    assert_eq!(payload, KNOWN_FRAME);
}

#[test]
fn responses_correlate_out_of_order() {
    // ids are handed out in order 3, 2, 1
    let cfg = small_config(3);
    let (mut lp, mock, client, conn) = new_session(&cfg);
    let handle = lp.handle();

    let mut req = Message::new(0);
    req.add_generic("first");
    let f_a = client.request(req, None);        // id 3
    let mut req = Message::new(0);
    req.add_generic("second");
    let f_b = client.request(req, None);        // id 2
    let mut req = Message::new(0);
    req.add_generic("third");
    let f_c = client.request(req, None);        // id 1

    // responses arrive in a completely different order
    for &(id, tag) in &[(1u32, "for-third"), (3, "for-first"),
                        (2, "for-second")]
    {
        let mut reply = Message::new(id);
        reply.set_status(200).set_body(tag.as_bytes().to_vec());
        mock.add_input(server_frame(&reply));
    }
    handle.spawn(conn.map_err(|_| ()));

    let all = lp.run(join_all(vec![f_a, f_b, f_c])).unwrap();
    assert_eq!(all[0].body(), b"for-first");
    assert_eq!(all[1].body(), b"for-second");
    assert_eq!(all[2].body(), b"for-third");
    assert_eq!(all[0].status(), Some(200));
    assert_eq!(client.stray_responses(), 0);
}

#[test]
fn in_flight_limit_is_enforced() {
    let cfg = small_config(1);
    let (mut lp, _mock, client, conn) = new_session(&cfg);
    let handle = lp.handle();
    handle.spawn(conn.map_err(|_| ()));

    let _pending = client.request(Message::new(0), None);
    assert_eq!(client.available_slots(), 0);
    match lp.run(client.request(Message::new(0), None)) {
        Err(Error::InFlightLimit) => {}
        other => panic!("expected InFlightLimit, got {:?}", other),
    }
}

#[test]
fn cancellation_recycles_and_strays_are_counted() {
    let cfg = small_config(2);
    let (mut lp, mock, client, conn) = new_session(&cfg);
    let handle = lp.handle();

    let pending = client.request(Message::new(0), None);  // id 2
    assert_eq!(client.available_slots(), 1);
    drop(pending);
    assert_eq!(client.available_slots(), 2);

    // a response nobody asked for (id 1 was never rented)
    let mut reply = Message::new(1);
    reply.set_status(200);
    mock.add_input(server_frame(&reply));
    handle.spawn(conn.map_err(|_| ()));

    // let the connection chew through the input
    let wait = Timeout::new(Duration::from_millis(50), &lp.handle())
        .unwrap();
    lp.run(wait).unwrap();
    assert_eq!(client.stray_responses(), 1);
}

#[test]
fn request_timeout_recycles_the_record() {
    let cfg = small_config(2);
    let (mut lp, _mock, client, conn) = new_session(&cfg);
    let handle = lp.handle();
    handle.spawn(conn.map_err(|_| ()));

    let response = client.request(Message::new(0),
        Some(Duration::from_millis(30)));
    match lp.run(response) {
        Err(Error::Timeout) => {}
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert_eq!(client.available_slots(), 2);
}

struct EchoHandler;

impl Handler for EchoHandler {
    type Future = FutureResult<Message, Error>;
    fn message(&mut self, request: &Message, mut body: MessageBody)
        -> Self::Future
    {
        if request.header(commands::HEADER) == Some("boom") {
            return err(Error::Closed);
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data).unwrap();
        let mut reply = Message::new(0);
        reply.set_status(200);
        if let Some(ctype) = body.content_type() {
            reply.set_content_type(ctype.to_string());
        }
        reply.set_body(data);
        ok(reply)
    }
}

#[test]
fn server_session_replies_with_request_ids() {
    let mut lp = Core::new().unwrap();
    let handle = lp.handle();
    let cfg = small_config(4);
    let mock = MockData::new();

    for &(id, body) in &[(7u32, &b"seven"[..]), (8, b"eight"),
                         (9, b"nine")]
    {
        let mut msg = Message::new(id);
        msg.set_content_type("application/octet-stream");
        msg.set_body(body.to_vec());
        mock.add_input(masked_frame(&msg));
    }
    let (wr, rd) = IoBuf::new(mock.clone()).split();
    let session = Session::new(wr.framed(ServerCodec),
        rd.framed(ServerCodec), EchoHandler, &cfg, &handle);
    // the session ends via inactivity timeout or peer EOF
    let _ = lp.run(session);

    let output = mock.output(..);
    let mut pos = 0;
    let mut replies = Vec::new();
    while pos < output.len() {
        assert_eq!(output[pos], 0x82);
        let len = (output[pos + 1] & 0x7F) as usize;
        assert!(output[pos + 1] & 0x80 == 0, "server frames unmasked");
        replies.push(Message::parse(
            &output[pos + 2..pos + 2 + len], Encoding::Utf8).unwrap());
        pos += 2 + len;
    }
    assert_eq!(replies.len(), 3);
    let mut ids: Vec<u32> = replies.iter().map(|r| r.id()).collect();
    ids.sort();
    assert_eq!(ids, vec![7, 8, 9]);
    for reply in &replies {
        assert_eq!(reply.status(), Some(200));
        let expected: &[u8] = match reply.id() {
            7 => b"seven",
            8 => b"eight",
            _ => b"nine",
        };
        assert_eq!(reply.body(), expected);
    }
}

#[test]
fn handler_errors_become_status_replies() {
    let mut lp = Core::new().unwrap();
    let handle = lp.handle();
    let cfg = Config::new()
        .max_inflight(2)
        .error_status(599)
        .ping_interval(Duration::from_secs(600))
        .inactivity_timeout(Duration::from_millis(100))
        .done();
    let mock = MockData::new();
    let mut msg = Message::new(4);
    msg.add_generic("boom");
    mock.add_input(masked_frame(&msg));
    let (wr, rd) = IoBuf::new(mock.clone()).split();
    let session = Session::new(wr.framed(ServerCodec),
        rd.framed(ServerCodec), EchoHandler, &cfg, &handle);
    let _ = lp.run(session);

    let output = mock.output(..);
    let len = (output[1] & 0x7F) as usize;
    let reply = Message::parse(&output[2..2 + len], Encoding::Utf8)
        .unwrap();
    assert_eq!(reply.id(), 4);
    assert_eq!(reply.status(), Some(599));
}
