use std::io;

use tk_bufstream::{Buf, Decode, Encode};

use websocket::{Error, Packet};
use websocket::zero_copy::{parse_frame, write_close, write_packet};

const MAX_PACKET_SIZE: usize = 10 << 20;

/// Frame codec for the server side of a connection
///
/// Reads masked frames, writes unmasked ones.
pub struct ServerCodec;

/// Frame codec for the client side of a connection
///
/// Reads unmasked frames, writes masked ones.
pub struct ClientCodec;

fn encode(data: Packet, buf: &mut Buf, mask: bool) {
    use websocket::Packet::*;
    match data {
        Ping(data) => write_packet(buf, 0x9, &data, mask),
        Pong(data) => write_packet(buf, 0xA, &data, mask),
        Text(data) => write_packet(buf, 0x1, data.as_bytes(), mask),
        Binary(data) => write_packet(buf, 0x2, &data, mask),
        Close(code, reason) => write_close(buf, code, &reason, mask),
    }
}

fn decode(buf: &mut Buf, masked: bool) -> Result<Option<Packet>, io::Error> {
    let parsed = parse_frame(buf, MAX_PACKET_SIZE, masked)
        .map(|opt| opt.map(|(frame, bytes)| (frame.into(), bytes)))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, Error::from(e)))?;
    if let Some((packet, bytes)) = parsed {
        buf.consume(bytes);
        Ok(Some(packet))
    } else {
        Ok(None)
    }
}

impl Encode for ServerCodec {
    type Item = Packet;
    fn encode(&mut self, data: Packet, buf: &mut Buf) {
        encode(data, buf, false)
    }
}

impl Decode for ServerCodec {
    type Item = Packet;
    fn decode(&mut self, buf: &mut Buf) -> Result<Option<Packet>, io::Error> {
        decode(buf, true)
    }
}

impl Encode for ClientCodec {
    type Item = Packet;
    fn encode(&mut self, data: Packet, buf: &mut Buf) {
        encode(data, buf, true)
    }
}

impl Decode for ClientCodec {
    type Item = Packet;
    fn decode(&mut self, buf: &mut Buf) -> Result<Option<Packet>, io::Error> {
        decode(buf, false)
    }
}
