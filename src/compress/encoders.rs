//! Compression backends
//!
//! All backends are adapted through the same shim: the underlying
//! streaming encoder writes into a shared spill buffer and the block
//! interface drains that buffer into the caller's output slice. This
//! keeps the block contract uniform while each codec buffers internally
//! however it likes.

use std::cell::RefCell;
use std::cmp::min;
use std::io;
use std::io::Write;
use std::rc::Rc;

use brotli;
use flate2;
use zstd;

use compress::{Block, CompressStream, Compressor, Method};


#[derive(Clone)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    fn new() -> SharedSink {
        SharedSink(Rc::new(RefCell::new(Vec::new())))
    }
    fn drain_into(&self, output: &mut [u8]) -> usize {
        let mut data = self.0.borrow_mut();
        let n = min(output.len(), data.len());
        output[..n].copy_from_slice(&data[..n]);
        data.drain(..n);
        n
    }
    fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

impl io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// The underlying write-style encoder; `end` emits the stream trailer
trait StreamEncoder: io::Write {
    fn end(self) -> io::Result<()>;
}

struct WriteStream<E: StreamEncoder> {
    writer: Option<E>,
    sink: SharedSink,
}

impl<E: StreamEncoder> WriteStream<E> {
    fn new(writer: E, sink: SharedSink) -> WriteStream<E> {
        WriteStream {
            writer: Some(writer),
            sink: sink,
        }
    }
}

impl<E: StreamEncoder> CompressStream for WriteStream<E> {
    fn compress(&mut self, input: &[u8], output: &mut [u8])
        -> io::Result<Block>
    {
        let consumed = match self.writer {
            Some(ref mut writer) if input.len() > 0 => writer.write(input)?,
            _ => 0,
        };
        let written = self.sink.drain_into(output);
        Ok(Block {
            consumed: consumed,
            written: written,
            needs_output: self.sink.len() > 0,
        })
    }
    fn finish(&mut self, output: &mut [u8]) -> io::Result<usize> {
        if let Some(writer) = self.writer.take() {
            writer.end()?;
        }
        Ok(self.sink.drain_into(output))
    }
}

impl StreamEncoder for brotli::CompressorWriter<SharedSink> {
    fn end(self) -> io::Result<()> {
        // dropping the writer flushes the final brotli metablock
        Ok(())
    }
}

impl StreamEncoder for flate2::write::GzEncoder<SharedSink> {
    fn end(self) -> io::Result<()> {
        self.finish().map(|_| ())
    }
}

impl StreamEncoder for flate2::write::DeflateEncoder<SharedSink> {
    fn end(self) -> io::Result<()> {
        self.finish().map(|_| ())
    }
}

impl StreamEncoder for zstd::stream::write::AutoFinishEncoder<'static, SharedSink> {
    fn end(self) -> io::Result<()> {
        // dropping the auto-finish wrapper writes the end frame
        Ok(())
    }
}

/// Brotli compressor factory
pub struct BrotliCompressor {
    quality: u32,
    lgwin: u32,
}

/// Gzip compressor factory
pub struct GzipCompressor {
    level: u32,
}

/// Raw deflate compressor factory
pub struct DeflateCompressor {
    level: u32,
}

/// Zstandard compressor factory
pub struct ZstdCompressor {
    level: i32,
}

impl BrotliCompressor {
    /// Create a factory with the given quality (0-11) and window bits
    pub fn new(quality: u32, lgwin: u32) -> BrotliCompressor {
        BrotliCompressor {
            quality: quality,
            lgwin: lgwin,
        }
    }
}

impl GzipCompressor {
    /// Create a factory with the given compression level (0-9)
    pub fn new(level: u32) -> GzipCompressor {
        GzipCompressor { level: level }
    }
}

impl DeflateCompressor {
    /// Create a factory with the given compression level (0-9)
    pub fn new(level: u32) -> DeflateCompressor {
        DeflateCompressor { level: level }
    }
}

impl ZstdCompressor {
    /// Create a factory with the given compression level (1-21)
    pub fn new(level: i32) -> ZstdCompressor {
        ZstdCompressor { level: level }
    }
}

impl Compressor for BrotliCompressor {
    fn methods(&self) -> &[Method] {
        &[Method::Brotli]
    }
    fn start(&self, method: Method) -> Box<CompressStream> {
        assert_eq!(method, Method::Brotli);
        let sink = SharedSink::new();
        let writer = brotli::CompressorWriter::new(
            sink.clone(), 4096, self.quality, self.lgwin);
        Box::new(WriteStream::new(writer, sink))
    }
}

impl Compressor for GzipCompressor {
    fn methods(&self) -> &[Method] {
        &[Method::Gzip]
    }
    fn start(&self, method: Method) -> Box<CompressStream> {
        assert_eq!(method, Method::Gzip);
        let sink = SharedSink::new();
        let writer = flate2::write::GzEncoder::new(
            sink.clone(), flate2::Compression::new(self.level));
        Box::new(WriteStream::new(writer, sink))
    }
}

impl Compressor for DeflateCompressor {
    fn methods(&self) -> &[Method] {
        &[Method::Deflate]
    }
    fn start(&self, method: Method) -> Box<CompressStream> {
        assert_eq!(method, Method::Deflate);
        let sink = SharedSink::new();
        let writer = flate2::write::DeflateEncoder::new(
            sink.clone(), flate2::Compression::new(self.level));
        Box::new(WriteStream::new(writer, sink))
    }
}

impl Compressor for ZstdCompressor {
    fn methods(&self) -> &[Method] {
        &[Method::Zstd]
    }
    fn start(&self, method: Method) -> Box<CompressStream> {
        assert_eq!(method, Method::Zstd);
        let sink = SharedSink::new();
        let writer = zstd::stream::write::Encoder::new(
                sink.clone(), self.level)
            .expect("can always create a zstd encoder")
            .auto_finish();
        Box::new(WriteStream::new(writer, sink))
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use brotli;
    use flate2;
    use zstd;

    use compress::{Compressor, CompressStream, Method};
    use super::{BrotliCompressor, DeflateCompressor};
    use super::{GzipCompressor, ZstdCompressor};

    // Feed the whole input through the block interface using an output
    // buffer of `bufsize` bytes, the way the response writer does.
    fn compress_all(mut stream: Box<CompressStream>, mut input: &[u8],
        bufsize: usize)
        -> Vec<u8>
    {
        let mut result = Vec::new();
        let mut output = vec![0u8; bufsize];
        while input.len() > 0 {
            let block = stream.compress(input, &mut output).unwrap();
            assert!(block.consumed <= input.len());
            assert!(block.written <= output.len());
            input = &input[block.consumed..];
            result.extend(&output[..block.written]);
        }
        loop {
            let n = stream.finish(&mut output).unwrap();
            if n == 0 {
                break;
            }
            result.extend(&output[..n]);
        }
        result
    }

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..4000 {
            data.extend(
                format!("line {} of moderately repetitive text\n", i)
                .as_bytes());
        }
        data
    }

    #[test]
    fn brotli_round_trip_any_buffer_size() {
        let input = sample();
        let factory = BrotliCompressor::new(9, 24);
        for &bufsize in &[64usize, 1500, 16384] {
            let compressed = compress_all(
                factory.start(Method::Brotli), &input, bufsize);
            assert!(compressed.len() < input.len());
            let mut decoded = Vec::new();
            brotli::Decompressor::new(&compressed[..], 4096)
                .read_to_end(&mut decoded).unwrap();
            assert_eq!(decoded, input);
        }
    }

    #[test]
    fn gzip_round_trip() {
        let input = sample();
        let factory = GzipCompressor::new(6);
        let compressed = compress_all(
            factory.start(Method::Gzip), &input, 512);
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn deflate_round_trip() {
        let input = sample();
        let factory = DeflateCompressor::new(6);
        let compressed = compress_all(
            factory.start(Method::Deflate), &input, 512);
        let mut decoded = Vec::new();
        flate2::read::DeflateDecoder::new(&compressed[..])
            .read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn zstd_round_trip() {
        let input = sample();
        let factory = ZstdCompressor::new(3);
        let compressed = compress_all(
            factory.start(Method::Zstd), &input, 512);
        let decoded = zstd::decode_all(&compressed[..]).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn output_buffer_size_does_not_change_content() {
        let input = sample();
        let factory = GzipCompressor::new(6);
        let a = compress_all(factory.start(Method::Gzip), &input, 100);
        let b = compress_all(factory.start(Method::Gzip), &input, 9000);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_still_produces_valid_stream() {
        let factory = GzipCompressor::new(6);
        let compressed = compress_all(
            factory.start(Method::Gzip), b"", 512);
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, b"");
    }
}
