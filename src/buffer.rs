//! Per-connection buffer provisioning
//!
//! Every connection owns exactly one pooled contiguous block which is
//! sliced into four segments at allocation time:
//!
//! 1. header accumulator (request and response headers, aliased)
//! 2. form-data / discard scratch
//! 3. chunk accumulator (chunked transfer framing)
//! 4. response staging
//!
//! The request-header and response-header views deliberately alias the
//! same segment: the connection state machine guarantees a request head
//! is fully consumed before a response head is started. The alias is
//! guarded by a phase tag, so misuse panics instead of corrupting data.

use std::fmt;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};

/// Segment sizes for the per-connection buffer block
///
/// The header segment is shared between request parsing and response
/// serialization, so its real size is the maximum of the two settings.
/// Likewise form-data decoding and body discarding share one scratch
/// segment. Header text is handled as UTF-8 in place, no extra
/// decoded-character region is reserved.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    request_header_size: usize,
    response_header_size: usize,
    form_size: usize,
    discard_size: usize,
    accumulator_size: usize,
    staging_size: usize,
}

/// Precomputed segment offsets inside a block
#[derive(Debug, Clone, Copy)]
struct Layout {
    header: usize,
    form: usize,
    accumulator: usize,
    staging: usize,
}

/// A thread-safe pool of connection buffer blocks
///
/// Cheap to clone (it's an `Arc` inside). The pool keeps at most
/// `max_blocks` blocks alive; `allocate` fails when they are all in use.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    layout: Layout,
    max_blocks: usize,
    // free list + number of blocks currently handed out
    state: Mutex<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    free: Vec<Box<[u8]>>,
    in_use: usize,
}

/// Error returned when the pool refuses to hand out another block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

/// Which of the two aliased header views is currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Request headers are being accumulated and parsed
    Request,
    /// Response head is being serialized
    Response,
}

/// Segment selector for raw copies inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seg {
    Header,
    Form,
    Accumulator,
    Staging,
}

/// A scoped owner of one buffer block
///
/// Dropping the block zeroes it and returns the memory to the pool, so
/// release is idempotent by construction.
#[derive(Debug)]
pub struct Block {
    mem: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
    phase: Phase,
}

impl BufferConfig {
    /// Create a config with defaults
    pub fn new() -> BufferConfig {
        BufferConfig {
            request_header_size: 16384,
            response_header_size: 16384,
            form_size: 65536,
            discard_size: 16384,
            accumulator_size: 16384,
            staging_size: 16384,
        }
    }
    /// Maximum size of a request head (request line + headers + trailers)
    pub fn request_header_size(&mut self, value: usize) -> &mut Self {
        self.request_header_size = value;
        self
    }
    /// Maximum size of a serialized response head
    pub fn response_header_size(&mut self, value: usize) -> &mut Self {
        self.response_header_size = value;
        self
    }
    /// Maximum size of a buffered (form) request body
    pub fn form_size(&mut self, value: usize) -> &mut Self {
        self.form_size = value;
        self
    }
    /// Size of the scratch used to drain unread request bodies
    pub fn discard_size(&mut self, value: usize) -> &mut Self {
        self.discard_size = value;
        self
    }
    /// Size of the chunked-framing accumulator
    pub fn accumulator_size(&mut self, value: usize) -> &mut Self {
        self.accumulator_size = value;
        self
    }
    /// Size of the response staging segment
    pub fn staging_size(&mut self, value: usize) -> &mut Self {
        self.staging_size = value;
        self
    }

    fn layout(&self) -> Layout {
        use std::cmp::max;
        Layout {
            header: max(self.request_header_size, self.response_header_size),
            form: max(self.form_size, self.discard_size),
            accumulator: self.accumulator_size,
            staging: self.staging_size,
        }
    }
}

impl Layout {
    fn total(&self) -> usize {
        self.header + self.form + self.accumulator + self.staging
    }
    fn header_range(&self) -> (usize, usize) {
        (0, self.header)
    }
    fn form_range(&self) -> (usize, usize) {
        (self.header, self.header + self.form)
    }
    fn accumulator_range(&self) -> (usize, usize) {
        let start = self.header + self.form;
        (start, start + self.accumulator)
    }
    fn staging_range(&self) -> (usize, usize) {
        let start = self.header + self.form + self.accumulator;
        (start, start + self.staging)
    }
}

impl Pool {
    /// Create a pool serving blocks of the configured layout
    pub fn new(config: &BufferConfig, max_blocks: usize) -> Pool {
        Pool {
            inner: Arc::new(PoolInner {
                layout: config.layout(),
                max_blocks: max_blocks,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    in_use: 0,
                }),
            }),
        }
    }
    /// Obtain one block, reusing a pooled allocation when available
    pub fn allocate(&self) -> Result<Block, PoolExhausted> {
        let mem = {
            let mut state = self.inner.state.lock()
                .expect("buffer pool lock");
            if state.in_use >= self.inner.max_blocks {
                return Err(PoolExhausted);
            }
            state.in_use += 1;
            state.free.pop()
        };
        let mem = mem.unwrap_or_else(|| {
            vec![0u8; self.inner.layout.total()].into_boxed_slice()
        });
        Ok(Block {
            mem: Some(mem),
            pool: self.inner.clone(),
            phase: Phase::Request,
        })
    }
    /// Number of blocks currently handed out
    pub fn blocks_in_use(&self) -> usize {
        self.inner.state.lock().expect("buffer pool lock").in_use
    }
}

impl Block {
    fn seg(&self, range: (usize, usize)) -> &[u8] {
        &self.mem.as_ref().expect("block is alive")[range.0..range.1]
    }
    fn seg_mut(&mut self, range: (usize, usize)) -> &mut [u8] {
        &mut self.mem.as_mut().expect("block is alive")[range.0..range.1]
    }

    /// The current header phase
    pub fn phase(&self) -> Phase {
        self.phase
    }
    /// Switch the aliased header segment to response serialization
    ///
    /// After this call the request-header view is dead until
    /// `start_turn()`.
    pub fn start_response(&mut self) {
        self.phase = Phase::Response;
    }
    /// Reset the block for the next request/response turn
    ///
    /// Zeroes all segments and revives the request-header view.
    pub fn start_turn(&mut self) {
        self.zero_all();
        self.phase = Phase::Request;
    }

    /// Request-header accumulator view
    ///
    /// # Panics
    ///
    /// Panics when the response head already started (the views alias).
    pub fn request_header(&self) -> &[u8] {
        assert_eq!(self.phase, Phase::Request,
            "request-header view used after response started");
        self.seg(self.pool.layout.header_range())
    }
    /// Mutable request-header accumulator view
    pub fn request_header_mut(&mut self) -> &mut [u8] {
        assert_eq!(self.phase, Phase::Request,
            "request-header view used after response started");
        let range = self.pool.layout.header_range();
        self.seg_mut(range)
    }
    /// Response-header view (aliases the request-header segment)
    pub fn response_header_mut(&mut self) -> &mut [u8] {
        assert_eq!(self.phase, Phase::Response,
            "response-header view used before response started");
        let range = self.pool.layout.header_range();
        self.seg_mut(range)
    }
    /// Read-only response-header view
    pub fn response_header(&self) -> &[u8] {
        assert_eq!(self.phase, Phase::Response,
            "response-header view used before response started");
        self.seg(self.pool.layout.header_range())
    }

    /// Form-data / discard scratch
    pub fn form(&self) -> &[u8] {
        self.seg(self.pool.layout.form_range())
    }
    /// Mutable form-data / discard scratch
    pub fn form_mut(&mut self) -> &mut [u8] {
        let range = self.pool.layout.form_range();
        self.seg_mut(range)
    }
    /// Chunk accumulator segment
    pub fn accumulator(&self) -> &[u8] {
        self.seg(self.pool.layout.accumulator_range())
    }
    /// Mutable chunk accumulator segment
    pub fn accumulator_mut(&mut self) -> &mut [u8] {
        let range = self.pool.layout.accumulator_range();
        self.seg_mut(range)
    }
    /// Response staging segment
    pub fn staging(&self) -> &[u8] {
        self.seg(self.pool.layout.staging_range())
    }
    /// Mutable response staging segment
    pub fn staging_mut(&mut self) -> &mut [u8] {
        let range = self.pool.layout.staging_range();
        self.seg_mut(range)
    }

    fn seg_range(&self, seg: Seg) -> (usize, usize) {
        match seg {
            Seg::Header => self.pool.layout.header_range(),
            Seg::Form => self.pool.layout.form_range(),
            Seg::Accumulator => self.pool.layout.accumulator_range(),
            Seg::Staging => self.pool.layout.staging_range(),
        }
    }

    /// Copy bytes from one segment into another
    ///
    /// This is a raw move inside the single underlying allocation, used
    /// e.g. to assemble staged response bytes into the chunk
    /// accumulator without a temporary.
    pub fn copy_between(&mut self, src: Seg, src_start: usize, len: usize,
        dst: Seg, dst_start: usize)
    {
        let (src_base, src_end) = self.seg_range(src);
        let (dst_base, dst_end) = self.seg_range(dst);
        assert!(src_base + src_start + len <= src_end);
        assert!(dst_base + dst_start + len <= dst_end);
        let mem = self.mem.as_mut().expect("block is alive");
        let from = src_base + src_start;
        mem.copy_within(from..from + len, dst_base + dst_start);
    }

    /// Overwrite the entire block with zeroes
    pub fn zero_all(&mut self) {
        if let Some(ref mut mem) = self.mem {
            for b in mem.iter_mut() {
                *b = 0;
            }
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.zero_all();
        if let Some(mem) = self.mem.take() {
            let mut state = self.pool.state.lock()
                .expect("buffer pool lock");
            state.in_use -= 1;
            state.free.push(mem);
        }
    }
}

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("connection buffer pool exhausted")
    }
}

impl StdError for PoolExhausted {
    fn description(&self) -> &str {
        "connection buffer pool exhausted"
    }
}

#[cfg(test)]
mod test {
    use super::{BufferConfig, Pool, PoolExhausted};

    fn small_config() -> BufferConfig {
        let mut cfg = BufferConfig::new();
        cfg.request_header_size(128)
            .response_header_size(256)
            .form_size(64)
            .discard_size(32)
            .accumulator_size(64)
            .staging_size(64);
        cfg
    }

    #[test]
    fn segments_are_disjoint_and_sized() {
        let pool = Pool::new(&small_config(), 1);
        let mut block = pool.allocate().unwrap();
        // header = max(128, 256), form = max(64, 32)
        assert_eq!(block.request_header().len(), 256);
        assert_eq!(block.form().len(), 64);
        assert_eq!(block.accumulator().len(), 64);
        assert_eq!(block.staging().len(), 64);
        block.request_header_mut()[0] = 0xAA;
        block.form_mut()[0] = 0xBB;
        block.accumulator_mut()[0] = 0xCC;
        block.staging_mut()[0] = 0xDD;
        assert_eq!(block.request_header()[0], 0xAA);
        assert_eq!(block.form()[0], 0xBB);
        assert_eq!(block.accumulator()[0], 0xCC);
        assert_eq!(block.staging()[0], 0xDD);
    }

    #[test]
    fn header_views_alias() {
        let pool = Pool::new(&small_config(), 1);
        let mut block = pool.allocate().unwrap();
        block.request_header_mut()[7] = 42;
        block.start_response();
        assert_eq!(block.response_header_mut()[7], 42);
    }

    #[test]
    #[should_panic(expected = "request-header view")]
    fn request_view_dies_at_response_start() {
        let pool = Pool::new(&small_config(), 1);
        let mut block = pool.allocate().unwrap();
        block.start_response();
        block.request_header_mut()[0] = 1;
    }

    #[test]
    fn pool_limits_and_reuses() {
        let pool = Pool::new(&small_config(), 1);
        let block = pool.allocate().unwrap();
        assert_eq!(pool.allocate().unwrap_err(), PoolExhausted);
        assert_eq!(pool.blocks_in_use(), 1);
        drop(block);
        assert_eq!(pool.blocks_in_use(), 0);
        let _again = pool.allocate().unwrap();
    }

    #[test]
    fn blocks_are_zeroed_between_turns() {
        let pool = Pool::new(&small_config(), 1);
        let mut block = pool.allocate().unwrap();
        block.form_mut()[3] = 9;
        block.start_response();
        block.start_turn();
        assert_eq!(block.form()[3], 0);
    }

    #[test]
    fn copy_between_segments() {
        use super::Seg;
        let pool = Pool::new(&small_config(), 1);
        let mut block = pool.allocate().unwrap();
        block.staging_mut()[..5].copy_from_slice(b"hello");
        block.copy_between(Seg::Staging, 0, 5, Seg::Accumulator, 3);
        assert_eq!(&block.accumulator()[3..8], b"hello");
    }

}
