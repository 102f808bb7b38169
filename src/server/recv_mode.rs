/// This type is returned from `Codec::recv_mode`
///
/// The marker denotes whether the request body is buffered for you in
/// the form-data segment or handed over chunk by chunk as it arrives.
///
/// The `Progressive` (chunk by chunk) mode is mostly useful for proxy
/// servers or handlers that can parse data without holding everything
/// in memory. Otherwise, `Buffered` mode is the best option.
#[derive(Debug, Clone)]
pub struct RecvMode {
    pub(crate) mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Buffered(usize),
    Progressive(usize),
    Discard,
    Hijack,
}

impl RecvMode {
    /// Download the whole request body into the form-data segment
    /// before starting the response
    ///
    /// The argument is the maximum size of the body; it also must fit
    /// the form-data segment or the request is rejected with 413. The
    /// mode works equally well for fixed-length and chunked requests.
    pub fn buffered(max_body_size: usize) -> RecvMode {
        RecvMode {
            mode: Mode::Buffered(max_body_size),
        }
    }
    /// Fetch data chunk-by-chunk, through the discard scratch segment
    ///
    /// The parameter is the minimum number of bytes that may be passed
    /// to `data_received`. This is for performance tuning (i.e. fewer
    /// wake-ups of the protocol parser), it is not a buffer size; the
    /// use of `progressive(1)` is perfectly okay.
    pub fn progressive(min_chunk_size_hint: usize) -> RecvMode {
        RecvMode {
            mode: Mode::Progressive(min_chunk_size_hint),
        }
    }
    /// Read the request body and drop it
    ///
    /// The body is drained through the discard scratch segment so the
    /// connection stays usable for keep-alive; `data_received` is
    /// called exactly once with no data and `end == true`.
    pub fn discard() -> RecvMode {
        RecvMode { mode: Mode::Discard }
    }
    /// Don't read the request body and hand the raw transport over
    /// after the response head is flushed
    ///
    /// Useful for connection upgrades, including websockets and the
    /// fixed-buffer messaging sessions running over them.
    ///
    /// Note: `data_received` is never called for a hijacked connection.
    pub fn hijack() -> RecvMode {
        RecvMode { mode: Mode::Hijack }
    }
}
