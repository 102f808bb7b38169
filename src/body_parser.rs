use httparse::InvalidChunkSize;

use chunked;

/// Progress of reading a single request body
#[derive(Debug, Clone)]
pub enum BodyProgress {
    /// Fixed-length body, bytes left to read
    Fixed(u64),
    /// Chunked body with its decoder state
    Chunked(chunked::State),
}

/// One step of body decoding, unified over both modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStep {
    NeedMore,
    /// The first `len` bytes of input are payload
    Payload { consumed: usize, len: usize },
    /// Framing bytes only (chunk sizes and separators)
    Framing { consumed: usize },
    /// A trailer line to stash next to the request headers
    Trailer { consumed: usize },
    /// End of body; `consumed` covers the terminating bytes if any
    Done { consumed: usize },
}

impl BodyProgress {
    /// Process the start of `input`, advancing the body state
    pub fn step(&mut self, input: &[u8])
        -> Result<BodyStep, InvalidChunkSize>
    {
        use self::BodyProgress::*;
        use self::BodyStep::*;
        match *self {
            Fixed(0) => Ok(Done { consumed: 0 }),
            Fixed(ref mut left) => {
                if input.len() == 0 {
                    return Ok(NeedMore);
                }
                let len = if (input.len() as u64) < *left {
                    input.len()
                } else {
                    *left as usize
                };
                *left -= len as u64;
                Ok(Payload { consumed: len, len: len })
            }
            Chunked(ref mut state) => {
                match state.step(input)? {
                    chunked::Step::NeedMore => Ok(NeedMore),
                    chunked::Step::Framing { consumed }
                    => Ok(Framing { consumed: consumed }),
                    chunked::Step::Payload { consumed, len }
                    => Ok(Payload { consumed: consumed, len: len }),
                    chunked::Step::Trailer { consumed }
                    => Ok(Trailer { consumed: consumed }),
                    chunked::Step::Done { consumed }
                    => Ok(Done { consumed: consumed }),
                }
            }
        }
    }

    /// True when the body is fully read
    pub fn is_done(&self) -> bool {
        match *self {
            BodyProgress::Fixed(left) => left == 0,
            BodyProgress::Chunked(ref state) => state.is_done(),
        }
    }
}

#[cfg(test)]
mod test {
    use chunked;
    use super::{BodyProgress, BodyStep};

    #[test]
    fn fixed_yields_exactly_n_bytes() {
        let mut body = BodyProgress::Fixed(5);
        assert_eq!(body.step(b"hello world").unwrap(),
                   BodyStep::Payload { consumed: 5, len: 5 });
        assert!(body.is_done());
        assert_eq!(body.step(b" world").unwrap(),
                   BodyStep::Done { consumed: 0 });
    }

    #[test]
    fn fixed_across_reads() {
        let mut body = BodyProgress::Fixed(5);
        assert_eq!(body.step(b"he").unwrap(),
                   BodyStep::Payload { consumed: 2, len: 2 });
        assert_eq!(body.step(b"").unwrap(), BodyStep::NeedMore);
        assert_eq!(body.step(b"llo").unwrap(),
                   BodyStep::Payload { consumed: 3, len: 3 });
        assert!(body.is_done());
    }

    #[test]
    fn empty_body_is_done_immediately() {
        let mut body = BodyProgress::Fixed(0);
        assert_eq!(body.step(b"").unwrap(), BodyStep::Done { consumed: 0 });
        assert!(body.is_done());
    }

    #[test]
    fn chunked_delegates() {
        let mut body = BodyProgress::Chunked(chunked::State::new());
        assert_eq!(body.step(b"3\r\n").unwrap(),
                   BodyStep::Framing { consumed: 3 });
        assert_eq!(body.step(b"abc").unwrap(),
                   BodyStep::Payload { consumed: 3, len: 3 });
        assert_eq!(body.step(b"\r\n").unwrap(),
                   BodyStep::Framing { consumed: 2 });
        assert_eq!(body.step(b"0\r\n").unwrap(),
                   BodyStep::Framing { consumed: 3 });
        assert_eq!(body.step(b"\r\n").unwrap(),
                   BodyStep::Done { consumed: 2 });
        assert!(body.is_done());
    }
}
