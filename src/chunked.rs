use httparse::{InvalidChunkSize, parse_chunk_size};

/// Decoder state for chunked transfer encoding
///
/// Unlike a buffer-consuming parser this one steps over caller-provided
/// input windows, so the payload can land in whatever segment the
/// connection designates (form data, discard scratch) without copying
/// through an intermediate buffer.
#[derive(Debug, Clone)]
pub struct State {
    phase: Phase,
    // payload bytes left in the current chunk
    pending: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Size,
    Data,
    DataEnd,
    Trailers,
    Done,
}

/// One step of chunked decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Input is incomplete, read more bytes
    NeedMore,
    /// `consumed` bytes of framing (size line, chunk terminator)
    Framing { consumed: usize },
    /// The first `len` bytes of input are payload (`consumed == len`)
    Payload { consumed: usize, len: usize },
    /// A trailer line (including its CRLF); the caller accumulates these
    /// next to the request headers and parses them at the end
    Trailer { consumed: usize },
    /// The blank line ending the message; includes its CRLF
    Done { consumed: usize },
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

impl State {
    pub fn new() -> State {
        State {
            phase: Phase::Size,
            pending: 0,
        }
    }

    /// Decode as much as possible from the start of `input`
    ///
    /// The caller removes `consumed` bytes from its window and acts on
    /// the step before calling again.
    pub fn step(&mut self, input: &[u8]) -> Result<Step, InvalidChunkSize> {
        use self::Phase::*;
        use self::Step::*;
        match self.phase {
            Size => {
                use httparse::Status::*;
                match parse_chunk_size(input)? {
                    Complete((bytes, 0)) => {
                        self.phase = Trailers;
                        Ok(Framing { consumed: bytes })
                    }
                    Complete((bytes, chunk_size)) => {
                        self.pending = chunk_size;
                        self.phase = Data;
                        Ok(Framing { consumed: bytes })
                    }
                    Partial => Ok(NeedMore),
                }
            }
            Data => {
                if input.len() == 0 {
                    return Ok(NeedMore);
                }
                let len = if (input.len() as u64) < self.pending {
                    input.len()
                } else {
                    self.pending as usize
                };
                self.pending -= len as u64;
                if self.pending == 0 {
                    self.phase = DataEnd;
                }
                Ok(Payload { consumed: len, len: len })
            }
            DataEnd => {
                if input.len() < 2 {
                    return Ok(NeedMore);
                }
                if &input[..2] != b"\r\n" {
                    return Err(InvalidChunkSize);
                }
                self.phase = Size;
                Ok(Framing { consumed: 2 })
            }
            Trailers => {
                match find_crlf(input) {
                    Some(0) => {
                        self.phase = Done;
                        Ok(Step::Done { consumed: 2 })
                    }
                    Some(pos) => Ok(Trailer { consumed: pos + 2 }),
                    None => Ok(NeedMore),
                }
            }
            Done => Ok(Step::Done { consumed: 0 }),
        }
    }

    /// True once the terminating blank line has been seen
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }
}

#[cfg(test)]
mod test {
    use super::{State, Step};

    fn decode(state: &mut State, mut input: &[u8])
        -> (Vec<u8>, Vec<u8>, bool)
    {
        let mut payload = Vec::new();
        let mut trailers = Vec::new();
        loop {
            match state.step(input).unwrap() {
                Step::NeedMore => return (payload, trailers, false),
                Step::Framing { consumed } => {
                    input = &input[consumed..];
                }
                Step::Payload { consumed, len } => {
                    payload.extend(&input[..len]);
                    input = &input[consumed..];
                }
                Step::Trailer { consumed } => {
                    trailers.extend(&input[..consumed]);
                    input = &input[consumed..];
                }
                Step::Done { consumed } => {
                    trailers.extend(&input[..consumed]);
                    return (payload, trailers, true);
                }
            }
        }
    }

    #[test]
    fn empty_terminal_chunk() {
        let mut state = State::new();
        let (payload, trailers, done) = decode(&mut state, b"0\r\n\r\n");
        assert_eq!(payload, b"");
        assert_eq!(trailers, b"\r\n");
        assert!(done);
        assert!(state.is_done());
    }

    #[test]
    fn two_chunks() {
        let mut state = State::new();
        let (payload, _, done) = decode(&mut state,
            b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        assert_eq!(payload, b"hello world");
        assert!(done);
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let mut state = State::new();
        let (payload, _, done) = decode(&mut state,
            b"5;name=value\r\nhello\r\n0\r\n\r\n");
        assert_eq!(payload, b"hello");
        assert!(done);
    }

    #[test]
    fn trailers_are_reported() {
        let mut state = State::new();
        let (payload, trailers, done) = decode(&mut state,
            b"3\r\nabc\r\n0\r\nx-checksum: 900150983\r\n\r\n");
        assert_eq!(payload, b"abc");
        assert_eq!(trailers, &b"x-checksum: 900150983\r\n\r\n"[..]);
        assert!(done);
    }

    #[test]
    fn incremental_feeding() {
        let full = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        // whatever the split point, nothing is lost
        for cut in 1..full.len() {
            let mut state = State::new();
            let mut payload: Vec<u8> = Vec::new();
            let mut window: Vec<u8> = Vec::new();
            let mut done = false;
            for piece in &[&full[..cut], &full[cut..]] {
                window.extend_from_slice(piece);
                loop {
                    let (consumed, stop) = match state.step(&window)
                        .unwrap()
                    {
                        Step::NeedMore => (0, true),
                        Step::Framing { consumed } => (consumed, false),
                        Step::Payload { consumed, len } => {
                            payload.extend(&window[..len]);
                            (consumed, false)
                        }
                        Step::Trailer { consumed } => (consumed, false),
                        Step::Done { consumed } => {
                            done = true;
                            (consumed, true)
                        }
                    };
                    window.drain(..consumed);
                    if stop {
                        break;
                    }
                }
                if done {
                    break;
                }
            }
            assert!(done, "cut={}", cut);
            assert_eq!(payload, b"hello world", "cut={}", cut);
        }
    }

    #[test]
    fn bad_chunk_terminator() {
        let mut state = State::new();
        let mut input: &[u8] = b"3\r\nabcXX0\r\n\r\n";
        loop {
            match state.step(input) {
                Ok(Step::Framing { consumed }) |
                Ok(Step::Payload { consumed, .. }) => {
                    input = &input[consumed..];
                }
                Ok(_) => panic!("must fail on XX"),
                Err(_) => break,
            }
        }
    }
}
