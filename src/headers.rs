// Header values are byte sequences. We need case insensitive comparison
// and have to strip out the whitespace ourselves, so all the scanners
// below work on raw bytes.

fn token_matches(val: &[u8], first: u8, first_upper: u8, rest: &[u8])
    -> bool
{
    if val.len() < rest.len() + 1 {
        return false;
    }
    let mut iter = val.iter();
    for (idx, &ch) in iter.by_ref().enumerate() {
        match ch {
            b'\r' | b'\n' | b' ' | b'\t' => continue,
            c if c == first || c == first_upper => {
                if idx + rest.len() + 1 > val.len() {
                    return false;
                }
                break;
            }
            _ => return false,
        }
    }
    for (idx, ch) in iter.by_ref().take(rest.len()).enumerate() {
        if rest[idx] != ch.to_ascii_lowercase() {
            return false;
        }
    }
    for &ch in iter {
        if !matches!(ch, b'\r' | b'\n' | b' ' | b'\t') {
            return false;
        }
    }
    return true;
}

pub fn is_close(val: &[u8]) -> bool {
    token_matches(val, b'c', b'C', b"lose")
}

pub fn is_keep_alive(val: &[u8]) -> bool {
    token_matches(val, b'k', b'K', b"eep-alive")
}

pub fn is_chunked(val: &[u8]) -> bool {
    token_matches(val, b'c', b'C', b"hunked")
}

pub fn is_continue(val: &[u8]) -> bool {
    token_matches(val, b'1', b'1', b"00-continue")
}

pub fn is_upgrade(val: &[u8]) -> bool {
    token_matches(val, b'u', b'U', b"pgrade")
}

pub fn is_websocket(val: &[u8]) -> bool {
    token_matches(val, b'w', b'W', b"ebsocket")
}

/// Iterates over the content-coding tokens of an `Accept-Encoding` value
///
/// Quality parameters are stripped, except that an explicit `q=0` drops
/// the token. Tokens are yielded lowercased and trimmed.
pub fn accept_encoding_tokens<'x>(val: &'x [u8])
    -> impl Iterator<Item=String> + 'x
{
    val.split(|&x| x == b',')
        .filter_map(|item| {
            let mut parts = item.split(|&x| x == b';');
            let token = trim(parts.next().unwrap_or(b""));
            if token.is_empty() {
                return None;
            }
            for param in parts {
                let param = trim(param);
                if param.eq_ignore_ascii_case(b"q=0")
                    || param.eq_ignore_ascii_case(b"q=0.0")
                    || param.eq_ignore_ascii_case(b"q=0.00")
                    || param.eq_ignore_ascii_case(b"q=0.000")
                {
                    return None;
                }
            }
            String::from_utf8(token.to_ascii_lowercase()).ok()
        })
}

fn trim(mut x: &[u8]) -> &[u8] {
    while x.len() > 0 && matches!(x[0], b'\r' | b'\n' | b' ' | b'\t') {
        x = &x[1..];
    }
    while x.len() > 0 && matches!(x[x.len()-1], b'\r' | b'\n' | b' ' | b'\t')
    {
        x = &x[..x.len()-1];
    }
    return x;
}

#[cfg(test)]
mod test {
    use super::{is_chunked, is_close, is_continue, is_keep_alive};
    use super::accept_encoding_tokens;

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"CHUNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(!is_chunked(b"   CHUNKED 1 "));
        assert!(!is_chunked(b"gzip"));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b"Close"));
        assert!(is_close(b" CLOSE"));
        assert!(!is_close(b"Close  1 "));
        assert!(!is_close(b" xclose   "));
    }

    #[test]
    fn test_keep_alive() {
        assert!(is_keep_alive(b"keep-alive"));
        assert!(is_keep_alive(b"Keep-Alive"));
        assert!(is_keep_alive(b"  KEEP-ALIVE "));
        assert!(!is_keep_alive(b"keep"));
        assert!(!is_keep_alive(b"close"));
    }

    #[test]
    fn test_continue() {
        assert!(is_continue(b"100-continue"));
        assert!(is_continue(b"100-Continue"));
        assert!(is_continue(b"   100-continue   "));
        assert!(!is_continue(b"100-continue y  "));
        assert!(!is_continue(b"100-coztinue   "));
    }

    #[test]
    fn test_accept_encoding() {
        let toks: Vec<_> = accept_encoding_tokens(b"br, gzip;q=0.8")
            .collect();
        assert_eq!(toks, vec!["br".to_string(), "gzip".to_string()]);
        let toks: Vec<_> = accept_encoding_tokens(b"gzip;q=0, deflate")
            .collect();
        assert_eq!(toks, vec!["deflate".to_string()]);
        let toks: Vec<_> = accept_encoding_tokens(b"").collect();
        assert!(toks.is_empty());
    }
}
