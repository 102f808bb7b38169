/// The target of an HTTP request, as written on the request line
///
/// The fragment (anything after `#`) is already stripped here; it is
/// preserved only on the raw target view of `Head`.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestTarget<'a> {
    /// Usual form of `/hello?name=world`
    Origin(&'a str),
    /// Full url: `http://example.com:8080/hello`
    ///
    /// Note in this case (unlike in Origin) path may not start with a
    /// slash
    Absolute { scheme: &'a str, authority: &'a str, path: &'a str },
    /// Only hostname `example.com:8080`, only useful for `CONNECT`
    Authority(&'a str),
    /// Asterisk `*`
    Asterisk,
}

// Authority can't contain `/` or `?` or `#`, user and password
// is not supported in HTTP either (so no `@` but otherwise we accept
// anything as rules are quite complex)
fn authority_end_char(&x: &u8) -> bool {
    x == b'/' || x == b'?' || x == b'#' || x == b'@'
}

/// Split the fragment off a raw request target
pub fn split_fragment(s: &str) -> (&str, Option<&str>) {
    match s.as_bytes().iter().position(|&x| x == b'#') {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    }
}

/// Split path and query of an origin-form (or absolute-form path) target
pub fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.as_bytes().iter().position(|&x| x == b'?') {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    }
}

impl<'a> RequestTarget<'a> {
    /// Parse a request target with the fragment already stripped
    pub fn parse(s: &'a str) -> Option<RequestTarget<'a>> {
        use self::RequestTarget::*;

        if s.len() == 0 {
            return None;
        }
        if s.starts_with("/") {
            return Some(Origin(s));
        }
        if s.starts_with("http://") {
            let auth_end = s[7..].as_bytes().iter()
                .position(authority_end_char)
                .unwrap_or(s.len()-7);
            return Some(Absolute {
                scheme: "http",
                authority: &s[7..7+auth_end],
                path: &s[7+auth_end..],
            });
        }
        if s.starts_with("https://") {
            let auth_end = s[8..].as_bytes().iter()
                .position(authority_end_char)
                .unwrap_or(s.len()-8);
            return Some(Absolute {
                scheme: "https",
                authority: &s[8..8+auth_end],
                path: &s[8+auth_end..],
            });
        }
        if s == "*" {
            return Some(Asterisk);
        }
        if s.as_bytes().iter().position(authority_end_char).is_none() {
            return Some(Authority(s));
        }

        return None;
    }

    /// Path and query of the target, empty for authority and asterisk
    /// forms
    pub fn path_and_query(&self) -> &'a str {
        use self::RequestTarget::*;
        match *self {
            Origin(path) => path,
            Absolute { path, .. } => path,
            Authority(..) => "",
            Asterisk => "",
        }
    }
}

#[cfg(test)]
mod test {
    use super::{split_fragment, split_query, RequestTarget};
    use super::RequestTarget::*;

    #[test]
    fn test_empty() {
        assert_matches!(RequestTarget::parse(""), None);
    }

    #[test]
    fn test_path() {
        assert_matches!(RequestTarget::parse("/hello"),
                        Some(Origin("/hello")));
    }

    #[test]
    fn test_path_query() {
        assert_matches!(RequestTarget::parse("/hello?xxx"),
                        Some(Origin("/hello?xxx")));
    }

    #[test]
    fn test_star() {
        assert_matches!(RequestTarget::parse("*"), Some(Asterisk));
    }

    #[test]
    fn test_strange_path() {
        assert_matches!(RequestTarget::parse("/http://x"),
                        Some(Origin("/http://x")));
    }

    #[test]
    fn test_plain_authority_uri() {
        assert_matches!(RequestTarget::parse("http://x"),
                        Some(Absolute { scheme: "http", authority: "x",
                                        path: "" }));
    }

    #[test]
    fn test_uri() {
        assert_matches!(RequestTarget::parse("https://x/"),
                        Some(Absolute { scheme: "https", authority: "x",
                                        path: "/" }));
    }

    #[test]
    fn test_bigger_uri() {
        assert_matches!(RequestTarget::parse("http://x:932/hello?world"),
                        Some(Absolute { scheme: "http", authority: "x:932",
                                        path: "/hello?world" }));
    }

    #[test]
    fn test_fragment_split() {
        assert_eq!(split_fragment("/hello?x=1#frag"),
                   ("/hello?x=1", Some("frag")));
        assert_eq!(split_fragment("/hello"), ("/hello", None));
        assert_eq!(split_fragment("/#"), ("/", Some("")));
    }

    #[test]
    fn test_query_split() {
        assert_eq!(split_query("/hello?x=1&y=2"),
                   ("/hello", Some("x=1&y=2")));
        assert_eq!(split_query("/hello"), ("/hello", None));
    }
}
