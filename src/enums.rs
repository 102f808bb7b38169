use std::fmt;

/// Enum reprsenting HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy, PartialOrd, Ord)]
pub enum Version {
    /// Ancient single-line GET requests, no headers, no body
    Http09,
    Http10,
    Http11,
}

/// Request method
///
/// All methods of the original protocol plus the WebDAV-ish subset we
/// serve; anything else parses as `Unsupported` and the engine replies
/// with 501.
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash)]
#[allow(missing_docs)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Move,
    Copy,
    Lock,
    Merge,
    /// Method token we don't know about
    Unsupported,
}

/// A response status with the canonical reason phrase
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[allow(missing_docs)]
pub enum Status {
    Continue,
    SwitchingProtocol,
    Ok,
    Created,
    Accepted,
    NonAuthoritativeInformation,
    NoContent,
    ResetContent,
    PartialContent,
    MultipleChoices,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    TemporaryRedirect,
    PermanentRedirect,
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    PayloadTooLarge,
    RequestUriTooLong,
    UnsupportedMediaType,
    ExpectationFailed,
    UpgradeRequired,
    RequestHeaderFieldsTooLarge,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    VersionNotSupported,
}

impl Version {
    /// True for protocol versions that support persistent connections
    /// by default (1.1 and above)
    pub fn implies_keep_alive(&self) -> bool {
        *self >= Version::Http11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http09 => f.write_str("HTTP/0.9"),
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

impl Method {
    /// Parse a (case-sensitive) method token
    pub fn from_token(token: &str) -> Method {
        use self::Method::*;
        match token {
            "GET" => Get,
            "POST" => Post,
            "PUT" => Put,
            "DELETE" => Delete,
            "PATCH" => Patch,
            "HEAD" => Head,
            "OPTIONS" => Options,
            "TRACE" => Trace,
            "MOVE" => Move,
            "COPY" => Copy,
            "LOCK" => Lock,
            "MERGE" => Merge,
            _ => Unsupported,
        }
    }
    /// The wire token of the method
    ///
    /// # Panics
    ///
    /// Panics for `Unsupported`, which has no token by definition.
    pub fn as_token(&self) -> &'static str {
        use self::Method::*;
        match *self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Patch => "PATCH",
            Head => "HEAD",
            Options => "OPTIONS",
            Trace => "TRACE",
            Move => "MOVE",
            Copy => "COPY",
            Lock => "LOCK",
            Merge => "MERGE",
            Unsupported => panic!("unsupported method has no token"),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Method::Unsupported => f.write_str("<unsupported>"),
            _ => f.write_str(self.as_token()),
        }
    }
}

impl Status {
    /// Returns the numeric status code
    pub fn code(&self) -> u16 {
        use self::Status::*;
        match *self {
            Continue => 100,
            SwitchingProtocol => 101,
            Ok => 200,
            Created => 201,
            Accepted => 202,
            NonAuthoritativeInformation => 203,
            NoContent => 204,
            ResetContent => 205,
            PartialContent => 206,
            MultipleChoices => 300,
            MovedPermanently => 301,
            Found => 302,
            SeeOther => 303,
            NotModified => 304,
            TemporaryRedirect => 307,
            PermanentRedirect => 308,
            BadRequest => 400,
            Unauthorized => 401,
            PaymentRequired => 402,
            Forbidden => 403,
            NotFound => 404,
            MethodNotAllowed => 405,
            NotAcceptable => 406,
            RequestTimeout => 408,
            Conflict => 409,
            Gone => 410,
            LengthRequired => 411,
            PreconditionFailed => 412,
            PayloadTooLarge => 413,
            RequestUriTooLong => 414,
            UnsupportedMediaType => 415,
            ExpectationFailed => 417,
            UpgradeRequired => 426,
            RequestHeaderFieldsTooLarge => 431,
            InternalServerError => 500,
            NotImplemented => 501,
            BadGateway => 502,
            ServiceUnavailable => 503,
            GatewayTimeout => 504,
            VersionNotSupported => 505,
        }
    }
    /// Returns the canonical reason phrase
    pub fn reason(&self) -> &'static str {
        use self::Status::*;
        match *self {
            Continue => "Continue",
            SwitchingProtocol => "Switching Protocols",
            Ok => "OK",
            Created => "Created",
            Accepted => "Accepted",
            NonAuthoritativeInformation => "Non-Authoritative Information",
            NoContent => "No Content",
            ResetContent => "Reset Content",
            PartialContent => "Partial Content",
            MultipleChoices => "Multiple Choices",
            MovedPermanently => "Moved Permanently",
            Found => "Found",
            SeeOther => "See Other",
            NotModified => "Not Modified",
            TemporaryRedirect => "Temporary Redirect",
            PermanentRedirect => "Permanent Redirect",
            BadRequest => "Bad Request",
            Unauthorized => "Unauthorized",
            PaymentRequired => "Payment Required",
            Forbidden => "Forbidden",
            NotFound => "Not Found",
            MethodNotAllowed => "Method Not Allowed",
            NotAcceptable => "Not Acceptable",
            RequestTimeout => "Request Timeout",
            Conflict => "Conflict",
            Gone => "Gone",
            LengthRequired => "Length Required",
            PreconditionFailed => "Precondition Failed",
            PayloadTooLarge => "Payload Too Large",
            RequestUriTooLong => "Request-URI Too Long",
            UnsupportedMediaType => "Unsupported Media Type",
            ExpectationFailed => "Expectation Failed",
            UpgradeRequired => "Upgrade Required",
            RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            InternalServerError => "Internal Server Error",
            NotImplemented => "Not Implemented",
            BadGateway => "Bad Gateway",
            ServiceUnavailable => "Service Unavailable",
            GatewayTimeout => "Gateway Timeout",
            VersionNotSupported => "HTTP Version Not Supported",
        }
    }
    /// Whether a response with this status is allowed to carry a body
    ///
    /// All 1xx (Informational), 204 (No Content) and 304 (Not Modified)
    /// responses must not include a message body.
    pub fn response_has_body(&self) -> bool {
        match self.code() {
            100...199 | 204 | 304 => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Method, Status, Version};

    #[test]
    fn method_tokens() {
        assert_eq!(Method::from_token("GET"), Method::Get);
        assert_eq!(Method::from_token("get"), Method::Unsupported);
        assert_eq!(Method::from_token("MERGE"), Method::Merge);
        assert_eq!(Method::from_token("LOCK"), Method::Lock);
        assert_eq!(Method::from_token("BREW"), Method::Unsupported);
        assert_eq!(Method::Move.as_token(), "MOVE");
    }

    #[test]
    fn version_ordering() {
        assert!(Version::Http11 > Version::Http10);
        assert!(Version::Http10 > Version::Http09);
        assert!(Version::Http11.implies_keep_alive());
        assert!(!Version::Http10.implies_keep_alive());
        assert_eq!(format!("{}", Version::Http09), "HTTP/0.9");
    }

    #[test]
    fn status_body_rules() {
        assert!(!Status::Continue.response_has_body());
        assert!(!Status::NoContent.response_has_body());
        assert!(!Status::NotModified.response_has_body());
        assert!(Status::Ok.response_has_body());
        assert_eq!(Status::RequestHeaderFieldsTooLarge.code(), 431);
        assert_eq!(Status::VersionNotSupported.reason(),
                   "HTTP Version Not Supported");
    }
}
