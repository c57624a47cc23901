use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::http::body::{BodyKind, RequestBody};
use crate::http::error::ParseError;
use crate::http::headers::Headers;

/// HTTP request methods accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Loop-back test
    TRACE,
    /// CONNECT - Tunnel request
    CONNECT,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Matching is exact; the parser upper-cases the token before calling
    /// this.
    ///
    /// ```
    /// # use hearth::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions spoken on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Parses `HTTP/1.0` or `HTTP/1.1`. The `HTTP` token is case-insensitive.
    pub fn parse(token: &str) -> Option<Self> {
        let (proto, number) = token.split_once('/')?;
        if !proto.eq_ignore_ascii_case("HTTP") {
            return None;
        }
        match number {
            "1.0" => Some(Version::Http10),
            "1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    /// Bare version number, e.g. `1.1`.
    pub fn number(&self) -> &'static str {
        match self {
            Version::Http10 => "1.0",
            Version::Http11 => "1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}", self.number())
    }
}

/// Connection-reuse decision.
///
/// An explicit `Connection: close` or `keep-alive` wins; otherwise HTTP/1.0
/// closes and HTTP/1.1 keeps the connection.
pub fn should_close(version: Version, headers: &Headers) -> bool {
    if headers.has_token("Connection", "close") {
        true
    } else if headers.has_token("Connection", "keep-alive") {
        false
    } else {
        version <= Version::Http10
    }
}

/// Request line and header block of one request, before the body is bound.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
    pub body_kind: BodyKind,
}

impl RequestHead {
    pub fn should_close(&self) -> bool {
        should_close(self.version, &self.headers)
    }

    pub fn expects_continue(&self) -> bool {
        self.headers
            .get("Expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// One parsed request bound to the connection it arrived on.
pub struct Request<'c> {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: Headers,
    pub body: RequestBody<'c>,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub received_at: Instant,
}

impl<'c> Request<'c> {
    pub fn new(
        head: RequestHead,
        body: RequestBody<'c>,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            method: head.method,
            uri: head.uri,
            version: head.version,
            headers: head.headers,
            body,
            peer_addr,
            local_addr,
            received_at: Instant::now(),
        }
    }

    /// Retrieves the first value of a header, matched case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Result<Option<u64>, ParseError> {
        content_length(&self.headers)
    }

    /// Whether the connection closes after this exchange.
    pub fn should_close(&self) -> bool {
        should_close(self.version, &self.headers)
    }

    /// URI path without the query string.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(self.uri.as_str(), |(p, _)| p)
    }

    /// Query string without the leading `?`, empty when absent.
    pub fn query(&self) -> &str {
        self.uri.split_once('?').map_or("", |(_, q)| q)
    }
}

/// Parses `Content-Length`. Negative or non-numeric values are invalid.
pub fn content_length(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let Some(raw) = headers.get("Content-Length") else {
        return Ok(None);
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidHeader(format!("Content-Length: {raw}")))?;
    if value < 0 {
        return Err(ParseError::InvalidHeader(format!("Content-Length: {raw}")));
    }
    Ok(Some(value as u64))
}
