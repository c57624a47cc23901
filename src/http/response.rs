use std::fmt;
use std::fs::File;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::http::error::ResponseError;
use crate::http::headers::Headers;
use crate::http::request::Version;
use crate::http::writer::{self, Sink, chunk_wrap};

/// Value of the `Server` header.
pub const SERVER_NAME: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));

/// HTTP status codes the server produces on its own.
///
/// Handlers may use any code through [`Status::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 414 URI Too Long
    UriTooLong,
    /// 431 Request Header Fields Too Large
    HeaderFieldsTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// ```
    /// # use hearth::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::UriTooLong.as_u16(), 414);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::UriTooLong => 414,
            StatusCode::HeaderFieldsTooLarge => 431,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::HeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        [
            StatusCode::Continue,
            StatusCode::Ok,
            StatusCode::Created,
            StatusCode::NoContent,
            StatusCode::NotModified,
            StatusCode::BadRequest,
            StatusCode::Forbidden,
            StatusCode::NotFound,
            StatusCode::MethodNotAllowed,
            StatusCode::UriTooLong,
            StatusCode::HeaderFieldsTooLarge,
            StatusCode::InternalServerError,
        ]
        .into_iter()
        .find(|s| s.as_u16() == code)
    }
}

/// Status line payload: code plus reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub reason: String,
}

impl Status {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parses `"200 OK"`. A missing reason falls back to the standard
    /// phrase when the code is known.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (code, reason) = line.split_once(' ').unwrap_or((line, ""));
        let code: u16 = code.parse().ok()?;
        if !(100..=999).contains(&code) {
            return None;
        }
        let reason = match reason.trim() {
            "" => StatusCode::from_u16(code)
                .map(|s| s.reason_phrase())
                .unwrap_or("")
                .to_string(),
            r => r.to_string(),
        };
        Some(Self { code, reason })
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        !(self.code < 200 || self.code == 204 || self.code == 304)
    }
}

impl From<StatusCode> for Status {
    fn from(status: StatusCode) -> Self {
        Self::new(status.as_u16(), status.reason_phrase())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// File region sent as a response body.
#[derive(Debug)]
pub struct FileBody {
    pub file: File,
    pub offset: u64,
    pub length: u64,
}

/// Response body producer.
pub enum Body {
    /// Byte parts sent in order.
    Iter(Box<dyn Iterator<Item = Bytes> + Send>),
    /// File region, eligible for zero-copy transmission.
    File(FileBody),
}

impl Body {
    pub fn empty() -> Self {
        Body::Iter(Box::new(std::iter::empty()))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Body::Iter(Box::new(std::iter::once(data.into())))
    }

    pub fn from_parts(parts: Vec<Bytes>) -> Self {
        Body::Iter(Box::new(parts.into_iter()))
    }

    pub fn from_file(file: File, offset: u64, length: u64) -> Self {
        Body::File(FileBody {
            file,
            offset,
            length,
        })
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Iter(_) => f.write_str("Body::Iter(..)"),
            Body::File(file) => f.debug_tuple("Body::File").field(file).finish(),
        }
    }
}

/// Response for one request, written straight to the connection.
///
/// Status and headers must be final before the first byte goes out. Writing
/// body bytes sends the head implicitly; sending the head explicitly a second
/// time is an error.
pub struct Response<'c> {
    version: Version,
    status: Option<Status>,
    pub headers: Headers,
    body: Body,
    should_close: bool,
    head_only: bool,
    zero_copy: bool,
    chunked: bool,
    headers_sent: bool,
    finished: bool,
    sink: &'c mut dyn Sink,
}

impl<'c> Response<'c> {
    pub fn new(sink: &'c mut dyn Sink, version: Version, should_close: bool) -> Self {
        let mut headers = Headers::new();
        headers.set("Server", SERVER_NAME);
        Self {
            version,
            status: None,
            headers,
            body: Body::empty(),
            should_close,
            head_only: false,
            zero_copy: false,
            chunked: false,
            headers_sent: false,
            finished: false,
            sink,
        }
    }

    /// Allow `sendfile` for file bodies.
    pub fn with_zero_copy(mut self, enabled: bool) -> Self {
        self.zero_copy = enabled;
        self
    }

    /// Suppress the body, as for `HEAD`.
    pub fn with_head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn set_status(&mut self, status: impl Into<Status>) {
        self.status = Some(status.into());
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// Close the connection after this response regardless of what the
    /// client asked for.
    pub fn force_close(&mut self) {
        self.should_close = true;
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Sets status, `Content-Type`, `Content-Length` and an in-memory body.
    pub fn reply(&mut self, status: impl Into<Status>, content_type: &str, body: impl Into<Bytes>) {
        let body = body.into();
        self.set_status(status);
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = Body::from_bytes(body);
    }

    /// Replaces anything prepared so far with a plain-text error that closes
    /// the connection. Only valid before the head is sent.
    pub fn error(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        if self.headers_sent {
            return Err(ResponseError::HeadersAlreadySent);
        }
        let mut headers = Headers::new();
        headers.set("Server", SERVER_NAME);
        self.headers = headers;
        self.force_close();
        let text = format!("{} {}", status.as_u16(), status.reason_phrase());
        self.reply(status, "text/plain", text);
        Ok(())
    }

    /// Whether the body goes out chunked.
    ///
    /// Fixed once the head is sent. Before that it is chunked iff the wire
    /// version is HTTP/1.1 and either the handler asked for it or no
    /// `Content-Length` is set.
    pub fn is_chunked(&self) -> bool {
        if self.headers_sent {
            return self.chunked;
        }
        self.wants_chunked()
    }

    fn wants_chunked(&self) -> bool {
        let body_allowed = self.status.as_ref().is_none_or(|s| s.allows_body());
        if !body_allowed || self.version < Version::Http11 {
            false
        } else if self.headers.has_token("Transfer-Encoding", "chunked") {
            true
        } else if self.headers.contains("Content-Length") {
            false
        } else {
            self.version >= Version::Http11
        }
    }

    /// Serialized status line and headers.
    pub fn header_dump(&mut self) -> Result<Vec<u8>, ResponseError> {
        let status = self.status.clone().ok_or(ResponseError::StatusNotSet)?;
        self.chunked = self.wants_chunked();
        if !self.chunked {
            self.headers.remove("Transfer-Encoding");
        }

        // Without length or chunking the body is delimited by close.
        if !self.chunked && status.allows_body() && !self.headers.contains("Content-Length") {
            self.should_close = true;
        }

        let date = writer::http_date_now();
        let connection = if self.should_close { "close" } else { "keep-alive" };
        let mut extra = vec![("Date", date.as_str()), ("Connection", connection)];
        if self.chunked && !self.headers.has_token("Transfer-Encoding", "chunked") {
            extra.push(("Transfer-Encoding", "chunked"));
        }

        Ok(writer::serialize_head(
            self.version,
            &status,
            &extra,
            &self.headers,
        ))
    }

    /// Sends the status line and headers.
    ///
    /// Calling this after the head went out is a programming error and
    /// fails with [`ResponseError::HeadersAlreadySent`].
    pub async fn send_header(&mut self) -> Result<(), ResponseError> {
        if self.headers_sent {
            return Err(ResponseError::HeadersAlreadySent);
        }
        let head = self.header_dump()?;
        self.sink.write_all(&head).await?;
        self.headers_sent = true;
        Ok(())
    }

    /// Writes body bytes immediately, sending the head first if needed.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        if !self.headers_sent {
            self.send_header().await?;
        }
        if self.head_only || data.is_empty() {
            return Ok(());
        }
        if self.chunked {
            self.sink.write_all(&chunk_wrap(data)).await?;
        } else {
            self.sink.write_all(data).await?;
        }
        Ok(())
    }

    /// Sends whatever is left: the head if pending, the body, and the final
    /// chunk. Later calls do nothing.
    pub async fn flush(&mut self) -> Result<(), ResponseError> {
        if self.finished {
            return Ok(());
        }
        if !self.headers_sent {
            self.send_header().await?;
        }

        let body = std::mem::replace(&mut self.body, Body::empty());
        if !self.head_only {
            match body {
                Body::Iter(parts) => {
                    for part in parts {
                        if part.is_empty() {
                            continue;
                        }
                        if self.chunked {
                            self.sink.write_all(&chunk_wrap(&part)).await?;
                        } else {
                            self.sink.write_all(&part).await?;
                        }
                    }
                }
                Body::File(FileBody {
                    file,
                    offset,
                    length,
                }) => {
                    if self.chunked && length > 0 {
                        self.sink
                            .write_all(format!("{:X}\r\n", length).as_bytes())
                            .await?;
                    }
                    writer::write_file(&mut *self.sink, &file, offset, length, self.zero_copy)
                        .await?;
                    if self.chunked && length > 0 {
                        self.sink.write_all(b"\r\n").await?;
                    }
                }
            }
            if self.chunked {
                self.sink.write_all(b"0\r\n\r\n").await?;
            }
        }

        self.sink.flush().await?;
        self.finished = true;
        Ok(())
    }
}
