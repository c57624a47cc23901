use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::http::ProtocolSettings;
use crate::http::body::BodyKind;
use crate::http::error::ParseError;
use crate::http::headers::Headers;
use crate::http::request::{Method, RequestHead, Version};
use crate::http::writer::Sink;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Buffered reader over the read half of a connection.
///
/// Bytes read past the end of one request stay buffered for the next.
pub struct Reader {
    io: Box<dyn AsyncRead + Send + Unpin>,
    buf: BytesMut,
    buffer_size: usize,
}

impl Reader {
    pub fn new<R>(io: R, buffer_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            io: Box::new(io),
            buf: BytesMut::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Bytes already read but not consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// One read of at most `buffer_size` bytes. Returns 0 at end of stream.
    pub async fn fill(&mut self) -> Result<usize, ParseError> {
        let mut limited = (&mut self.buf).limit(self.buffer_size);
        let n = self.io.read_buf(&mut limited).await?;
        Ok(n)
    }

    /// Primes the buffer. A peer that closed without sending anything
    /// surfaces as [`ParseError::NoMoreData`].
    pub async fn preread(&mut self) -> Result<(), ParseError> {
        if self.fill().await? == 0 {
            return Err(ParseError::NoMoreData);
        }
        Ok(())
    }

    /// Returns the bytes before the next `delim` and consumes the delimiter.
    ///
    /// Fails with `overflow` once more than `limit` bytes are scanned without
    /// a match (a `limit` of 0 disables the check).
    pub async fn find(
        &mut self,
        delim: &[u8],
        limit: usize,
        overflow: ParseError,
    ) -> Result<Bytes, ParseError> {
        let mut searched = 0usize;
        loop {
            let start = searched.saturating_sub(delim.len() - 1);
            if let Some(pos) = find_subslice(&self.buf[start..], delim) {
                let idx = start + pos;
                if limit > 0 && idx > limit {
                    return Err(overflow);
                }
                let found = self.buf.split_to(idx).freeze();
                self.buf.advance(delim.len());
                return Ok(found);
            }
            if limit > 0 && self.buf.len() > limit {
                return Err(overflow);
            }
            searched = self.buf.len();
            if self.fill().await? == 0 {
                return Err(ParseError::NoMoreData);
            }
        }
    }

    /// Up to `max` bytes; reads once if nothing is buffered. Empty at EOF.
    pub async fn take(&mut self, max: usize) -> Result<Bytes, ParseError> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Ok(Bytes::new());
        }
        let n = max.min(self.buf.len());
        Ok(self.buf.split_to(n).freeze())
    }

    /// Header block up to and excluding the blank line. A request with no
    /// header fields yields an empty block.
    async fn read_header_block(&mut self, limit: usize) -> Result<Bytes, ParseError> {
        while self.buf.len() < 2 {
            if self.fill().await? == 0 {
                return Err(ParseError::NoMoreData);
            }
        }
        if self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
            return Ok(Bytes::new());
        }
        self.find(b"\r\n\r\n", limit, ParseError::LimitRequestHeader(limit))
            .await
    }
}

/// Reads one request head off the connection.
///
/// Writes the interim `100 Continue` line when the client asked for it.
pub async fn parse_request(
    reader: &mut Reader,
    sink: &mut dyn Sink,
    settings: &ProtocolSettings,
) -> Result<RequestHead, ParseError> {
    if reader.buffered() == 0 {
        if settings.keepalive_timeout.is_zero() {
            reader.preread().await?;
        } else {
            timeout(settings.keepalive_timeout, reader.preread())
                .await
                .map_err(|_| ParseError::IdleTimeout)??;
        }
    }

    let line = reader
        .find(
            b"\r\n",
            settings.limit_request_line,
            ParseError::LimitRequestLine(settings.limit_request_line),
        )
        .await?;
    let (method, uri, version) = parse_request_line(&latin1(&line))?;

    let block = reader
        .read_header_block(settings.limit_request_header)
        .await?;
    let headers = parse_header_block(&latin1(&block))?;
    let body_kind = BodyKind::select(&headers)?;

    let head = RequestHead {
        method,
        uri,
        version,
        headers,
        body_kind,
    };

    if head.expects_continue() {
        sink.write_all(CONTINUE).await?;
        sink.flush().await?;
    }

    Ok(head)
}

/// Splits a request line into method, target and version.
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version), ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let &[method, uri, version] = parts.as_slice() else {
        return Err(ParseError::InvalidRequestLine(line.to_string()));
    };

    let method = Method::from_str(&method.to_ascii_uppercase())
        .ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;
    let version =
        Version::parse(version).ok_or_else(|| ParseError::InvalidVersion(version.to_string()))?;

    Ok((method, uri.to_string(), version))
}

/// Splits a header block (without the trailing blank line) into fields.
pub fn parse_header_block(block: &str) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    if block.is_empty() {
        return Ok(headers);
    }

    for line in block.split("\r\n") {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::InvalidHeader(line.trim().to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader(line.trim().to_string()));
        }
        headers.set(key, value.trim());
    }

    Ok(headers)
}

/// Header bytes are ISO-8859-1.
pub(crate) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let (method, uri, version) = parse_request_line("GET / HTTP/1.1").unwrap();

        assert_eq!(method, Method::GET);
        assert_eq!(uri, "/");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn lowercase_tokens_are_accepted() {
        let (method, _, version) = parse_request_line("post /chunk http/1.1").unwrap();
        assert_eq!(method, Method::POST);
        assert_eq!(version, Version::Http11);
    }

    #[tokio::test]
    async fn find_keeps_remainder_buffered() {
        let mut reader = Reader::new(&b"line one\r\nrest"[..], 4);
        let line = reader
            .find(b"\r\n", 64, ParseError::LimitRequestLine(64))
            .await
            .unwrap();
        assert_eq!(&line[..], b"line one");

        let mut rest = Vec::new();
        loop {
            let part = reader.take(16).await.unwrap();
            if part.is_empty() {
                break;
            }
            rest.extend_from_slice(&part);
        }
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn latin1_maps_high_bytes() {
        assert_eq!(latin1(&[0x63, 0x61, 0x66, 0xe9]), "caf\u{e9}");
    }
}
