//! Request body readers.
//!
//! The reader is picked once from the header block and fixed for the life of
//! the request: `Transfer-Encoding: chunked` wins over `Content-Length`, and a
//! request with neither is read until the peer closes.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::timeout;

use crate::http::error::ParseError;
use crate::http::headers::Headers;
use crate::http::parser::{Reader, latin1};
use crate::http::request::content_length;

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

const DRAIN_SIZE: usize = 8192;

/// Framing of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Chunked,
    Length(u64),
    Eof,
}

impl BodyKind {
    /// Chooses the framing from the header block.
    pub fn select(headers: &Headers) -> Result<Self, ParseError> {
        let length = content_length(headers)?;
        if headers.has_token("Transfer-Encoding", "chunked") {
            Ok(BodyKind::Chunked)
        } else if let Some(n) = length {
            Ok(BodyKind::Length(n))
        } else {
            Ok(BodyKind::Eof)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

#[derive(Debug)]
enum State {
    Chunked(Chunk),
    Length(u64),
    Eof { done: bool },
}

/// Body of one request, read lazily from the connection.
pub struct RequestBody<'c> {
    reader: &'c mut Reader,
    kind: BodyKind,
    state: State,
    idle: Option<Duration>,
}

impl<'c> RequestBody<'c> {
    pub fn new(reader: &'c mut Reader, kind: BodyKind) -> Self {
        let state = match kind {
            BodyKind::Chunked => State::Chunked(Chunk::Size),
            BodyKind::Length(n) => State::Length(n),
            BodyKind::Eof => State::Eof { done: false },
        };
        Self {
            reader,
            kind,
            state,
            idle: None,
        }
    }

    /// Bounds each wait for read-until-close body bytes. A peer silent for
    /// longer fails the read with [`ParseError::IdleTimeout`]; zero waits
    /// for the close indefinitely.
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = (!idle.is_zero()).then_some(idle);
        self
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            State::Chunked(Chunk::Done) | State::Length(0) | State::Eof { done: true }
        )
    }

    /// Reads up to `max` bytes. An empty result means the body is exhausted.
    pub async fn read(&mut self, max: usize) -> Result<Bytes, ParseError> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        let Self {
            reader,
            state,
            idle,
            ..
        } = self;
        match state {
            State::Length(remaining) => read_length(reader, remaining, max).await,
            State::Chunked(chunk) => read_chunked(reader, chunk, max).await,
            State::Eof { done } => read_eof(reader, done, *idle, max).await,
        }
    }

    /// Reads everything that is left.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ParseError> {
        let mut out = BytesMut::new();
        loop {
            let part = self.read(64 * 1024).await?;
            if part.is_empty() {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&part);
        }
    }

    /// Discards unread framed body bytes so the next request starts at the
    /// right offset. Read-until-close bodies are left alone.
    pub async fn drain(&mut self) -> Result<(), ParseError> {
        if matches!(self.state, State::Eof { .. }) {
            return Ok(());
        }
        while !self.read(DRAIN_SIZE).await?.is_empty() {}
        Ok(())
    }
}

async fn read_length(
    reader: &mut Reader,
    remaining: &mut u64,
    max: usize,
) -> Result<Bytes, ParseError> {
    if *remaining == 0 {
        return Ok(Bytes::new());
    }
    let want = (*remaining).min(max as u64) as usize;
    let data = reader.take(want).await?;
    if data.is_empty() {
        return Err(truncated("body shorter than Content-Length"));
    }
    *remaining -= data.len() as u64;
    Ok(data)
}

/// The body ends only when the peer closes its side.
async fn read_eof(
    reader: &mut Reader,
    done: &mut bool,
    idle: Option<Duration>,
    max: usize,
) -> Result<Bytes, ParseError> {
    if *done {
        return Ok(Bytes::new());
    }
    let data = match idle {
        Some(idle) => timeout(idle, reader.take(max))
            .await
            .map_err(|_| ParseError::IdleTimeout)??,
        None => reader.take(max).await?,
    };
    if data.is_empty() {
        *done = true;
    }
    Ok(data)
}

/// Fills up to `max` bytes across chunk boundaries. Partial chunk state
/// carries over to the next call.
async fn read_chunked(
    reader: &mut Reader,
    chunk: &mut Chunk,
    max: usize,
) -> Result<Bytes, ParseError> {
    let mut out = BytesMut::new();
    while out.len() < max {
        match *chunk {
            Chunk::Done => break,
            Chunk::Size => {
                let line = read_chunk_line(reader).await?;
                let size = parse_chunk_size(&line)?;
                *chunk = if size == 0 {
                    Chunk::Trailers
                } else {
                    Chunk::Data(size)
                };
            }
            Chunk::Data(remaining) => {
                let want = remaining.min((max - out.len()) as u64) as usize;
                let data = reader.take(want).await?;
                if data.is_empty() {
                    return Err(truncated("chunk shorter than its declared size"));
                }
                out.extend_from_slice(&data);
                let left = remaining - data.len() as u64;
                *chunk = if left == 0 {
                    Chunk::DataEnd
                } else {
                    Chunk::Data(left)
                };
            }
            Chunk::DataEnd => {
                let line = read_chunk_line(reader).await?;
                if !line.is_empty() {
                    return Err(ParseError::InvalidChunk(latin1(&line)));
                }
                *chunk = Chunk::Size;
            }
            Chunk::Trailers => {
                if read_chunk_line(reader).await?.is_empty() {
                    *chunk = Chunk::Done;
                }
            }
        }
    }
    Ok(out.freeze())
}

async fn read_chunk_line(reader: &mut Reader) -> Result<Bytes, ParseError> {
    reader
        .find(
            b"\r\n",
            MAX_CHUNK_LINE,
            ParseError::InvalidChunk("line too long".to_string()),
        )
        .await
}

/// Hex size of a chunk; `;extensions` are ignored.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let text = latin1(line);
    let size = text.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(ParseError::InvalidChunk(text));
    }
    u64::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk(text.clone()))
}

fn truncated(msg: &'static str) -> ParseError {
    ParseError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_accepts_extensions() {
        assert_eq!(parse_chunk_size(b"1a").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"A;name=value").unwrap(), 10);
        assert!(matches!(
            parse_chunk_size(b"zz"),
            Err(ParseError::InvalidChunk(_))
        ));
        assert!(matches!(parse_chunk_size(b""), Err(ParseError::InvalidChunk(_))));
    }

    #[test]
    fn negative_content_length_is_invalid() {
        let mut headers = Headers::new();
        headers.set("Content-Length", "-1");
        assert!(matches!(
            BodyKind::select(&headers),
            Err(ParseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn chunked_wins_over_length() {
        let mut headers = Headers::new();
        headers.set("Content-Length", "4");
        headers.set("Transfer-Encoding", "chunked");
        assert_eq!(BodyKind::select(&headers).unwrap(), BodyKind::Chunked);
    }

    #[tokio::test]
    async fn truncated_fixed_body_is_an_error() {
        let mut reader = Reader::new(&b"abc"[..], 16);
        let mut body = RequestBody::new(&mut reader, BodyKind::Length(5));
        assert_eq!(&body.read(16).await.unwrap()[..], b"abc");
        assert!(matches!(body.read(16).await, Err(ParseError::Io(_))));
    }

    #[tokio::test]
    async fn eof_body_survives_a_pause() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = Reader::new(server, 16);
        let mut body = RequestBody::new(&mut reader, BodyKind::Eof)
            .with_idle_timeout(Duration::from_secs(5));

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"ab").await.unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            client.write_all(b"cd").await.unwrap();
        });

        assert_eq!(&body.read_to_end().await.unwrap()[..], b"abcd");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn silent_eof_body_times_out() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = Reader::new(server, 16);
        let mut body = RequestBody::new(&mut reader, BodyKind::Eof)
            .with_idle_timeout(Duration::from_millis(50));

        let err = body.read_to_end().await.unwrap_err();
        assert!(matches!(err, ParseError::IdleTimeout));
        assert!(err.is_transport());
    }
}
