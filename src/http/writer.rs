use std::fs::File;
use std::io::{self, SeekFrom};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use nix::sys::sendfile::sendfile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, DuplexStream, Interest};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;

use crate::http::headers::Headers;
use crate::http::request::Version;
use crate::http::response::Status;

/// Largest single `sendfile` call.
const SENDFILE_CHUNK: usize = 1 << 20;

/// Write side of a connection.
///
/// A sink backed by a real socket exposes it for zero-copy file transfer;
/// anything else gets the buffered copy path.
pub trait Sink: AsyncWrite + Send + Unpin {
    fn socket(&self) -> Option<&TcpStream> {
        None
    }
}

impl Sink for OwnedWriteHalf {
    fn socket(&self) -> Option<&TcpStream> {
        Some(self.as_ref())
    }
}

impl Sink for TcpStream {
    fn socket(&self) -> Option<&TcpStream> {
        Some(self)
    }
}

impl Sink for DuplexStream {}

impl Sink for Vec<u8> {}

/// Frames one chunk of a chunked body.
pub fn chunk_wrap(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 12);
    buf.put_slice(format!("{:X}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// IMF-fixdate, as used by `Date` and `Last-Modified`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn http_date_now() -> String {
    http_date(Utc::now())
}

/// Status line, writer-owned fields, then user headers and the blank line.
pub fn serialize_head(
    version: Version,
    status: &Status,
    extra: &[(&str, &str)],
    headers: &Headers,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    let status_line = format!("{} {}\r\n", version, status);
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in extra {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    headers.write_to(&mut buf);

    buf.extend_from_slice(b"\r\n");
    buf
}

/// Sends `length` bytes of `file` starting at `offset`.
///
/// Uses `sendfile(2)` when allowed and the sink is a socket, otherwise copies
/// through a buffer.
pub async fn write_file(
    sink: &mut dyn Sink,
    file: &File,
    offset: u64,
    length: u64,
    zero_copy: bool,
) -> io::Result<()> {
    if length == 0 {
        return Ok(());
    }
    sink.flush().await?;

    if zero_copy {
        if let Some(socket) = sink.socket() {
            return send_file_zero_copy(socket, file, offset, length).await;
        }
    }

    let mut source = tokio::fs::File::from_std(file.try_clone()?);
    source.seek(SeekFrom::Start(offset)).await?;
    let mut limited = source.take(length);
    let copied = tokio::io::copy(&mut limited, sink).await?;
    if copied < length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "file shorter than the declared body length",
        ));
    }
    Ok(())
}

async fn send_file_zero_copy(
    socket: &TcpStream,
    file: &File,
    offset: u64,
    length: u64,
) -> io::Result<()> {
    let mut position = offset as nix::libc::off_t;
    let mut remaining = length;

    while remaining > 0 {
        let count = remaining.min(SENDFILE_CHUNK as u64) as usize;
        let sent = socket
            .async_io(Interest::WRITABLE, || {
                sendfile(socket, file, Some(&mut position), count).map_err(io::Error::from)
            })
            .await?;
        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shorter than the declared body length",
            ));
        }
        remaining -= sent as u64;
    }
    Ok(())
}
