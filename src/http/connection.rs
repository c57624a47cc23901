use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::handlers::{Handler, Interrupt};
use crate::http::ProtocolSettings;
use crate::http::body::RequestBody;
use crate::http::error::{ParseError, ResponseError};
use crate::http::parser::{Reader, parse_request};
use crate::http::request::{Method, Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::Sink;

/// What happens to the connection after one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    KeepAlive,
    Closed,
}

/// One client connection, served request after request until either side
/// closes it.
pub struct Connection {
    reader: Reader,
    sink: Box<dyn Sink>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    settings: Arc<ProtocolSettings>,
    handler: Arc<dyn Handler>,
    served: u64,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        settings: Arc<ProtocolSettings>,
        handler: Arc<dyn Handler>,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read, write) = stream.into_split();
        Ok(Self::from_io(
            read, write, peer_addr, local_addr, settings, handler,
        ))
    }

    /// Builds a connection over arbitrary byte streams.
    pub fn from_io<R, W>(
        read: R,
        write: W,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        settings: Arc<ProtocolSettings>,
        handler: Arc<dyn Handler>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: Sink + 'static,
    {
        Self {
            reader: Reader::new(read, settings.buffer_size),
            sink: Box::new(write),
            peer_addr,
            local_addr,
            settings,
            handler,
            served: 0,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Requests answered so far.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    /// Serves requests until the connection closes.
    ///
    /// Protocol and transport failures end the connection but are not
    /// reported as errors; they are handled here.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        while self.serve_one().await? == ConnectionState::KeepAlive {}

        if let Err(e) = self.sink.shutdown().await {
            debug!(peer = %self.peer_addr, error = %e, "Shutdown failed");
        }
        debug!(peer = %self.peer_addr, requests = self.served, "Connection closed");
        Ok(())
    }

    /// Reads, handles and answers a single request.
    pub async fn serve_one(&mut self) -> anyhow::Result<ConnectionState> {
        let head = match parse_request(&mut self.reader, &mut *self.sink, &self.settings).await {
            Ok(head) => head,
            Err(e) if e.is_transport() => {
                debug!(peer = %self.peer_addr, reason = %e, "Closing connection");
                return Ok(ConnectionState::Closed);
            }
            Err(e) => {
                debug!(peer = %self.peer_addr, error = %e, "Rejecting request");
                self.reject(&e).await;
                return Ok(ConnectionState::Closed);
            }
        };

        let version = head.version;
        let close_requested = head.should_close();
        let head_only = head.method == Method::HEAD;
        let body = RequestBody::new(&mut self.reader, head.body_kind)
            .with_idle_timeout(self.settings.keepalive_timeout);
        let mut request = Request::new(head, body, self.peer_addr, self.local_addr);
        let mut response = Response::new(&mut *self.sink, version, close_requested)
            .with_zero_copy(self.settings.sendfile)
            .with_head_only(head_only);

        let interrupt = match self.handler.handle(&mut request, &mut response).await {
            Ok(interrupt) => interrupt,
            Err(e) => {
                // Body read failures surface through the handler but belong
                // to the client.
                let status = match e.downcast_ref::<ParseError>() {
                    Some(parse) if parse.is_transport() => {
                        debug!(peer = %self.peer_addr, reason = %parse, "Closing connection");
                        return Ok(ConnectionState::Closed);
                    }
                    Some(parse) => {
                        debug!(peer = %self.peer_addr, error = %parse, "Rejecting request body");
                        parse.status().unwrap_or(StatusCode::BadRequest)
                    }
                    None => {
                        error!(
                            peer = %self.peer_addr,
                            method = %request.method,
                            uri = %request.uri,
                            error = ?e,
                            "Error handling request"
                        );
                        StatusCode::InternalServerError
                    }
                };
                if response.error(status).is_ok() {
                    if let Err(e) = response.flush().await {
                        debug!(peer = %self.peer_addr, error = %e, "Failed to send error response");
                    }
                }
                return Ok(ConnectionState::Closed);
            }
        };

        if !response.headers_sent() {
            if response.status().is_none() {
                response.reply(StatusCode::NotFound, "text/plain", "404 Not Found");
            }
            if interrupt == Some(Interrupt::Close) {
                response.force_close();
            }
        }

        match response.flush().await {
            Ok(()) => {}
            Err(ResponseError::Io(e)) => {
                debug!(peer = %self.peer_addr, error = %e, "Write failed");
                return Ok(ConnectionState::Closed);
            }
            Err(e) => {
                warn!(peer = %self.peer_addr, uri = %request.uri, error = %e, "Incomplete response");
                return Ok(ConnectionState::Closed);
            }
        }
        self.served += 1;

        if response.should_close() || interrupt == Some(Interrupt::Close) {
            return Ok(ConnectionState::Closed);
        }
        drop(response);

        // Unread body bytes would otherwise be parsed as the next request.
        if let Err(e) = request.body.drain().await {
            debug!(peer = %self.peer_addr, error = %e, "Failed to drain request body");
            return Ok(ConnectionState::Closed);
        }
        Ok(ConnectionState::KeepAlive)
    }

    async fn reject(&mut self, e: &ParseError) {
        let Some(status) = e.status() else {
            return;
        };
        let mut response = Response::new(&mut *self.sink, Version::Http11, true);
        if response.error(status).is_ok() {
            if let Err(e) = response.flush().await {
                debug!(peer = %self.peer_addr, error = %e, "Failed to send error response");
            }
        }
    }
}
