use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};

/// A bound, listening socket shared by every worker.
#[derive(Debug)]
pub struct ListenEndpoint {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ListenEndpoint {
    pub fn bind(addr: SocketAddr, backlog: i32) -> anyhow::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .context("failed to create socket")?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind {addr}"))?;
        socket
            .listen(backlog)
            .with_context(|| format!("failed to listen on {addr}"))?;
        socket.set_nonblocking(true)?;

        let listener: TcpListener = socket.into();
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// Actual bound address (port 0 resolves to the assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// A second handle on the same socket, for a worker to own.
    pub fn try_clone_listener(&self) -> io::Result<TcpListener> {
        self.listener.try_clone()
    }
}

/// Resolves `host:port`, taking the first address.
pub fn resolve(endpoint: &str) -> anyhow::Result<SocketAddr> {
    endpoint
        .to_socket_addrs()
        .with_context(|| format!("invalid listen address: {endpoint}"))?
        .next()
        .with_context(|| format!("listen address resolved to nothing: {endpoint}"))
}

/// Binds every configured endpoint once, before any worker exists.
pub fn bind_all(endpoints: &[String], backlog: i32) -> anyhow::Result<Vec<ListenEndpoint>> {
    endpoints
        .iter()
        .map(|endpoint| ListenEndpoint::bind(resolve(endpoint)?, backlog))
        .collect()
}
