use std::sync::Arc;
use std::time::Duration;

use hearth::handlers::{Handler, RespondHandler};
use hearth::http::ProtocolSettings;
use hearth::server::worker::accept_loop;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Server {
    addr: std::net::SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

async fn serve(connections: usize) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler: Arc<dyn Handler> = Arc::new(RespondHandler::new(200, "ok", "text/plain").unwrap());
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(
        listener,
        Arc::new(Semaphore::new(connections)),
        Arc::new(ProtocolSettings::default()),
        handler,
        rx,
    ));
    Server {
        addr,
        shutdown,
        task,
    }
}

/// Reads one `Content-Length: 2` response.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    while !data.ends_with(b"\r\n\r\nok") {
        data.push(stream.read_u8().await.unwrap());
    }
    String::from_utf8(data).unwrap()
}

#[tokio::test]
async fn test_accept_loop_serves_requests() {
    let server = serve(8).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();

    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(out.ends_with("ok"));
}

#[tokio::test]
async fn test_connection_limit_defers_extra_clients() {
    let server = serve(1).await;

    let mut first = TcpStream::connect(server.addr).await.unwrap();
    first.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    read_response(&mut first).await;

    // The only permit is held by the idle keep-alive connection.
    let mut second = TcpStream::connect(server.addr).await.unwrap();
    second.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut byte = [0u8; 1];
    assert!(
        timeout(Duration::from_millis(300), second.read(&mut byte))
            .await
            .is_err()
    );

    drop(first);
    let text = timeout(Duration::from_secs(5), read_response(&mut second))
        .await
        .expect("second client was never served");
    assert!(text.ends_with("ok"));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = serve(4).await;
    server.shutdown.send(true).unwrap();

    timeout(Duration::from_secs(5), server.task)
        .await
        .expect("accept loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_leaves_open_connections_running() {
    let server = serve(4).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    read_response(&mut client).await;

    server.shutdown.send(true).unwrap();
    timeout(Duration::from_secs(5), server.task)
        .await
        .unwrap()
        .unwrap();

    client.write_all(b"GET /again HTTP/1.1\r\n\r\n").await.unwrap();
    let text = timeout(Duration::from_secs(5), read_response(&mut client))
        .await
        .unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
}
