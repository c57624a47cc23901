use std::io::Write;

use bytes::Bytes;
use hearth::http::error::ResponseError;
use hearth::http::request::Version;
use hearth::http::response::{Body, Response, SERVER_NAME, Status, StatusCode};

fn wire(sink: &[u8]) -> String {
    String::from_utf8_lossy(sink).into_owned()
}

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::Created.as_u16(), 201);
    assert_eq!(StatusCode::NoContent.as_u16(), 204);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    assert_eq!(StatusCode::UriTooLong.as_u16(), 414);
    assert_eq!(StatusCode::HeaderFieldsTooLarge.as_u16(), 431);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NoContent.reason_phrase(), "No Content");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(
        StatusCode::HeaderFieldsTooLarge.reason_phrase(),
        "Request Header Fields Too Large"
    );
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
}

#[test]
fn test_status_parse() {
    assert_eq!(Status::parse("200 OK"), Some(Status::new(200, "OK")));
    assert_eq!(Status::parse("404"), Some(Status::new(404, "Not Found")));
    assert_eq!(
        Status::parse("299 Something Custom"),
        Some(Status::new(299, "Something Custom"))
    );
    assert_eq!(Status::parse("abc"), None);
    assert_eq!(Status::parse("42 Too Small"), None);
}

#[tokio::test]
async fn test_fixed_length_response() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.reply(StatusCode::Ok, "text/plain", "ok");
    response.flush().await.unwrap();
    assert!(!response.should_close());

    let text = wire(&sink);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("\r\nDate: "));
    assert!(text.contains("\r\nConnection: keep-alive\r\n"));
    assert!(text.contains(&format!("\r\nServer: {SERVER_NAME}\r\n")));
    assert!(text.contains("\r\nContent-Length: 2\r\n"));
    assert!(!text.contains("Transfer-Encoding"));
    assert!(text.ends_with("\r\n\r\nok"));
}

#[tokio::test]
async fn test_chunked_when_length_unknown() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.set_status(StatusCode::Ok);
    response.set_body(Body::from_parts(vec![
        Bytes::from_static(b"abc"),
        Bytes::new(),
        Bytes::from_static(b"defghijklmnop"),
    ]));
    assert!(response.is_chunked());
    response.flush().await.unwrap();

    let text = wire(&sink);
    assert!(text.contains("\r\nTransfer-Encoding: chunked\r\n"));
    assert!(text.ends_with("\r\n\r\n3\r\nabc\r\nD\r\ndefghijklmnop\r\n0\r\n\r\n"));
    assert!(text.contains("Connection: keep-alive"));
}

#[tokio::test]
async fn test_http10_without_length_closes() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http10, false);
    response.set_status(StatusCode::Ok);
    response.set_body(Body::from_bytes("stream"));
    assert!(!response.is_chunked());
    response.flush().await.unwrap();
    assert!(response.should_close());

    let text = wire(&sink);
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(text.contains("Connection: close"));
    assert!(text.ends_with("\r\n\r\nstream"));
}

#[tokio::test]
async fn test_send_header_twice_fails() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.reply(StatusCode::Ok, "text/plain", "x");
    response.send_header().await.unwrap();
    assert!(response.headers_sent());

    assert!(matches!(
        response.send_header().await,
        Err(ResponseError::HeadersAlreadySent)
    ));
    assert!(matches!(
        response.error(StatusCode::InternalServerError),
        Err(ResponseError::HeadersAlreadySent)
    ));
}

#[tokio::test]
async fn test_header_without_status_fails() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    assert!(matches!(
        response.send_header().await,
        Err(ResponseError::StatusNotSet)
    ));
}

#[tokio::test]
async fn test_write_sends_head_implicitly() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.set_status(StatusCode::Ok);
    response.write(b"first").await.unwrap();
    assert!(response.headers_sent());
    response.write(b"second").await.unwrap();
    response.flush().await.unwrap();
    response.flush().await.unwrap();

    let text = wire(&sink);
    assert!(text.ends_with("\r\n\r\n5\r\nfirst\r\n6\r\nsecond\r\n0\r\n\r\n"));
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 1);
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false).with_head_only(true);
    response.reply(StatusCode::Ok, "text/plain", "body bytes");
    response.flush().await.unwrap();

    let text = wire(&sink);
    assert!(text.contains("Content-Length: 10"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_no_content_is_not_chunked() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.set_status(StatusCode::NoContent);
    assert!(!response.is_chunked());
    response.flush().await.unwrap();

    let text = wire(&sink);
    assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
    assert!(!text.contains("Transfer-Encoding"));
    assert!(text.contains("Connection: keep-alive"));
}

#[tokio::test]
async fn test_error_response_replaces_headers_and_closes() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.reply(StatusCode::Ok, "application/json", "{}");
    response.headers.set("X-Custom", "value");
    response.error(StatusCode::BadRequest).unwrap();
    response.flush().await.unwrap();

    let text = wire(&sink);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(text.contains("Connection: close"));
    assert!(!text.contains("X-Custom"));
    assert!(text.ends_with("400 Bad Request"));
}

#[tokio::test]
async fn test_file_body_copied_to_plain_sink() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"0123456789").unwrap();

    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false).with_zero_copy(true);
    response.set_status(StatusCode::Ok);
    response.headers.set("Content-Length", "4");
    response.set_body(Body::from_file(file, 3, 4));
    response.flush().await.unwrap();

    assert!(wire(&sink).ends_with("\r\n\r\n3456"));
}

#[tokio::test]
async fn test_chunked_file_body_is_framed() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"hello world").unwrap();

    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http11, false);
    response.set_status(StatusCode::Ok);
    response.set_body(Body::from_file(file, 6, 5));
    response.flush().await.unwrap();

    assert!(wire(&sink).ends_with("\r\n\r\n5\r\nworld\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn test_file_body_sent_over_socket_with_sendfile() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const OFFSET: usize = 100;
    let contents: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&contents).unwrap();
    let length = contents.len() - OFFSET;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    });

    let (mut stream, _) = listener.accept().await.unwrap();
    let mut response = Response::new(&mut stream, Version::Http11, true).with_zero_copy(true);
    response.set_status(StatusCode::Ok);
    response.set_body(Body::from_file(file, OFFSET as u64, length as u64));
    response.flush().await.unwrap();
    drop(response);
    stream.shutdown().await.unwrap();

    let out = client.await.unwrap();
    let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = wire(&out[..split]);
    assert!(head.contains("Transfer-Encoding: chunked"));

    let body = &out[split..];
    let chunk_head = format!("{length:X}\r\n");
    assert_eq!(chunk_head, "2FFF9C\r\n");
    assert!(body.starts_with(chunk_head.as_bytes()));
    let data = &body[chunk_head.len()..chunk_head.len() + length];
    assert!(data == &contents[OFFSET..]);
    assert_eq!(&body[chunk_head.len() + length..], b"\r\n0\r\n\r\n");
}

#[tokio::test]
async fn test_http10_response_is_never_chunked() {
    let mut sink = Vec::new();
    let mut response = Response::new(&mut sink, Version::Http10, false);
    response.set_status(StatusCode::Ok);
    response.headers.set("Transfer-Encoding", "chunked");
    assert!(!response.is_chunked());
    response.write(b"plain").await.unwrap();
    response.flush().await.unwrap();
    assert!(response.should_close());

    let text = wire(&sink);
    assert!(!text.contains("Transfer-Encoding"));
    assert!(text.contains("Connection: close"));
    assert!(text.ends_with("\r\n\r\nplain"));
}
