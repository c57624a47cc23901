//! HTTP/1.x protocol engine.
//!
//! This module reads requests directly off a byte stream and writes
//! responses back with the right framing. It knows nothing about processes
//! or scheduling; the worker hands it one connection at a time.
//!
//! # Architecture
//!
//! - **`parser`**: buffered reader plus request-line and header-block parsing
//!   under independent size limits
//! - **`body`**: request body readers (chunked, fixed length, read until close)
//! - **`request`**: methods, versions, the parsed request and the keep-alive rule
//! - **`headers`**: ordered, case-insensitive header list
//! - **`response`**: status, body producers and the response writer
//! - **`writer`**: wire serialization, chunk framing and file transmission
//! - **`connection`**: the per-connection request loop
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection Loop
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait (bounded by keepalive_timeout) and parse
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │    Handling      │ ← Run the handler chain
//!        └──────┬───────────┘
//!               │ Response prepared
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Flush head and body
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → drain unread body → Reading
//!               └─ Close → Closed
//! ```

use std::time::Duration;

pub mod body;
pub mod connection;
pub mod error;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use error::{ParseError, ResponseError};
pub use headers::Headers;
pub use request::{Method, Request, Version};
pub use response::{Body, Response, Status, StatusCode};

/// Per-connection protocol knobs.
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub limit_request_line: usize,
    pub limit_request_header: usize,
    pub buffer_size: usize,
    pub keepalive_timeout: Duration,
    pub sendfile: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            limit_request_line: 8192,
            limit_request_header: 8192,
            buffer_size: 8192,
            keepalive_timeout: Duration::from_secs(5),
            sendfile: true,
        }
    }
}
