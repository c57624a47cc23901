use std::io;

use thiserror::Error;

use crate::http::response::StatusCode;

/// Conditions raised while reading a request off the wire.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no more data")]
    NoMoreData,
    #[error("idle timeout")]
    IdleTimeout,
    #[error("request line is too large ({0})")]
    LimitRequestLine(usize),
    #[error("request header is too large ({0})")]
    LimitRequestHeader(usize),
    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid HTTP version: {0}")]
    InvalidVersion(String),
    #[error("invalid HTTP header: {0}")]
    InvalidHeader(String),
    #[error("invalid chunk ({0})")]
    InvalidChunk(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ParseError {
    /// Peer went away or stalled. Nothing is sent back for these.
    pub fn is_transport(&self) -> bool {
        matches!(self, ParseError::NoMoreData | ParseError::IdleTimeout | ParseError::Io(_))
    }

    /// Status to answer with, if the client should hear about it.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ParseError::NoMoreData | ParseError::IdleTimeout | ParseError::Io(_) => None,
            ParseError::LimitRequestLine(_) => Some(StatusCode::UriTooLong),
            ParseError::LimitRequestHeader(_) => Some(StatusCode::HeaderFieldsTooLarge),
            _ => Some(StatusCode::BadRequest),
        }
    }
}

/// Faults in the response writer.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response headers already sent")]
    HeadersAlreadySent,
    #[error("response status not set")]
    StatusNotSet,
    #[error(transparent)]
    Io(#[from] io::Error),
}
