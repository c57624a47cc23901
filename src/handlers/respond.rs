use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;

use crate::handlers::{Handler, Interrupt};
use crate::http::{Request, Response, Status};

/// Answers every request with the same fixed response.
pub struct RespondHandler {
    status: Status,
    content_type: String,
    body: Bytes,
}

impl RespondHandler {
    pub fn new(status: u16, body: &str, content_type: &str) -> anyhow::Result<Self> {
        let status = Status::parse(&status.to_string())
            .with_context(|| format!("invalid status code: {status}"))?;
        Ok(Self {
            status,
            content_type: content_type.to_string(),
            body: Bytes::copy_from_slice(body.as_bytes()),
        })
    }
}

#[async_trait]
impl Handler for RespondHandler {
    async fn handle(
        &self,
        _request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        response.reply(self.status.clone(), &self.content_type, self.body.clone());
        Ok(None)
    }
}
