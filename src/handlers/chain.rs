use std::sync::Arc;

use async_trait::async_trait;

use crate::handlers::{Handler, Interrupt};
use crate::http::{Request, Response};

/// Runs members in registration order until one interrupts.
#[derive(Default)]
pub struct ChainHandler {
    handlers: Vec<Arc<dyn Handler>>,
}

impl ChainHandler {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl Handler for ChainHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        for handler in &self.handlers {
            if let Some(interrupt) = handler.handle(request, response).await? {
                return Ok(Some(interrupt));
            }
        }
        Ok(None)
    }
}
