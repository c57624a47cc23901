use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;

use crate::handlers::{Handler, Interrupt, decode_uri};
use crate::http::{Request, Response};

pub struct RouteRule {
    regex: Regex,
    handler: Arc<dyn Handler>,
}

impl RouteRule {
    pub fn new(pattern: &str, handler: Arc<dyn Handler>) -> anyhow::Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("invalid route pattern: {pattern}"))?;
        Ok(Self { regex, handler })
    }

    /// Matches when the pattern matches at the start of `uri`.
    pub fn matches(&self, uri: &str) -> bool {
        self.regex.find(uri).is_some_and(|m| m.start() == 0)
    }
}

/// Dispatches to the handler of the first rule whose pattern matches.
/// Requests no rule matches fall through.
pub struct RouteHandler {
    rules: Vec<RouteRule>,
}

impl RouteHandler {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Handler for RouteHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        let uri = decode_uri(&request.uri);
        match self.rules.iter().find(|rule| rule.matches(&uri)) {
            Some(rule) => rule.handler.handle(request, response).await,
            None => Ok(None),
        }
    }
}
