//! Request handlers.
//!
//! A handler gets each request together with its response and may return an
//! [`Interrupt`] to stop the chain it runs in. Handler graphs are described
//! declaratively with [`HandlerSpec`] and built once at startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::http::{Request, Response};

pub mod access_log;
pub mod app;
pub mod chain;
pub mod respond;
pub mod rewrite;
pub mod route;
pub mod static_files;

pub use access_log::AccessLogHandler;
pub use app::{AppBody, AppHandler, AppRegistry, Application, Environ, StartResponse};
pub use chain::ChainHandler;
pub use respond::RespondHandler;
pub use rewrite::{RewriteHandler, RewriteRule};
pub use route::{RouteHandler, RouteRule};
pub use static_files::StaticHandler;

/// Stops a chain early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The response is complete; skip the remaining handlers.
    Done,
    /// Like `Done`, and close the connection after the response.
    Close,
}

/// Per-request processing step.
///
/// The connection runs at most one `handle` call at a time; handlers are
/// shared across connections of a worker and must be `Sync`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>>;
}

/// Declarative handler description, as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerSpec {
    Chain {
        handlers: Vec<HandlerSpec>,
    },
    Static {
        location: String,
        root: PathBuf,
    },
    Rewrite {
        rules: Vec<RewriteRuleSpec>,
    },
    Route {
        rules: Vec<RouteRuleSpec>,
    },
    AccessLog {
        #[serde(default = "default_access_path")]
        path: String,
        #[serde(default = "default_access_format")]
        format: String,
    },
    App {
        name: String,
    },
    Respond {
        #[serde(default = "default_status")]
        status: u16,
        #[serde(default)]
        body: String,
        #[serde(default = "default_content_type")]
        content_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RewriteRuleSpec {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteRuleSpec {
    pub pattern: String,
    pub handler: HandlerSpec,
}

fn default_access_path() -> String {
    "-".to_string()
}

fn default_access_format() -> String {
    access_log::DEFAULT_FORMAT.to_string()
}

fn default_status() -> u16 {
    200
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

impl Default for HandlerSpec {
    fn default() -> Self {
        HandlerSpec::Respond {
            status: 200,
            body: "Hello from hearth\n".to_string(),
            content_type: default_content_type(),
        }
    }
}

impl HandlerSpec {
    /// Builds the concrete handler graph.
    pub fn build(&self, apps: &AppRegistry) -> anyhow::Result<Arc<dyn Handler>> {
        let handler: Arc<dyn Handler> = match self {
            HandlerSpec::Chain { handlers } => {
                let handlers = handlers
                    .iter()
                    .map(|spec| spec.build(apps))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Arc::new(ChainHandler::new(handlers))
            }
            HandlerSpec::Static { location, root } => {
                Arc::new(StaticHandler::new(location.clone(), root.clone()))
            }
            HandlerSpec::Rewrite { rules } => {
                let rules = rules
                    .iter()
                    .map(|r| RewriteRule::new(&r.pattern, &r.replacement))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Arc::new(RewriteHandler::new(rules))
            }
            HandlerSpec::Route { rules } => {
                let rules = rules
                    .iter()
                    .map(|r| RouteRule::new(&r.pattern, r.handler.build(apps)?))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Arc::new(RouteHandler::new(rules))
            }
            HandlerSpec::AccessLog { path, format } => {
                Arc::new(AccessLogHandler::open(path, format)?)
            }
            HandlerSpec::App { name } => {
                let app = apps
                    .get(name)
                    .with_context(|| format!("unknown application: {name}"))?;
                Arc::new(AppHandler::new(app))
            }
            HandlerSpec::Respond {
                status,
                body,
                content_type,
            } => Arc::new(RespondHandler::new(*status, body, content_type)?),
        };
        Ok(handler)
    }
}

/// Percent-decodes a request target for matching.
pub(crate) fn decode_uri(uri: &str) -> String {
    percent_decode_str(uri).decode_utf8_lossy().into_owned()
}
