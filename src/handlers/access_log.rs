use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::info;

use crate::handlers::{Handler, Interrupt};
use crate::http::{Request, Response};

pub const DEFAULT_FORMAT: &str =
    "{remote_addr} - [{time_local}] \"{request_method} {request_uri}\" {status} {request_time} \"{http_user_agent}\"";

enum Target {
    Tracing,
    File(Mutex<File>),
}

/// Writes one line per request. Never interrupts.
///
/// Place it after the handler that produces the response so `{status}` is
/// known.
pub struct AccessLogHandler {
    target: Target,
    format: String,
}

impl AccessLogHandler {
    /// `path` is `-` for the `access` tracing target, otherwise a file that
    /// is appended to.
    pub fn open(path: &str, format: &str) -> anyhow::Result<Self> {
        let target = if path == "-" {
            Target::Tracing
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open access log {path}"))?;
            Target::File(Mutex::new(file))
        };
        Ok(Self {
            target,
            format: format.to_string(),
        })
    }

    /// Fills the format placeholders for one exchange.
    pub fn render(&self, request: &Request<'_>, response: &Response<'_>) -> String {
        let header = |name: &str| request.header(name).unwrap_or("-").to_string();
        let status = response
            .status()
            .map(|s| s.code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let elapsed = request.received_at.elapsed().as_secs_f64();

        let atoms = [
            ("remote_addr", request.peer_addr.ip().to_string()),
            ("server_addr", request.local_addr.ip().to_string()),
            (
                "time_local",
                chrono::Local::now()
                    .format("%d/%b/%Y:%H:%M:%S %z")
                    .to_string(),
            ),
            ("request_method", request.method.to_string()),
            ("request_uri", request.uri.clone()),
            ("request_time", format!("{elapsed:.6}")),
            ("http_user_agent", header("User-Agent")),
            ("http_referer", header("Referer")),
            ("http_host", header("Host")),
            ("http_x_forwarded_for", header("X-Forwarded-For")),
            ("status", status),
            ("scheme", "http".to_string()),
            ("pid", std::process::id().to_string()),
        ];

        let mut line = self.format.clone();
        for (key, value) in atoms {
            line = line.replace(&format!("{{{key}}}"), &value);
        }
        line
    }
}

#[async_trait]
impl Handler for AccessLogHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        let line = self.render(request, response);
        match &self.target {
            Target::Tracing => info!(target: "access", "{line}"),
            Target::File(file) => {
                let mut file = file
                    .lock()
                    .map_err(|_| anyhow!("access log lock poisoned"))?;
                writeln!(file, "{line}")?;
            }
        }
        Ok(None)
    }
}
