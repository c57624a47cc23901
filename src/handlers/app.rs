//! Bridge to synchronous application callables.
//!
//! The callable gets an [`Environ`] built from the request and a
//! [`StartResponse`] it uses to set status and headers. Its return value
//! becomes the response body. It runs on the blocking pool so it never
//! stalls other connections of the worker.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::error;
use url::Url;

use crate::handlers::{Handler, Interrupt};
use crate::http::body::BodyKind;
use crate::http::response::{Body, SERVER_NAME};
use crate::http::{Method, Request, Response, Status};

/// Base for resolving origin-form request targets.
const BASE_URL: &str = "http://localhost/";

/// Synchronous application entry point.
pub trait Application: Send + Sync + 'static {
    fn call(&self, environ: &mut Environ, start: &mut StartResponse) -> anyhow::Result<AppBody>;
}

impl<F> Application for F
where
    F: Fn(&mut Environ, &mut StartResponse) -> anyhow::Result<AppBody> + Send + Sync + 'static,
{
    fn call(&self, environ: &mut Environ, start: &mut StartResponse) -> anyhow::Result<AppBody> {
        self(environ, start)
    }
}

/// What an application returns.
#[derive(Debug)]
pub enum AppBody {
    Chunks(Vec<Bytes>),
    /// File region; `length` of `None` means "to the end of the file".
    File {
        file: File,
        offset: u64,
        length: Option<u64>,
    },
}

impl AppBody {
    pub fn from_static(data: &'static [u8]) -> Self {
        AppBody::Chunks(vec![Bytes::from_static(data)])
    }
}

/// Applications available to `app` handlers, by name.
#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: HashMap<String, Arc<dyn Application>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, app: impl Application) -> &mut Self {
        self.apps.insert(name.into(), Arc::new(app));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Application>> {
        self.apps.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }
}

/// Lines written here go to the error log.
#[derive(Debug, Default)]
pub struct ErrorStream {
    pending: Vec<u8>,
}

impl ErrorStream {
    fn emit(&mut self, upto: usize) {
        let line: Vec<u8> = self.pending.drain(..upto).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if !text.is_empty() {
            error!(target: "hearth::app", "{text}");
        }
    }
}

impl Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            self.emit(pos + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let len = self.pending.len();
        self.emit(len);
        Ok(())
    }
}

impl Drop for ErrorStream {
    fn drop(&mut self) {
        let len = self.pending.len();
        if len > 0 {
            self.emit(len);
        }
    }
}

/// Request environment handed to an application.
#[derive(Debug)]
pub struct Environ {
    vars: BTreeMap<String, String>,
    pub input: Cursor<Bytes>,
    pub errors: ErrorStream,
}

impl Environ {
    pub fn new(vars: BTreeMap<String, String>, input: Bytes) -> Self {
        Self {
            vars,
            input: Cursor::new(input),
            errors: ErrorStream::default(),
        }
    }

    pub fn from_request(request: &Request<'_>, input: Bytes) -> Self {
        let (path, query) = split_target(&request.uri);
        let mut vars = BTreeMap::new();
        vars.insert("REQUEST_METHOD".to_string(), request.method.to_string());
        vars.insert("SCRIPT_NAME".to_string(), String::new());
        vars.insert("PATH_INFO".to_string(), path);
        vars.insert("QUERY_STRING".to_string(), query);
        vars.insert("SERVER_NAME".to_string(), request.local_addr.ip().to_string());
        vars.insert("SERVER_PORT".to_string(), request.local_addr.port().to_string());
        vars.insert("SERVER_PROTOCOL".to_string(), request.version.to_string());
        vars.insert("SERVER_SOFTWARE".to_string(), SERVER_NAME.to_string());
        vars.insert("REMOTE_ADDR".to_string(), request.peer_addr.ip().to_string());
        vars.insert("REMOTE_PORT".to_string(), request.peer_addr.port().to_string());
        vars.insert("url_scheme".to_string(), "http".to_string());

        for (name, value) in request.headers.iter() {
            let key = match name.to_ascii_uppercase().replace('-', "_") {
                k if k == "CONTENT_TYPE" || k == "CONTENT_LENGTH" => k,
                k => format!("HTTP_{k}"),
            };
            vars.entry(key)
                .and_modify(|v: &mut String| {
                    v.push(',');
                    v.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self::new(vars, input)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Splits a request target into its decoded path and raw query string.
fn split_target(uri: &str) -> (String, String) {
    let decode = |p: &str| percent_decode_str(p).decode_utf8_lossy().into_owned();
    match Url::parse(BASE_URL).and_then(|base| base.join(uri)) {
        Ok(url) => (decode(url.path()), url.query().unwrap_or("").to_string()),
        Err(_) => {
            let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
            (decode(path), query.to_string())
        }
    }
}

/// Collects status, headers and early body bytes from an application.
#[derive(Debug, Default)]
pub struct StartResponse {
    status: Option<Status>,
    headers: Vec<(String, String)>,
    written: Vec<Bytes>,
}

impl StartResponse {
    /// Sets status and headers and returns a writer for body bytes that go
    /// out ahead of the returned body.
    ///
    /// A second call fails unless `replace` is set, as when reporting an
    /// error after a normal start. Headers are never flushed while the
    /// application runs, so replacing is always possible.
    pub fn call(
        &mut self,
        status: &str,
        headers: Vec<(String, String)>,
        replace: bool,
    ) -> anyhow::Result<BodyWriter<'_>> {
        if self.status.is_some() && !replace {
            bail!("start_response called twice without replace");
        }
        let parsed =
            Status::parse(status).with_context(|| format!("invalid status line: {status}"))?;
        self.status = Some(parsed);
        self.headers = headers;
        Ok(BodyWriter {
            parts: &mut self.written,
        })
    }

    pub fn is_started(&self) -> bool {
        self.status.is_some()
    }
}

/// Writer returned by [`StartResponse::call`].
pub struct BodyWriter<'a> {
    parts: &'a mut Vec<Bytes>,
}

impl Write for BodyWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.parts.push(Bytes::copy_from_slice(buf));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Whether the bridge should collect the body before calling the app.
///
/// A read-until-close body only exists when the client will not send another
/// request on the connection; a keep-alive or bodiless request has none.
fn reads_body(request: &Request<'_>) -> bool {
    match request.body.kind() {
        BodyKind::Eof => {
            request.should_close()
                && matches!(request.method, Method::POST | Method::PUT | Method::PATCH)
        }
        _ => true,
    }
}

/// Runs an [`Application`] for every request.
pub struct AppHandler {
    app: Arc<dyn Application>,
}

impl AppHandler {
    pub fn new(app: Arc<dyn Application>) -> Self {
        Self { app }
    }
}

#[async_trait]
impl Handler for AppHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        let input = if reads_body(request) {
            request.body.read_to_end().await?
        } else {
            Bytes::new()
        };
        let mut environ = Environ::from_request(request, input);
        let app = Arc::clone(&self.app);

        let (start, result) = tokio::task::spawn_blocking(move || {
            let mut start = StartResponse::default();
            let result = app.call(&mut environ, &mut start);
            (start, result)
        })
        .await
        .context("application panicked")?;

        let body = result?;
        let status = start
            .status
            .context("application returned without starting the response")?;
        response.set_status(status);
        response.headers.extend(start.headers);

        match body {
            AppBody::Chunks(chunks) => {
                let mut parts = start.written;
                parts.extend(chunks);
                response.set_body(Body::from_parts(parts));
            }
            AppBody::File {
                file,
                offset,
                length,
            } => {
                let length = match length {
                    Some(n) => n,
                    None => file.metadata()?.len().saturating_sub(offset),
                };
                for part in &start.written {
                    response.write(part).await?;
                }
                response.set_body(Body::from_file(file, offset, length));
            }
        }
        Ok(None)
    }
}
