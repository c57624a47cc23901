use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::handlers::{Handler, Interrupt, decode_uri};
use crate::http::response::{Body, StatusCode};
use crate::http::writer::http_date;
use crate::http::{Request, Response, mime};

/// Serves files below `root` for request paths starting with `location`.
pub struct StaticHandler {
    location: String,
    root: PathBuf,
}

impl StaticHandler {
    pub fn new(location: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            root: root.into(),
        }
    }

    /// Maps the part of the path after `location` onto the filesystem.
    /// Parent-directory segments are refused.
    pub fn resolve(&self, rest: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in rest.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                s => path.push(s),
            }
        }
        Some(path)
    }
}

async fn open(path: &Path) -> io::Result<(File, Metadata)> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::from(io::ErrorKind::NotFound));
    }
    let file = tokio::fs::File::open(path).await?.into_std().await;
    Ok((file, meta))
}

#[async_trait]
impl Handler for StaticHandler {
    async fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> anyhow::Result<Option<Interrupt>> {
        let path = decode_uri(request.path());
        let Some(rest) = path.strip_prefix(self.location.as_str()) else {
            return Ok(None);
        };
        let Some(file_path) = self.resolve(rest) else {
            response.reply(StatusCode::NotFound, "text/plain", "404 Not Found");
            return Ok(Some(Interrupt::Done));
        };

        let (file, meta) = match open(&file_path).await {
            Ok(found) => found,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %file_path.display(), "Static file not found");
                response.reply(StatusCode::NotFound, "text/plain", "404 Not Found");
                return Ok(Some(Interrupt::Done));
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                response.reply(StatusCode::Forbidden, "text/plain", "403 Forbidden");
                return Ok(Some(Interrupt::Done));
            }
            Err(e) => return Err(e.into()),
        };

        let length = meta.len();
        response.set_status(StatusCode::Ok);
        response
            .headers
            .set("Content-Type", mime::from_path(&file_path));
        response.headers.set("Content-Length", length.to_string());
        if let Ok(modified) = meta.modified() {
            let secs = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            response
                .headers
                .set("Last-Modified", http_date(DateTime::<Utc>::from(modified)));
            response
                .headers
                .set("ETag", format!("\"{secs:x}-{length:x}\""));
        }
        response.set_body(Body::from_file(file, 0, length));
        Ok(Some(Interrupt::Done))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_below_root() {
        let handler = StaticHandler::new("/static/", "/srv/www");
        assert_eq!(
            handler.resolve("css/site.css"),
            Some(PathBuf::from("/srv/www/css/site.css"))
        );
        assert_eq!(
            handler.resolve("./a//b"),
            Some(PathBuf::from("/srv/www/a/b"))
        );
        assert_eq!(handler.resolve("../etc/passwd"), None);
        assert_eq!(handler.resolve("a/../../b"), None);
    }
}
