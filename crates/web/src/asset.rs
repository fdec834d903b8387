//! Static files served from folders below the working directory.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use http::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use http::{HeaderValue, StatusCode};
use mime::Mime;
use tracing::debug;

use crate::HandlerContext;
use crate::handler::Handler;

/// Serves `"." + request path`, as long as it resolves to a file inside
/// `"." + folder`. Anything else is a 404.
#[derive(Debug, Clone)]
pub(crate) struct AssetHandler {
    folder: PathBuf,
}

impl AssetHandler {
    pub(crate) fn new(folder: &str) -> Self {
        Self { folder: local_path(folder) }
    }
}

#[async_trait]
impl Handler for AssetHandler {
    async fn handle(&self, ctx: &mut HandlerContext<'_>) {
        let requested = local_path(ctx.path());

        match self.resolve(&requested).await {
            Some((path, modified)) => serve(ctx, &path, modified).await,
            None => not_found(ctx),
        }
    }
}

impl AssetHandler {
    async fn resolve(&self, requested: &Path) -> Option<(PathBuf, SystemTime)> {
        let folder = tokio::fs::canonicalize(&self.folder).await.ok()?;
        let path = tokio::fs::canonicalize(requested).await.ok()?;
        if !path.starts_with(&folder) {
            debug!(path = %requested.display(), "asset outside its folder");
            return None;
        }

        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        Some((path, metadata.modified().ok()?))
    }
}

async fn serve(ctx: &mut HandlerContext<'_>, path: &Path, modified: SystemTime) {
    if not_modified_since(ctx, modified) {
        ctx.set_status(StatusCode::NOT_MODIFIED);
        return;
    }

    let Ok(content) = tokio::fs::read(path).await else {
        not_found(ctx);
        return;
    };

    if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
        ctx.set_header(LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(content_type(path).as_ref()) {
        ctx.set_header(CONTENT_TYPE, value);
    }

    ctx.set_status(StatusCode::OK);
    if !ctx.is_head() {
        ctx.write(&content);
    }
}

/// HTTP dates have whole-second precision, so the file's sub-second part is
/// ignored.
fn not_modified_since(ctx: &HandlerContext<'_>, modified: SystemTime) -> bool {
    let Some(since) = ctx
        .request()
        .headers()
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
    else {
        return false;
    };

    let seconds = |t: SystemTime| t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    seconds(modified) <= seconds(since)
}

fn not_found(ctx: &mut HandlerContext<'_>) {
    ctx.set_status(StatusCode::NOT_FOUND);
    ctx.write_str("404 page not found\n");
}

fn local_path(path: &str) -> PathBuf {
    PathBuf::from(format!(".{path}"))
}

fn content_type(path: &Path) -> Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("./css/site.css")), mime::TEXT_CSS);
        assert_eq!(content_type(Path::new("./css/SITE.CSS")), mime::TEXT_CSS);
        assert_eq!(content_type(Path::new("./img/logo.png")), mime::IMAGE_PNG);
        assert_eq!(content_type(Path::new("./favicon.ico")).as_ref(), "image/x-icon");
        assert_eq!(content_type(Path::new("./blob")), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("/css/site.css"), PathBuf::from("./css/site.css"));
        assert_eq!(local_path("/css/"), PathBuf::from("./css/"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("css");
        std::fs::create_dir(&assets).unwrap();
        std::fs::write(assets.join("site.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "no").unwrap();

        let handler = AssetHandler { folder: assets.clone() };
        assert!(handler.resolve(&assets.join("site.css")).await.is_some());
        assert!(handler.resolve(&assets.join("../secret.txt")).await.is_none());
        assert!(handler.resolve(&assets.join("missing.css")).await.is_none());
        assert!(handler.resolve(&assets).await.is_none());
    }
}
