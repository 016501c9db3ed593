use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};

/// Configuration for the static preview server.
pub struct PreviewConfig {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Build a router that serves files under `root`, falling back to
/// `index.html` for client-side routes.
pub fn build_router(root: impl Into<PathBuf>) -> Router {
    Router::new()
        .fallback(static_handler)
        .with_state(Arc::new(root.into()))
}

/// Map a request path onto `root`, refusing anything that escapes it.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

async fn static_handler(State(root): State<Arc<PathBuf>>, req: Request<Body>) -> impl IntoResponse {
    let path = req.uri().path();

    if let Some(file) = resolve(&root, path)
        && path.trim_start_matches('/') != ""
        && file.is_file()
        && let Ok(content) = tokio::fs::read(&file).await
    {
        let mime = mime_guess::from_path(&file).first_or_octet_stream();
        return ([(header::CONTENT_TYPE, mime.as_ref().to_string())], content).into_response();
    }

    match tokio::fs::read(root.join("index.html")).await {
        Ok(content) => Html(String::from_utf8_lossy(&content).to_string()).into_response(),
        Err(_) => not_found(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "index.html not found").into_response()
}

/// Serve `config.root` until Ctrl+C.
pub async fn start_preview(config: PreviewConfig) -> Result<()> {
    if !config.root.is_dir() {
        anyhow::bail!("Directory does not exist: {}", config.root.display());
    }

    let app = build_router(config.root.clone());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!(
        "Serving {} at http://{}",
        config.root.display(),
        local_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; serve until killed.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        dir
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_serves_index_at_root() {
        let dir = site();
        let (status, _, body) = get(build_router(dir.path()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("hello"));
    }

    #[tokio::test]
    async fn test_serves_asset_with_mime() {
        let dir = site();
        let (status, content_type, body) = get(build_router(dir.path()), "/assets/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().contains("javascript"));
        assert_eq!(body, "console.log(1)");
    }

    #[tokio::test]
    async fn test_spa_fallback() {
        let dir = site();
        let (status, _, body) = get(build_router(dir.path()), "/some/client/route").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("hello"));
    }

    #[tokio::test]
    async fn test_missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _, _) = get(build_router(dir.path()), "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let root = Path::new("/srv/site");
        assert_eq!(resolve(root, "/a/b.css"), Some(PathBuf::from("/srv/site/a/b.css")));
        assert_eq!(resolve(root, "/../etc/passwd"), None);
    }

    #[test]
    fn test_preview_config_default() {
        let config = PreviewConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
    }
}
