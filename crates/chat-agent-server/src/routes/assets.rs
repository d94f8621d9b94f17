use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::state::AppState;

/// Source of the static chat UI
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Response for a request path, `404` when there is no such asset
    async fn fetch(&self, path: &str) -> Response;
}

/// Serves files below a directory on disk
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File for a raw request path. The path is percent-decoded before it is
    /// checked, so encoded `..` segments are rejected like plain ones.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(path).ok()?;
        let mut relative = decoded.trim_start_matches('/').to_string();
        if relative.is_empty() || relative.ends_with('/') {
            relative.push_str("index.html");
        }

        let relative = Path::new(&relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

#[async_trait]
impl AssetFetcher for DirAssets {
    async fn fetch(&self, path: &str) -> Response {
        let Some(file_path) = self.resolve(path) else {
            return not_found();
        };

        // Symlinks may still point outside the root
        let (Ok(canonical), Ok(root)) = (
            tokio::fs::canonicalize(&file_path).await,
            tokio::fs::canonicalize(&self.root).await,
        ) else {
            return not_found();
        };
        if !canonical.starts_with(&root) {
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }

        match tokio::fs::read(&canonical).await {
            Ok(contents) => {
                let mime = mime_guess::from_path(&canonical)
                    .first_or_octet_stream()
                    .to_string();
                ([(header::CONTENT_TYPE, mime)], contents).into_response()
            }
            Err(_) => not_found(),
        }
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |accept| accept.contains("text/html"))
}

/// Serve the requested asset. Browsers asking for a page that does not exist get
/// `index.html` so client side routing can take over.
async fn serve_asset(State(state): State<AppState>, request: Request) -> Response {
    let Some(assets) = state.assets.as_ref() else {
        return not_found();
    };

    let path = request.uri().path();
    let response = assets.fetch(path).await;
    if response.status() == StatusCode::NOT_FOUND && accepts_html(request.headers()) {
        debug!("no asset at {}, serving index.html", path);
        return assets.fetch("/index.html").await;
    }
    response
}

pub fn routes(state: AppState) -> Router {
    Router::new().fallback(serve_asset).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::agents::tests::test_registry;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Only knows `/index.html`, and remembers every path it was asked for
    #[derive(Default)]
    struct RecordingAssets {
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssetFetcher for RecordingAssets {
        async fn fetch(&self, path: &str) -> Response {
            self.fetched.lock().unwrap().push(path.to_string());
            if path == "/index.html" {
                ([(header::CONTENT_TYPE, "text/html")], "<html>chat</html>").into_response()
            } else {
                not_found()
            }
        }
    }

    fn get(path: &str, accept: &str) -> Request {
        Request::builder()
            .uri(path)
            .header(header::ACCEPT, accept)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_html_requests_fall_back_to_index() {
        let assets = Arc::new(RecordingAssets::default());
        let state = AppState::new(test_registry(vec![]), Some(assets.clone() as Arc<dyn AssetFetcher>));

        let response = routes(state)
            .oneshot(get("/settings/profile", "text/html,application/xhtml+xml"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>chat</html>");
        assert_eq!(
            *assets.fetched.lock().unwrap(),
            vec!["/settings/profile", "/index.html"]
        );
    }

    #[tokio::test]
    async fn test_json_requests_do_not_fall_back() {
        let assets = Arc::new(RecordingAssets::default());
        let state = AppState::new(test_registry(vec![]), Some(assets.clone() as Arc<dyn AssetFetcher>));

        let response = routes(state)
            .oneshot(get("/settings/profile", "application/json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(*assets.fetched.lock().unwrap(), vec!["/settings/profile"]);
    }

    #[tokio::test]
    async fn test_no_asset_layer() {
        let state = AppState::new(test_registry(vec![]), None);
        let response = routes(state)
            .oneshot(get("/index.html", "text/html"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Not found");
    }

    #[tokio::test]
    async fn test_dir_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        let assets = DirAssets::new(dir.path());

        let response = assets.fetch("/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.contains("javascript"));
        assert_eq!(body_text(response).await, "console.log(1)");

        let response = assets.fetch("/").await;
        assert_eq!(body_text(response).await, "<html>home</html>");

        assert_eq!(assets.fetch("/missing.css").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            assets.fetch("/../etc/passwd").await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_dir_assets_decode_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("my page.html"), "<html>spaced</html>").unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::fs::write(dir.path().join("inner").join("a.txt"), "a").unwrap();
        let assets = DirAssets::new(dir.path().join("inner"));

        let spaced = DirAssets::new(dir.path());
        let response = spaced.fetch("/my%20page.html").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>spaced</html>");

        assert_eq!(assets.fetch("/a.txt").await.status(), StatusCode::OK);
        assert_eq!(
            assets.fetch("/%2e%2e/my%20page.html").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(assets.fetch("/%FF.txt").await.status(), StatusCode::NOT_FOUND);
    }
}
