//! PyPI-compatible index over a directory of distributions.
//!
//! Serves the PEP 503 "simple" API for installers and accepts legacy
//! `file_upload` posts so twine-like uploaders can publish to it.

use crate::core::distribution::{normalize_name, DistFile};
use crate::utils::error::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

type HandlerResult = std::result::Result<Response, (StatusCode, String)>;

#[derive(Clone)]
struct IndexState {
    dist_dir: Arc<PathBuf>,
}

impl IndexState {
    async fn distributions(&self) -> std::io::Result<Vec<DistFile>> {
        let mut dists = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dist_dir.as_ref()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(dist) = DistFile::parse(&entry.file_name().to_string_lossy()) {
                dists.push(dist);
            }
        }
        dists.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(dists)
    }
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Index server error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, links: impl Iterator<Item = (String, String)>) -> Html<String> {
    let mut body = format!(
        "<!DOCTYPE html>\n<html>\n  <head>\n    <meta name=\"pypi:repository-version\" content=\"1.0\">\n    <title>{}</title>\n  </head>\n  <body>\n",
        escape_html(title)
    );
    for (href, text) in links {
        body.push_str(&format!(
            "    <a href=\"{}\">{}</a><br/>\n",
            escape_html(&href),
            escape_html(&text)
        ));
    }
    body.push_str("  </body>\n</html>\n");
    Html(body)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_projects(State(state): State<IndexState>) -> HandlerResult {
    let projects: BTreeSet<String> = state
        .distributions()
        .await
        .map_err(internal)?
        .into_iter()
        .map(|d| d.project)
        .collect();
    Ok(page(
        "Simple index",
        projects
            .into_iter()
            .map(|p| (format!("/simple/{}/", p), p)),
    )
    .into_response())
}

async fn project_page(
    State(state): State<IndexState>,
    Path(project): Path<String>,
) -> HandlerResult {
    let normalized = normalize_name(&project);
    if normalized != project {
        return Ok(moved(&normalized));
    }
    let files: BTreeMap<String, DistFile> = state
        .distributions()
        .await
        .map_err(internal)?
        .into_iter()
        .filter(|d| d.project == normalized)
        .map(|d| (d.filename.clone(), d))
        .collect();
    if files.is_empty() {
        return Err((StatusCode::NOT_FOUND, format!("Project {} not found", normalized)));
    }
    Ok(page(
        &format!("Links for {}", normalized),
        files
            .into_keys()
            .map(|f| (format!("/packages/{}", f), f)),
    )
    .into_response())
}

/// 301 到正規化後的專案頁面
fn moved(project: &str) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, format!("/simple/{}/", project))],
    )
        .into_response()
}

async fn project_redirect(Path(project): Path<String>) -> Response {
    moved(&normalize_name(&project))
}

async fn download(
    State(state): State<IndexState>,
    Path(filename): Path<String>,
    request: Request,
) -> HandlerResult {
    if DistFile::parse(&filename).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("{} not found", filename)));
    }
    let response = ServeFile::new(state.dist_dir.join(&filename))
        .oneshot(request)
        .await
        .map_err(internal)?;
    Ok(response.into_response())
}

/// 舊版上傳 API：`:action=file_upload` 加上 `content` 檔案欄位
async fn upload(State(state): State<IndexState>, mut multipart: Multipart) -> HandlerResult {
    let mut action: Option<String> = None;
    let mut content: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            ":action" => {
                action = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
                );
            }
            "content" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                content = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    if let Some(action) = action.filter(|a| a != "file_upload") {
        return Err((StatusCode::BAD_REQUEST, format!("Unsupported action: {}", action)));
    }
    let (filename, bytes) =
        content.ok_or_else(|| (StatusCode::BAD_REQUEST, "Missing content field".to_string()))?;
    let dist = DistFile::parse(&filename).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid distribution filename: {}", filename),
        )
    })?;

    // 先寫入暫存檔，再以不覆蓋的方式改名；已存在時回 409
    let size = bytes.len();
    let dist_dir = Arc::clone(&state.dist_dir);
    let target = dist_dir.join(&dist.filename);
    let stored = tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
        let mut partial = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(dist_dir.as_path())?;
        partial.write_all(&bytes)?;
        match partial.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        }
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;
    if !stored {
        return Err((
            StatusCode::CONFLICT,
            format!("File {} already exists", dist.filename),
        ));
    }
    tracing::info!("Stored {} ({} bytes)", dist.filename, size);

    Ok((StatusCode::OK, "OK").into_response())
}

pub fn router(dist_dir: PathBuf) -> Router {
    let state = IndexState {
        dist_dir: Arc::new(dist_dir),
    };
    Router::new()
        .route("/health", get(health))
        .route("/", post(upload))
        .route("/simple/", get(list_projects))
        .route("/simple/:project/", get(project_page))
        .route("/simple/:project", get(project_redirect))
        .route("/packages/:filename", get(download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, dist_dir: PathBuf, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    std::fs::create_dir_all(&dist_dir)?;
    let addr = listener.local_addr()?;
    tracing::info!("Serving {} on http://{}", dist_dir.display(), addr);
    axum::serve(listener, router(dist_dir))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Index server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("a<b>&\"c\"'d'"),
            "a&lt;b&gt;&amp;&quot;c&quot;&#x27;d&#x27;"
        );
        assert_eq!(escape_html("demo_pkg-1.0.tar.gz"), "demo_pkg-1.0.tar.gz");
    }

    #[test]
    fn test_page_escapes_links() {
        let Html(body) = page(
            "Links for x",
            std::iter::once((
                "/packages/a<b>-1.0.tar.gz".to_string(),
                "a<b>-1.0.tar.gz".to_string(),
            )),
        );
        assert!(body.contains("href=\"/packages/a&lt;b&gt;-1.0.tar.gz\""));
        assert!(!body.contains("<b>"));
    }
}
