//! Recording archive
//!
//! Files are served by tower-http's `ServeDir`. A request for a directory
//! below the archive root falls through to a plain HTML index of it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tower_http::services::ServeDir;

/// Characters left as-is in one path segment of a link
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
struct ArchiveState {
    dir: Arc<PathBuf>,
    prefix: Arc<str>,
}

/// Serve `dir`, mounted at `prefix`
pub fn service(dir: PathBuf, prefix: String) -> ServeDir<MethodRouter> {
    let prefix: String = prefix
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", utf8_percent_encode(s, PATH_SEGMENT)))
        .collect();
    let state = ArchiveState {
        dir: Arc::new(dir.clone()),
        prefix: prefix.into(),
    };

    ServeDir::new(dir).fallback(get(list_directory).with_state(state))
}

async fn list_directory(State(state): State<ArchiveState>, uri: Uri) -> Response {
    let Some(segments) = path_segments(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut dir = state.dir.to_path_buf();
    let mut href_base = state.prefix.to_string();
    for segment in &segments {
        dir.push(segment);
        href_base.push('/');
        href_base.extend(utf8_percent_encode(segment, PATH_SEGMENT));
    }

    match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    match read_listing(&dir).await {
        Ok(names) => Html(render_listing(&href_base, &names)).into_response(),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot list archive");
            (StatusCode::INTERNAL_SERVER_ERROR, "cannot list archive\n").into_response()
        }
    }
}

/// Decoded segments of a request path below the archive root
///
/// `None` for paths that would leave the root or name hidden entries.
fn path_segments(path: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    for raw in path.split('/').filter(|s| !s.is_empty()) {
        let segment = percent_decode_str(raw).decode_utf8().ok()?;
        if segment.starts_with('.') || segment.contains(['/', '\\']) {
            return None;
        }
        segments.push(segment.into_owned());
    }
    Some(segments)
}

/// Sorted entry names of `dir`, directories with a trailing `/`
pub async fn read_listing(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// HTML index linking every entry under `href_base`
///
/// `href_base` must already be URL-encoded.
pub fn render_listing(href_base: &str, names: &[String]) -> String {
    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for name in names {
        let (stem, slash) = match name.strip_suffix('/') {
            Some(stem) => (stem, "/"),
            None => (name.as_str(), ""),
        };
        html.push_str(&format!(
            "<a href=\"{}/{}{}\">{}</a>\n",
            href_base,
            utf8_percent_encode(stem, PATH_SEGMENT),
            slash,
            htmlescape::encode_minimal(name)
        ));
    }
    html.push_str("</pre>\n");
    html
}
