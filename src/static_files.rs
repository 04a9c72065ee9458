use std::path::{Component, Path, PathBuf};

const INDEX_DOCUMENT: &str = "index.html";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("map") => "application/json",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Maps a request path onto a file under `root`:
/// directory → `index.html`, missing → `<path>.html`, still missing → root
/// `index.html` so client-side routing can take over. `None` means 404.
pub fn resolve_static_file(root: &Path, request_path: &str) -> Option<PathBuf> {
    let spa_fallback = || {
        let index = root.join(INDEX_DOCUMENT);
        index.is_file().then_some(index)
    };

    let Some(relative) = sanitize_request_path(request_path) else {
        return spa_fallback();
    };

    let mut candidate = root.join(&relative);
    if candidate.is_dir() {
        candidate = candidate.join(INDEX_DOCUMENT);
    }
    if candidate.is_file() {
        return Some(candidate);
    }

    let mut with_html = candidate.into_os_string();
    with_html.push(".html");
    let with_html = PathBuf::from(with_html);
    if with_html.is_file() {
        return Some(with_html);
    }

    spa_fallback()
}

/// Percent-decodes the path and keeps only normal components. Paths that try
/// to climb out of the root are rejected.
fn sanitize_request_path(request_path: &str) -> Option<PathBuf> {
    let path_only = request_path.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(path_only).ok()?;
    let mut relative = PathBuf::new();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}
