use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str()) || *name == header::TRANSFER_ENCODING
}

fn upstream_host_header(upstream_base: &str) -> Option<HeaderValue> {
    let url = url::Url::parse(upstream_base).ok()?;
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&authority).ok()
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Backend unavailable").into_response()
}

/// Relays `request` to `upstream_base` and streams the upstream response back
/// verbatim. Method, path, query and headers are preserved except for `Host`,
/// which names the upstream. Transport failures become 502.
pub async fn proxy_request<F>(
    client: &reqwest::Client,
    upstream_base: &str,
    request: Request,
    log: F,
) -> Response
where
    F: Fn(&str),
{
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let target = format!("{}{}", upstream_base.trim_end_matches('/'), path_and_query);

    let (parts, body) = request.into_parts();
    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop(name) && *name != header::HOST {
            headers.append(name.clone(), value.clone());
        }
    }
    if let Some(host) = upstream_host_header(upstream_base) {
        headers.insert(header::HOST, host);
    }

    let mut builder = client.request(parts.method, &target).headers(headers);
    if !body.is_end_stream() {
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = match builder.send().await {
        Ok(response) => response,
        Err(error) => {
            log(&format!("proxy request failed: target={target}, error={error}"));
            return bad_gateway();
        }
    };

    let mut response_builder = Response::builder().status(upstream.status());
    if let Some(response_headers) = response_builder.headers_mut() {
        for (name, value) in upstream.headers().iter() {
            if !is_hop_by_hop(name) {
                response_headers.append(name.clone(), value.clone());
            }
        }
    }

    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    match response_builder.body(Body::from_stream(stream)) {
        Ok(response) => response,
        Err(error) => {
            log(&format!("proxy response build failed: target={target}, error={error}"));
            bad_gateway()
        }
    }
}

/// Client used for proxying: no redirect following, so upstream 3xx
/// responses reach the renderer untouched.
pub fn build_proxy_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|error| format!("Failed to build proxy HTTP client: {error}"))
}
