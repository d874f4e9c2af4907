//! Player-facing proxy routes.
//!
//! - `/proxy/m3u8/{encoded url}`: rewritten playlists
//! - `/proxy/seg/{task id}/{filename}/{encoded url}`: segments and init sections
//! - `/proxy/key/{task id}/{filename}/{encoded url}`: encryption keys
//!
//! Segment and key requests are served from the cache when the file is
//! complete and streamed from the origin otherwise. They never start fetches.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::TryStreamExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::proxy::proxy_base_for_host;
use crate::utils::url::{is_safe_component, parse_source_url};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Headers that describe one connection and are not forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn router() -> Router<AppState> {
    // Path captures arrive percent-decoded, so `url` is the absolute source URL.
    Router::new()
        .route("/m3u8/{*url}", get(playlist))
        .route("/seg/{task_id}/{filename}/{*url}", get(cached_file))
        .route("/key/{task_id}/{filename}/{*url}", get(cached_file))
}

async fn playlist(
    State(state): State<AppState>,
    Path(origin_url): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let proxy_base = proxy_base_for_host(host, state.proxy.default_proxy_base());

    let content = state
        .proxy
        .playlist(&origin_url, &proxy_base)
        .await
        .map_err(|e| {
            warn!(url = %origin_url, error = %e, "Failed to proxy playlist");
            ApiError::from(e)
        })?;

    Ok((
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        content,
    )
        .into_response())
}

async fn cached_file(
    State(state): State<AppState>,
    Path((task_id, filename, origin_url)): Path<(String, String, String)>,
    req: Request,
) -> ApiResult<Response> {
    if !is_safe_component(&task_id) || !is_safe_component(&filename) {
        return Err(ApiError::validation("Invalid path structure"));
    }

    let cached = state
        .manager
        .cache()
        .complete_path(&task_id, &filename)
        .await
        .unwrap_or_else(|e| {
            warn!(task_id = %task_id, filename = %filename, error = %e, "Cache lookup failed");
            None
        });

    if let Some(path) = cached {
        debug!(task_id = %task_id, filename = %filename, "Serving from cache");
        return serve_cached(path, req).await;
    }

    parse_source_url(&origin_url)?;
    pass_through(&state, &origin_url, req.headers()).await
}

async fn serve_cached(path: std::path::PathBuf, req: Request) -> ApiResult<Response> {
    match ServeFile::new(path).try_call(req).await {
        Ok(response) => {
            let mut response = response.into_response();
            response.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
            Ok(response)
        }
        Err(e) => Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    }
}

/// Stream the origin's response through, keeping its status and headers.
async fn pass_through(state: &AppState, url: &str, request_headers: &HeaderMap) -> ApiResult<Response> {
    let upstream = state
        .proxy
        .upstream()
        .open(url, request_headers.get(header::RANGE))
        .await
        .map_err(|e| {
            warn!(url = %url, error = %e, "Pass-through request failed");
            ApiError::bad_gateway("Failed to fetch upstream")
        })?;

    let status = upstream.status();
    debug!(url = %url, status = status.as_u16(), "Passing through upstream response");

    let mut out_headers = HeaderMap::with_capacity(upstream.headers().len() + 1);
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP.contains(name) {
            out_headers.append(name.clone(), value.clone());
        }
    }
    out_headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    let body = Body::from_stream(stream);

    let mut response = (status, body).into_response();
    *response.headers_mut() = out_headers;
    Ok(response)
}
