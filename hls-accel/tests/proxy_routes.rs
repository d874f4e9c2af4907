//! HTTP routes driven through `oneshot` against an in-process origin.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use reqwest::header::HeaderMap as UpstreamHeaders;
use tokio::net::TcpListener;
use tower::ServiceExt;

use hls_accel::api::AppState;
use hls_accel::api::routes::create_router;
use hls_accel::database::models::TaskStatus;
use hls_accel::proxy::{ProxyService, UpstreamClient};
use hls_rewrite::{encode_source_url, fingerprint};

use common::Harness;

const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=100000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=1280x720
high/index.m3u8
";

const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-KEY:METHOD=AES-128,URI=\"/keys/k1\"
#EXTINF:4.0,
/seg/seg1.ts
#EXTINF:4.0,
/seg/seg2.ts
#EXTINF:4.0,
/seg/seg3.ts
#EXT-X-ENDLIST
";

async fn segment(Path(name): Path<String>, headers: HeaderMap) -> impl IntoResponse {
    let mut out = HeaderMap::new();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp2t"));
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if headers.contains_key(header::RANGE) {
        out.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 0-3/12"));
        return (StatusCode::PARTIAL_CONTENT, out, "live".to_string());
    }
    (StatusCode::OK, out, format!("live-{name}"))
}

async fn spawn_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/master.m3u8", get(|| async { MASTER }))
        .route("/high/index.m3u8", get(|| async { MEDIA }))
        .route("/low/index.m3u8", get(|| async { MEDIA }))
        .route("/junk.m3u8", get(|| async { "<html>not a playlist</html>" }))
        .route("/seg/{name}", get(segment))
        .route("/keys/k1", get(|| async { "0123456789abcdef" }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestApp {
    h: Harness,
    origin: SocketAddr,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        let h = Harness::new().await;
        let origin = spawn_origin().await;

        let upstream = UpstreamClient::new(UpstreamHeaders::new(), Duration::from_secs(5));
        let proxy = Arc::new(ProxyService::new(
            upstream,
            Arc::clone(&h.manager),
            "http://localhost:8084/proxy",
        ));
        let state = AppState::new(proxy).with_pool(h.pool.clone());
        let router = create_router(state);

        Self { h, origin, router }
    }

    fn origin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.origin, path)
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

mod playlist_routes {
    use super::*;

    #[tokio::test]
    async fn master_playlist_is_rewritten_without_a_task() {
        let app = TestApp::new().await;
        let master = app.origin_url("/master.m3u8");

        let request = Request::builder()
            .uri(format!("/proxy/m3u8/{}", encode_source_url(&master)))
            .header(header::HOST, "player.local:8084")
            .body(Body::empty())
            .unwrap();
        let response = app.send(request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );

        let body = body_string(response).await;
        let high = app.origin_url("/high/index.m3u8");
        assert!(body.contains(&format!(
            "http://player.local:8084/proxy/m3u8/{}",
            encode_source_url(&high)
        )));

        app.h.manager.wait_idle().await;
        assert!(app.h.repo.list_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn variant_playlist_starts_a_task_and_is_stored() {
        let app = TestApp::new().await;
        let variant = app.origin_url("/high/index.m3u8");
        let task_id = fingerprint(&variant);
        let uri = format!("/proxy/m3u8/{}", encode_source_url(&variant));

        let response = app.get(&uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let first = body_string(response).await;
        assert!(first.contains(&format!(
            "http://localhost:8084/proxy/seg/{task_id}/00001.ts/"
        )));
        assert!(first.contains("/proxy/key/"));

        app.h.manager.wait_idle().await;
        assert_eq!(
            app.h.repo.check_exists(&task_id).await.unwrap(),
            Some(TaskStatus::Downloading)
        );
        let submitted = app.h.engine.submitted();
        assert_eq!(submitted.len(), 4);
        let mut segments: Vec<&str> = submitted
            .iter()
            .map(String::as_str)
            .filter(|f| f.ends_with(".ts"))
            .collect();
        segments.sort();
        assert_eq!(segments, vec!["00001.ts", "00002.ts", "00003.ts"]);
        assert_eq!(submitted.iter().filter(|f| f.ends_with(".key")).count(), 1);

        // Served from the store on the next request, with no new dispatch.
        let second = body_string(app.get(&uri).await).await;
        assert_eq!(first, second);
        app.h.manager.wait_idle().await;
        assert_eq!(app.h.engine.submitted().len(), 4);
    }

    #[tokio::test]
    async fn upstream_failures_are_bad_gateway() {
        let app = TestApp::new().await;

        let missing = app.origin_url("/missing.m3u8");
        let response = app
            .get(&format!("/proxy/m3u8/{}", encode_source_url(&missing)))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let junk = app.origin_url("/junk.m3u8");
        let response = app
            .get(&format!("/proxy/m3u8/{}", encode_source_url(&junk)))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn malformed_source_url_is_bad_request() {
        let app = TestApp::new().await;
        let response = app.get("/proxy/m3u8/not%20a%20url").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .get(&format!("/proxy/m3u8/{}", encode_source_url("ftp://host/a.m3u8")))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

mod file_routes {
    use super::*;

    fn seg_uri(task_id: &str, filename: &str, source: &str) -> String {
        format!(
            "/proxy/seg/{task_id}/{filename}/{}",
            encode_source_url(source)
        )
    }

    #[tokio::test]
    async fn complete_file_is_served_from_cache() {
        let app = TestApp::new().await;
        app.h.write_complete("t1", "00001.ts", b"cached-bytes");

        let response = app
            .get(&seg_uri("t1", "00001.ts", &app.origin_url("/seg/seg1.ts")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(body_string(response).await, "cached-bytes");
    }

    #[tokio::test]
    async fn incomplete_file_is_passed_through() {
        let app = TestApp::new().await;
        app.h.write_partial("t1", "00002.ts");

        let response = app
            .get(&seg_uri("t1", "00002.ts", &app.origin_url("/seg/seg2.ts")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp2t"
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(body_string(response).await, "live-seg2.ts");

        // Pass-through never dispatches.
        assert!(app.h.engine.submitted().is_empty());
    }

    #[tokio::test]
    async fn pass_through_forwards_range_and_status() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .uri(seg_uri("t1", "00003.ts", &app.origin_url("/seg/seg3.ts")))
            .header(header::RANGE, "bytes=0-3")
            .body(Body::empty())
            .unwrap();

        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert!(response.headers().get(header::CONTENT_RANGE).is_some());
    }

    #[tokio::test]
    async fn upstream_error_status_is_forwarded() {
        let app = TestApp::new().await;
        let response = app
            .get(&seg_uri("t1", "00009.ts", &app.origin_url("/nowhere.ts")))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn key_route_serves_cached_key() {
        let app = TestApp::new().await;
        app.h.write_complete("t1", "abc.key", b"0123456789abcdef");

        let response = app
            .get(&format!(
                "/proxy/key/t1/abc.key/{}",
                encode_source_url(&app.origin_url("/keys/k1"))
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "0123456789abcdef");
    }

    #[tokio::test]
    async fn traversal_in_path_is_rejected() {
        let app = TestApp::new().await;
        let response = app
            .get(&seg_uri("t1", "%2E%2E", &app.origin_url("/seg/seg1.ts")))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

mod task_routes {
    use super::*;

    #[tokio::test]
    async fn add_list_stop_delete() {
        let app = TestApp::new().await;
        let variant = app.origin_url("/high/index.m3u8");
        let task_id = fingerprint(&variant);

        let response = app
            .send(json_request(
                "POST",
                "/api/tasks",
                serde_json::json!({ "url": variant }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let added: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(added["id"], task_id.as_str());

        app.h.manager.wait_idle().await;

        let response = app.get("/api/tasks").await;
        assert_eq!(response.status(), StatusCode::OK);
        let tasks: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let tasks = tasks.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["id"], task_id.as_str());
        assert_eq!(tasks[0]["original_url"], variant.as_str());
        assert_eq!(tasks[0]["total_segments"], 3);
        assert_eq!(tasks[0]["downloaded_segments"], 0);
        assert_eq!(tasks[0]["status"], "downloading");

        // A live task is not added twice.
        let response = app
            .send(json_request(
                "POST",
                "/api/tasks",
                serde_json::json!({ "url": variant }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Nor deleted while downloading.
        let response = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/tasks/{task_id}/stop"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.get(&format!("/api/tasks/{task_id}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!app.h.cache().task_dir(&task_id).unwrap().exists());
    }

    #[tokio::test]
    async fn adding_a_master_picks_the_best_variant() {
        let app = TestApp::new().await;
        let master = app.origin_url("/master.m3u8");

        let response = app
            .send(json_request(
                "POST",
                "/api/tasks",
                serde_json::json!({ "url": master }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        app.h.manager.wait_idle().await;

        let tasks = app.h.repo.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].original_url, app.origin_url("/high/index.m3u8"));
    }

    #[tokio::test]
    async fn invalid_add_url_is_bad_request() {
        let app = TestApp::new().await;
        let response = app
            .send(json_request(
                "POST",
                "/api/tasks",
                serde_json::json!({ "url": "not a url" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stop_unknown_task_is_not_found() {
        let app = TestApp::new().await;
        let response = app
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/api/tasks/unknown/stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

mod admin_routes {
    use super::*;

    #[tokio::test]
    async fn health_reports_components() {
        let app = TestApp::new().await;
        let response = app.get("/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let health: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(health["status"], "healthy");
        let names: Vec<&str> = health["components"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["database", "fetch_engine"]);

        let response = app.get("/api/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logging_without_config_is_unavailable() {
        let app = TestApp::new().await;
        let response = app.get("/api/logging").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
