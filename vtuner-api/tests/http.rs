//! HTTP surface tests: API security, login rate limiting, HDHR documents
//! and playlist filtering.

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use vtuner_api::{create_router, AppState, NoopUpdateSink};
use vtuner_buffer::{BufferContext, BufferRegistry};
use vtuner_core::auth::{StaticCredentials, TokenGate};
use vtuner_core::config::Config;
use vtuner_core::lineup::{LineupEntry, LineupTable};
use vtuner_core::models::{ChannelEntry, InMemoryCatalog, PlaylistId, PlaylistSource};
use vtuner_core::vfs::MemoryFs;
use vtuner_core::Fetcher;

fn test_state(mutate: impl FnOnce(&mut Config)) -> AppState {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.fetch.allow_loopback = true;
    config.auth.token_secret = "test-secret-long-enough".to_string();
    config.auth.username = "admin".to_string();
    config.auth.password = "pw".to_string();
    mutate(&mut config);
    let config = Arc::new(config);

    let catalog = Arc::new(InMemoryCatalog::new());
    let mut source = PlaylistSource::new(PlaylistId::from("M3U-1"), "Provider", 2);
    source.entries.push(
        ChannelEntry::new("News HD", "http://upstream/news.ts").with_attr("group-title", "News"),
    );
    catalog.upsert_source(source);
    catalog.set_m3u_document(
        "vtuner.m3u",
        "#EXTM3U\n#EXTINF:-1 group-title=\"News\",CNN\nhttp://u/cnn.ts\n#EXTINF:-1 group-title=\"Sports\",ESPN\nhttp://u/espn.ts\n".to_string(),
    );
    catalog.set_xmltv_document("vtuner.xml", "<?xml version=\"1.0\"?><tv></tv>".to_string());
    catalog.set_epg_source("XEPG");

    let fetcher = Arc::new(Fetcher::new(&config.fetch).expect("fetcher"));
    let buffer = Arc::new(BufferContext::new(
        Arc::new(BufferRegistry::new("buffers".into())),
        Arc::new(MemoryFs::new()),
        fetcher,
        config.buffer.clone(),
        config.fetch.clone(),
        vtuner_buffer::limit::load_limit_video(std::path::Path::new("/nonexistent")),
    ));

    let lineup = Arc::new(LineupTable::in_memory());
    lineup.upsert(
        "news-hd".to_string(),
        LineupEntry {
            guide_number: "1".to_string(),
            guide_name: "News HD".to_string(),
            url: "http://upstream/news.ts".to_string(),
            playlist_id: PlaylistId::from("M3U-1"),
            playlist_name: "Provider".to_string(),
            channel_name: "News HD".to_string(),
        },
    );

    let gate = Arc::new(TokenGate::from_config(&config.auth));
    let credentials = Arc::new(StaticCredentials::new(&config.auth, gate.clone()));

    AppState::new(
        config,
        catalog,
        buffer,
        lineup,
        gate,
        credentials,
        Arc::new(NoopUpdateSink),
    )
}

fn local_addr() -> SocketAddr {
    "127.0.0.1:55000".parse().expect("addr")
}

fn api_request(body: serde_json::Value, addr: SocketAddr) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-real-ip", "1.2.3.4")
        .extension(ConnectInfo(addr))
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn login_rate_limit_returns_429_on_eleventh_attempt() {
    let app = create_router(test_state(|_| {}));
    let bad_login = serde_json::json!({"cmd": "login", "username": "admin", "password": "wrong"});

    for i in 0..10 {
        let response = app
            .clone()
            .oneshot(api_request(bad_login.clone(), local_addr()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK, "attempt {i}");
        let body = json_body(response).await;
        assert_eq!(body["status"], false);
        assert!(body["error"].is_string());
    }

    let response = app
        .oneshot(api_request(bad_login, local_addr()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn web_auth_gates_api_even_when_api_auth_off() {
    let app = create_router(test_state(|c| {
        c.auth.web = true;
        c.auth.api = false;
    }));

    let response = app
        .oneshot(api_request(
            serde_json::json!({"cmd": "status"}),
            local_addr(),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn api_rejects_remote_tcp_callers() {
    let app = create_router(test_state(|_| {}));
    let remote: SocketAddr = "8.8.8.8:9999".parse().expect("addr");

    let response = app
        .oneshot(api_request(serde_json::json!({"cmd": "status"}), remote))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_reports_counts_and_urls() {
    let app = create_router(test_state(|_| {}));

    let response = app
        .oneshot(api_request(
            serde_json::json!({"cmd": "status"}),
            local_addr(),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], true);
    assert_eq!(body["epg.source"], "XEPG");
    assert_eq!(body["streams.all"], 1);
    assert_eq!(body["tuner.all"], 2);
    assert!(body["url.m3u"].as_str().expect("url").ends_with("/m3u/vtuner.m3u"));
    assert!(body["url.webdav"].as_str().expect("url").ends_with("/dav/"));
    assert!(body["version.xteve"].is_string());
}

#[tokio::test]
async fn login_then_status_with_token() {
    let app = create_router(test_state(|c| {
        c.auth.web = true;
    }));

    let response = app
        .clone()
        .oneshot(api_request(
            serde_json::json!({"cmd": "login", "username": "admin", "password": "pw"}),
            local_addr(),
        ))
        .await
        .expect("response");
    let body = json_body(response).await;
    assert_eq!(body["status"], true);
    let token = body["token"].as_str().expect("token").to_string();

    let response = app
        .oneshot(api_request(
            serde_json::json!({"cmd": "status", "token": token}),
            local_addr(),
        ))
        .await
        .expect("response");
    let body = json_body(response).await;
    assert_eq!(body["status"], true);
    // Rotated token comes back with the response.
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn discover_and_lineup_documents() {
    let app = create_router(test_state(|_| {}));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/discover.json")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["TunerCount"], 2);
    assert!(body["DeviceID"].is_string());
    assert!(body["BaseURL"].as_str().expect("base").starts_with("http://"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/lineup.json")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = json_body(response).await;
    let lineup = body.as_array().expect("array");
    assert_eq!(lineup.len(), 1);
    assert_eq!(lineup[0]["GuideNumber"], "1");
    assert!(lineup[0]["URL"]
        .as_str()
        .expect("url")
        .ends_with("/stream/news-hd"));
}

#[tokio::test]
async fn m3u_document_with_group_filter() {
    let app = create_router(test_state(|_| {}));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/m3u/vtuner.m3u?group-title=News")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("CNN"));
    assert!(!text.contains("ESPN"));

    // Missing documents are a 404.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/m3u/other.m3u")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pms_auth_gates_playlist_routes() {
    let app = create_router(test_state(|c| {
        c.auth.pms = true;
    }));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/m3u/vtuner.m3u")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // URL credentials are accepted.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/m3u/vtuner.m3u?username=admin&password=pw")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_stream_key_is_404() {
    let app = create_router(test_state(|_| {}));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/stream/not-a-key")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn buffer_disabled_redirects() {
    let app = create_router(test_state(|c| {
        c.buffer.enabled = false;
    }));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/stream/news-hd")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://upstream/news.ts"
    );
}

#[tokio::test]
async fn download_streams_then_deletes() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let state = {
        let tmp_path = tmp.path().to_path_buf();
        test_state(move |c| {
            c.storage.tmp_dir = tmp_path;
        })
    };
    let download_dir = state.config.storage.tmp_dir.join("download");
    std::fs::create_dir_all(&download_dir).expect("mkdir");
    std::fs::write(download_dir.join("backup.zip"), b"archive-bytes").expect("write");

    let app = create_router(state);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/download/backup.zip")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert_eq!(bytes.as_ref(), b"archive-bytes");
    assert!(!download_dir.join("backup.zip").exists());

    // Second fetch: the temp file is gone.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/download/backup.zip")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_rejects_traversal() {
    let app = create_router(test_state(|_| {}));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/download/..%2Fsecret")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn images_served_from_data_dir() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let state = {
        let data_path = tmp.path().to_path_buf();
        test_state(move |c| {
            c.storage.data_dir = data_path;
        })
    };
    let images_dir = state.config.storage.data_dir.join("images");
    std::fs::create_dir_all(&images_dir).expect("mkdir");
    std::fs::write(images_dir.join("logo.png"), b"png-bytes").expect("write");

    let app = create_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/images/logo.png")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn security_headers_present() {
    let app = create_router(test_state(|_| {}));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/lineup_status.json")
                .extension(ConnectInfo(local_addr()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}
