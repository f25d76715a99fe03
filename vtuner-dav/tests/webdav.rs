//! Streaming file handle tests against a wiremock upstream: range reads,
//! transient-error retry and prefix caching.

use bytes::Bytes;
use dav_server::fs::DavFile;
use std::io::SeekFrom;
use std::sync::Arc;

use vtuner_core::config::FetchConfig;
use vtuner_core::Fetcher;
use vtuner_dav::cache::FileMeta;
use vtuner_dav::content_cache::ContentCache;
use vtuner_dav::file::StreamingFile;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Arc<Fetcher> {
    Arc::new(
        Fetcher::new(&FetchConfig {
            allow_loopback: true,
            ..FetchConfig::default()
        })
        .expect("fetcher"),
    )
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn meta(size: u64) -> FileMeta {
    FileMeta {
        size,
        mod_time: None,
        cached_at: std::time::SystemTime::now(),
    }
}

#[tokio::test]
async fn read_at_offset_uses_range_and_matches_bytes() {
    let server = MockServer::start().await;
    let data = payload(4096);

    Mock::given(method("GET"))
        .and(path("/v.mp4"))
        .and(header("range", "bytes=100-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(data[100..].to_vec()))
        .mount(&server)
        .await;

    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(1024, 8 * 1024));
    let mut file = StreamingFile::new(fetcher(), cache, url, meta(4096));

    let pos = file.seek(SeekFrom::Start(100)).await.expect("seek");
    assert_eq!(pos, 100);

    let mut got = Vec::new();
    loop {
        let chunk = file.read_bytes(512).await.expect("read");
        if chunk.is_empty() {
            break;
        }
        got.extend_from_slice(&chunk);
    }
    assert_eq!(got, &data[100..]);
}

#[tokio::test]
async fn range_ignored_by_server_still_yields_correct_bytes() {
    let server = MockServer::start().await;
    let data = payload(2048);

    // Server ignores the Range header and sends the whole body with 200.
    Mock::given(method("GET"))
        .and(path("/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(64, 1024));
    let mut file = StreamingFile::new(fetcher(), cache, url, meta(2048));

    file.seek(SeekFrom::Start(1000)).await.expect("seek");
    let chunk = file.read_bytes(48).await.expect("read");
    assert_eq!(chunk.as_ref(), &data[1000..1048]);
}

#[tokio::test]
async fn transient_open_failure_is_retried() {
    let server = MockServer::start().await;
    let data = payload(1024);

    Mock::given(method("GET"))
        .and(path("/v.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(64, 1024));
    let mut file = StreamingFile::new(fetcher(), cache, url, meta(1024));

    let chunk = file.read_bytes(256).await.expect("read after retries");
    assert_eq!(chunk.as_ref(), &data[..256]);
}

#[tokio::test]
async fn seek_from_end_fails() {
    let server = MockServer::start().await;
    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(64, 1024));
    let mut file = StreamingFile::new(fetcher(), cache, url, meta(1024));

    assert!(file.seek(SeekFrom::End(-10)).await.is_err());
}

#[tokio::test]
async fn writes_are_forbidden() {
    let server = MockServer::start().await;
    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(64, 1024));
    let mut file = StreamingFile::new(fetcher(), cache, url, meta(1024));

    assert!(file.write_bytes(Bytes::from_static(b"x")).await.is_err());
}

#[tokio::test]
async fn prefix_cache_serves_second_reader() {
    let server = MockServer::start().await;
    let data = payload(512);

    Mock::given(method("GET"))
        .and(path("/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v.mp4", server.uri());
    let cache = Arc::new(ContentCache::new(1024, 8 * 1024));

    let mut first = StreamingFile::new(fetcher(), cache.clone(), url.clone(), meta(512));
    let mut got = Vec::new();
    loop {
        let chunk = first.read_bytes(128).await.expect("read");
        if chunk.is_empty() {
            break;
        }
        got.extend_from_slice(&chunk);
    }
    assert_eq!(got, data);

    // Whole file fits in the prefix cache; the second reader never touches
    // the upstream (GET expect(1)).
    let mut second = StreamingFile::new(fetcher(), cache, url, meta(512));
    let chunk = second.read_bytes(512).await.expect("cached read");
    assert_eq!(chunk.as_ref(), &data[..]);
}
