//! Tuner-limit video
//!
//! When admission is rejected the client receives a looping MPEG-TS blob for
//! a bounded time instead of an HTTP error, so players show a friendly still
//! frame. A real asset can be dropped into the data directory as `limit.ts`;
//! without one, a run of TS null packets keeps players connected.

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::BufferContext;

const TS_PACKET: usize = 188;
const NULL_PACKETS: usize = 64;

/// Load the limit video from the data directory, falling back to a synthetic
/// null-packet blob.
pub fn load_limit_video(data_dir: &Path) -> Bytes {
    match std::fs::read(data_dir.join("limit.ts")) {
        Ok(data) if !data.is_empty() => Bytes::from(data),
        _ => null_packet_blob(),
    }
}

/// A run of MPEG-TS null packets (PID 0x1FFF).
fn null_packet_blob() -> Bytes {
    let mut blob = vec![0xFFu8; TS_PACKET * NULL_PACKETS];
    for packet in blob.chunks_mut(TS_PACKET) {
        packet[0] = 0x47;
        packet[1] = 0x1F;
        packet[2] = 0xFF;
        packet[3] = 0x10;
    }
    Bytes::from(blob)
}

/// Serve the limit blob roughly once per second for the configured duration,
/// then end the stream. The request never occupies a tuner slot.
pub fn limit_response(ctx: &BufferContext) -> Response {
    let blob = ctx.limit_video.clone();
    let iterations = ctx.buffer.limit_duration_secs.max(1);

    let stream = futures::stream::unfold(0u64, move |i| {
        let blob = blob.clone();
        async move {
            if i >= iterations {
                return None;
            }
            if i > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Some((Ok::<Bytes, io::Error>(blob), i + 1))
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("video/mpeg"),
    );
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_blob_shape() {
        let blob = null_packet_blob();
        assert_eq!(blob.len(), TS_PACKET * NULL_PACKETS);
        for packet in blob.chunks(TS_PACKET) {
            assert_eq!(packet[0], 0x47);
            assert_eq!(packet[1], 0x1F);
            assert_eq!(packet[2], 0xFF);
        }
    }

    #[test]
    fn test_missing_asset_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blob = load_limit_video(dir.path());
        assert_eq!(blob.len(), TS_PACKET * NULL_PACKETS);
    }

    #[test]
    fn test_asset_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("limit.ts"), b"fake-ts-asset").unwrap();
        let blob = load_limit_video(dir.path());
        assert_eq!(blob.as_ref(), b"fake-ts-asset");
    }
}
