//! Stream consumer (fan-out)
//!
//! One invocation per HTTP client on the streaming endpoint. Admits the
//! client against the tuner registry, waits for the producer's first segment,
//! then pumps completed segments into the response body. A client that stops
//! draining within the configured write deadline is disconnected.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::limit;
use crate::registry::{Admission, StreamHandle, StreamRequest};
use crate::{producer, BufferContext};

/// Polls of 100 ms while waiting for the producer to start.
const START_POLLS: u32 = 200;
const POLL: Duration = Duration::from_millis(100);

/// Handle one streaming client end to end. The returned response either
/// fans out the buffered stream, serves the tuner-limit video, or reports
/// startup failure.
pub async fn serve(ctx: Arc<BufferContext>, request: StreamRequest) -> Response {
    // Give the producer a head start before the first drain.
    tokio::time::sleep(Duration::from_millis(ctx.buffer.timeout_ms)).await;

    let (handle, consumer) = match ctx.registry.admit(&request) {
        Admission::Limit => {
            debug!(
                playlist = %request.playlist_id,
                url = %request.url,
                "tuner limit reached"
            );
            return limit::limit_response(&ctx);
        }
        Admission::NewStream { handle, consumer } => {
            producer::spawn(ctx.clone(), handle.clone());
            (handle, consumer)
        }
        Admission::Attached { handle, consumer } => (handle, consumer),
    };

    // Wait for the first completed segment (or a latched producer error).
    let mut started = false;
    for _ in 0..START_POLLS {
        if ctx.registry.latched_error(&handle).is_some() {
            break;
        }
        match ctx.registry.started(&handle) {
            Some(true) => {
                started = true;
                break;
            }
            Some(false) => tokio::time::sleep(POLL).await,
            None => break,
        }
    }
    if !started {
        teardown(&ctx, &handle, consumer).await;
        return plain_response(StatusCode::SERVICE_UNAVAILABLE, "stream did not start");
    }

    // First drain decides the Content-Type before headers go out.
    let (first_batch, content_type) = match first_batch(&ctx, &handle, consumer).await {
        Some(v) => v,
        None => {
            teardown(&ctx, &handle, consumer).await;
            return plain_response(StatusCode::SERVICE_UNAVAILABLE, "stream did not start");
        }
    };

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(1);
    {
        let ctx = ctx.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            pump(&ctx, &handle, consumer, tx, first_batch).await;
            teardown(&ctx, &handle, consumer).await;
        });
    }

    let body = Body::from_stream(ReceiverStream::new(rx));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Drain until at least one segment is available and sniff its content type.
async fn first_batch(
    ctx: &BufferContext,
    handle: &StreamHandle,
    consumer: u64,
) -> Option<(Vec<Bytes>, String)> {
    loop {
        let (drained, evicted) = ctx.registry.drain(handle, consumer)?;
        evict_files(ctx, handle, evicted).await;
        if drained.error.is_some() {
            return None;
        }
        if !drained.segments.is_empty() {
            let mut batch = Vec::with_capacity(drained.segments.len());
            for name in &drained.segments {
                match ctx.vfs.read(&handle.folder.join(name)).await {
                    Ok(data) => batch.push(data),
                    Err(e) => {
                        debug!(segment = %name, error = %e, "segment read failed");
                        return None;
                    }
                }
            }
            let content_type = sniff_content_type(&batch[0]).to_string();
            return Some((batch, content_type));
        }
        if drained.finished {
            return None;
        }
        tokio::time::sleep(POLL).await;
    }
}

/// Forward segments to the client until it disconnects, the producer fails,
/// or a finished stream runs dry.
async fn pump(
    ctx: &BufferContext,
    handle: &StreamHandle,
    consumer: u64,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
    first_batch: Vec<Bytes>,
) {
    let deadline = Duration::from_millis(ctx.buffer.client_timeout_ms);

    for data in first_batch {
        if !send_with_deadline(&tx, data, deadline).await {
            return;
        }
    }

    loop {
        let Some((drained, evicted)) = ctx.registry.drain(handle, consumer) else {
            return;
        };
        evict_files(ctx, handle, evicted).await;

        if drained.error.is_some() {
            debug!(url = %handle.url, "producer error latched, closing client");
            return;
        }

        for name in &drained.segments {
            let data = match ctx.vfs.read(&handle.folder.join(name)).await {
                Ok(data) => data,
                Err(e) => {
                    debug!(segment = %name, error = %e, "segment read failed");
                    return;
                }
            };
            if !send_with_deadline(&tx, data, deadline).await {
                return;
            }
        }

        if drained.segments.is_empty() {
            if drained.finished {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

/// Write one segment within the client deadline. `false` means the client is
/// gone or too slow.
async fn send_with_deadline(
    tx: &mpsc::Sender<std::io::Result<Bytes>>,
    data: Bytes,
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, tx.send(Ok(data))).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            debug!("client disconnected");
            false
        }
        Err(_) => {
            debug!("client write deadline exceeded");
            false
        }
    }
}

async fn evict_files(ctx: &BufferContext, handle: &StreamHandle, names: Vec<String>) {
    for name in names {
        let _ = ctx.vfs.remove_all(&handle.folder.join(name)).await;
    }
}

async fn teardown(ctx: &BufferContext, handle: &StreamHandle, consumer: u64) {
    let detach = ctx.registry.detach(handle, consumer);
    if detach.removed_stream {
        let _ = ctx.vfs.remove_all(&handle.folder).await;
    }
    debug!(
        url = %handle.url,
        removed_stream = detach.removed_stream,
        removed_playlist = detach.removed_playlist,
        "consumer detached"
    );
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Minimal magic-byte sniff over the first buffered segment.
fn sniff_content_type(data: &[u8]) -> &'static str {
    if data.len() > 188 && data[0] == 0x47 && data[188] == 0x47 {
        return "video/mp2t";
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if data.len() >= 4 && data[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return "video/x-matroska";
    }
    "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_ts() {
        let mut data = vec![0u8; 512];
        data[0] = 0x47;
        data[188] = 0x47;
        assert_eq!(sniff_content_type(&data), "video/mp2t");
    }

    #[test]
    fn test_sniff_mp4() {
        let mut data = vec![0u8; 16];
        data[4..8].copy_from_slice(b"ftyp");
        assert_eq!(sniff_content_type(&data), "video/mp4");
    }

    #[test]
    fn test_sniff_matroska() {
        let data = [0x1A, 0x45, 0xDF, 0xA3, 0, 0, 0, 0];
        assert_eq!(sniff_content_type(&data), "video/x-matroska");
    }

    #[test]
    fn test_sniff_fallback() {
        assert_eq!(sniff_content_type(&[0u8; 64]), "application/octet-stream");
    }
}
