//! Stream producer
//!
//! One task per unique upstream URL. Reads the upstream body, slices it into
//! numbered segment files inside the virtual filesystem and advertises each
//! completed file through the registry. HLS sources are driven playlist-first:
//! parse, fetch the referenced media segments, refresh, repeat.

use bytes::BytesMut;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use vtuner_core::{Error, Result};

use crate::hls::{is_hls_content_type, parse_m3u8};
use crate::registry::{HlsSegment, StreamHandle};
use crate::BufferContext;

const POLL_SLICE: Duration = Duration::from_millis(100);

pub fn spawn(ctx: std::sync::Arc<BufferContext>, handle: StreamHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match run(&ctx, &handle).await {
            Ok(()) => {
                debug!(url = %handle.url, "producer finished");
            }
            Err(Error::Cancelled(_)) => {
                // Last client left; wipe the segment folder and go.
                let _ = ctx.vfs.remove_all(&handle.folder).await;
                debug!(url = %handle.url, "producer torn down");
            }
            Err(e) => {
                warn!(url = %handle.url, error = %e, "producer failed");
                ctx.registry.latch_error(&handle, e);
            }
        }
    })
}

async fn run(ctx: &BufferContext, handle: &StreamHandle) -> Result<()> {
    // Fresh folder for this stream's segments.
    ctx.vfs.remove_all(&handle.folder).await?;
    ctx.vfs.mkdir_all(&handle.folder).await?;

    let response = ctx.fetcher.retry_get(&handle.url).await?;
    if !response.status().is_success() {
        return Err(Error::Upstream(format!(
            "{} for {}",
            response.status(),
            handle.url
        )));
    }

    let content_type = response_content_type(&response);
    if is_hls_content_type(&content_type) {
        run_hls(ctx, handle, response).await
    } else if is_ts_content_type(&content_type) {
        run_ts(ctx, handle, response).await
    } else {
        Err(Error::UnsupportedContentType(content_type))
    }
}

fn response_content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn is_ts_content_type(content_type: &str) -> bool {
    matches!(
        content_type,
        "video/mp2t"
            | "video/mpeg"
            | "video/mp4"
            | "application/mp4"
            | "video/x-matroska"
            | "application/octet-stream"
            | "binary/octet-stream"
            | ""
    )
}

/// Claim a file number, write the segment, then advertise it. Consumers only
/// ever see names whose file content is fully written.
async fn write_segment(
    ctx: &BufferContext,
    handle: &StreamHandle,
    data: bytes::Bytes,
) -> Result<()> {
    let name = ctx
        .registry
        .with_stream(handle, |s| s.next_segment_name())
        .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;
    ctx.vfs.write(&handle.folder.join(&name), data).await?;
    ctx.registry
        .with_stream(handle, |s| s.push_completed(name))
        .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;
    Ok(())
}

fn ensure_active(ctx: &BufferContext, handle: &StreamHandle) -> Result<()> {
    if ctx.registry.is_active(handle) {
        Ok(())
    } else {
        Err(Error::Cancelled("all clients disconnected".to_string()))
    }
}

/// Sleep `secs` in 100 ms slices, aborting as soon as the stream is gone.
async fn wait_sliced(ctx: &BufferContext, handle: &StreamHandle, secs: f64) -> Result<()> {
    let mut remaining = Duration::from_secs_f64(secs.max(0.0));
    while !remaining.is_zero() {
        ensure_active(ctx, handle)?;
        let slice = remaining.min(POLL_SLICE);
        tokio::time::sleep(slice).await;
        remaining = remaining.saturating_sub(slice);
    }
    Ok(())
}

/// Continuous TS/MP4/MKV source: pack the body into fixed-size segment files,
/// resuming with a Range request after mid-stream read errors.
async fn run_ts(
    ctx: &BufferContext,
    handle: &StreamHandle,
    response: reqwest::Response,
) -> Result<()> {
    let segment_size = (ctx.buffer.size_kb as usize) * 1024;
    let mut pending = BytesMut::with_capacity(segment_size);
    let mut position: u64 = 0;
    let mut attempts: u32 = 0;
    let mut body = response.bytes_stream();

    loop {
        match body.next().await {
            Some(Ok(chunk)) => {
                attempts = 0;
                position += chunk.len() as u64;
                pending.extend_from_slice(&chunk);
                while pending.len() >= segment_size {
                    ensure_active(ctx, handle)?;
                    let data = pending.split_to(segment_size).freeze();
                    write_segment(ctx, handle, data).await?;
                }
            }
            Some(Err(e)) => {
                if attempts >= ctx.fetch.max_retries {
                    return Err(e.into());
                }
                attempts += 1;
                warn!(
                    url = %handle.url,
                    position,
                    attempts,
                    error = %e,
                    "upstream read failed, resuming with range"
                );
                tokio::time::sleep(Duration::from_millis(ctx.fetch.retry_delay_ms)).await;
                ensure_active(ctx, handle)?;
                let response = ctx.fetcher.get_with_range(&handle.url, position).await?;
                if !response.status().is_success() {
                    return Err(Error::Upstream(format!(
                        "{} resuming {}",
                        response.status(),
                        handle.url
                    )));
                }
                body = response.bytes_stream();
            }
            None => break,
        }
    }

    // EOF: flush the partial tail segment.
    if !pending.is_empty() {
        write_segment(ctx, handle, pending.freeze()).await?;
    }
    ctx.registry
        .with_stream(handle, |s| s.finished = true)
        .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;
    Ok(())
}

/// HLS source: parse the playlist, fetch every referenced media segment into
/// its own file, refresh until the playlist ends (VOD) or forever (live).
async fn run_hls(
    ctx: &BufferContext,
    handle: &StreamHandle,
    response: reqwest::Response,
) -> Result<()> {
    let mut playlist_url =
        Url::parse(&handle.url).map_err(|e| Error::InvalidInput(format!("{}: {e}", handle.url)))?;

    let body = ctx.fetcher.read_playlist_body(response).await?;
    let text = String::from_utf8_lossy(&body).into_owned();
    ctx.registry
        .with_stream(handle, |s| parse_m3u8(s, &text, &playlist_url))
        .ok_or_else(|| Error::Cancelled("stream gone".to_string()))??;

    let started_at = Instant::now();
    let mut bytes_downloaded: u64 = 0;
    let mut last_duration: f64 = 0.0;

    loop {
        let pending: Vec<HlsSegment> = ctx
            .registry
            .with_stream(handle, |s| std::mem::take(&mut s.segments))
            .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;

        for segment in pending {
            ensure_active(ctx, handle)?;
            let fetch_start = Instant::now();
            let response = ctx.fetcher.retry_get(&segment.url).await?;
            if !response.status().is_success() {
                return Err(Error::Upstream(format!(
                    "{} for segment {}",
                    response.status(),
                    segment.url
                )));
            }

            if is_hls_content_type(&response_content_type(&response)) {
                // A variant chosen from a master playlist is itself a
                // playlist; switch refreshes over to it.
                let nested_url = Url::parse(&segment.url)
                    .map_err(|e| Error::InvalidInput(format!("{}: {e}", segment.url)))?;
                let body = ctx.fetcher.read_playlist_body(response).await?;
                let text = String::from_utf8_lossy(&body).into_owned();
                ctx.registry
                    .with_stream(handle, |s| parse_m3u8(s, &text, &nested_url))
                    .ok_or_else(|| Error::Cancelled("stream gone".to_string()))??;
                playlist_url = nested_url;
                continue;
            }

            let data = ctx.fetcher.read_provider_body(response).await?;
            bytes_downloaded += data.len() as u64;
            write_segment(ctx, handle, data).await?;
            last_duration = segment.duration;

            // Pace ahead of real time by a quarter segment.
            if segment.duration > 0.0 {
                let elapsed = fetch_start.elapsed().as_secs_f64();
                let wait = segment.duration - elapsed - 0.25 * segment.duration;
                wait_sliced(ctx, handle, wait).await?;
            }
        }

        let elapsed_ms = started_at.elapsed().as_millis().max(1) as u64;
        let bandwidth = bytes_downloaded.saturating_mul(1000) / elapsed_ms;
        let (vod, queue_empty) = ctx
            .registry
            .with_stream(handle, |s| {
                s.network_bandwidth = bandwidth;
                (s.vod, s.segments.is_empty())
            })
            .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;

        if vod && queue_empty {
            ctx.registry
                .with_stream(handle, |s| s.finished = true)
                .ok_or_else(|| Error::Cancelled("stream gone".to_string()))?;
            return Ok(());
        }
        if !queue_empty {
            continue;
        }

        // Live: refresh the media playlist until new segments appear.
        loop {
            ensure_active(ctx, handle)?;
            let response = ctx.fetcher.retry_get(playlist_url.as_str()).await?;
            if !response.status().is_success() {
                return Err(Error::Upstream(format!(
                    "{} refreshing {playlist_url}",
                    response.status()
                )));
            }
            let body = ctx.fetcher.read_playlist_body(response).await?;
            let text = String::from_utf8_lossy(&body).into_owned();
            let appended = ctx
                .registry
                .with_stream(handle, |s| parse_m3u8(s, &text, &playlist_url))
                .ok_or_else(|| Error::Cancelled("stream gone".to_string()))??;
            if appended > 0 {
                break;
            }
            let nap = if last_duration > 0.0 {
                0.5 * last_duration
            } else {
                1.0
            };
            wait_sliced(ctx, handle, nap).await?;
        }
    }
}
