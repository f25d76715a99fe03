//! HLS playlist handling
//!
//! Feeds parsed M3U8 documents into a stream's pending segment queue.
//! Master playlists populate the bandwidth->variant table and queue exactly
//! one fetch for the selected variant; media playlists queue media segments
//! with live sequence tracking.

use m3u8_rs::{MediaPlaylistType, Playlist};
use url::Url;

use vtuner_core::{Error, Result};

use crate::registry::{HlsSegment, StreamState};

/// Dedup window bounds for recently queued segment URLs: once the list grows
/// past `SEEN_TRIM_AT`, only the newest `SEEN_KEEP` entries are retained.
const SEEN_TRIM_AT: usize = 30;
const SEEN_KEEP: usize = 15;

/// Parse an M3U8 body and queue the resulting fetches on `stream`.
/// Returns the number of newly queued segments.
pub fn parse_m3u8(stream: &mut StreamState, body: &str, playlist_url: &Url) -> Result<usize> {
    if !body.trim_start().starts_with("#EXTM3U") {
        return Err(Error::NotAnM3u8(playlist_url.to_string()));
    }

    let playlist = m3u8_rs::parse_playlist_res(body.as_bytes())
        .map_err(|e| Error::Upstream(format!("m3u8 parse: {e}")))?;

    match playlist {
        Playlist::MasterPlaylist(master) => {
            stream.hls = true;
            stream.dynamic_streams.clear();
            for variant in &master.variants {
                if variant.is_i_frame {
                    continue;
                }
                let url = resolve_url(playlist_url, &variant.uri)?;
                stream.dynamic_streams.insert(variant.bandwidth, url);
            }
            let chosen = select_variant(stream.network_bandwidth, stream)
                .ok_or_else(|| Error::Upstream("master playlist without variants".to_string()))?;
            stream.segments.push(HlsSegment {
                url: chosen,
                duration: 0.0,
                sequence: stream.last_sequence,
            });
            Ok(1)
        }
        Playlist::MediaPlaylist(media) => {
            stream.hls = true;
            let vod = media.end_list
                || matches!(media.playlist_type, Some(MediaPlaylistType::Vod));
            stream.vod = stream.vod || vod;

            let base = media.media_sequence;
            let count = media.segments.len();
            let mut appended = 0usize;

            if !stream.media_parsed {
                stream.media_parsed = true;
                // Live playlists drop the trailing segment: the publisher may
                // still be writing it.
                let take = if vod { count } else { count.saturating_sub(1) };
                for (i, segment) in media.segments.iter().take(take).enumerate() {
                    let sequence = base + i as u64;
                    let url = resolve_url(playlist_url, &segment.uri)?;
                    queue_segment(stream, url, f64::from(segment.duration), sequence);
                    appended += 1;
                }
                stream.last_sequence = if appended > 0 {
                    base + appended as u64 - 1
                } else {
                    base.saturating_sub(1)
                };
            } else {
                for (i, segment) in media.segments.iter().enumerate() {
                    let sequence = base + i as u64;
                    if sequence <= stream.last_sequence {
                        continue;
                    }
                    let url = resolve_url(playlist_url, &segment.uri)?;
                    if stream.seen_urls.contains(&url) {
                        continue;
                    }
                    queue_segment(stream, url, f64::from(segment.duration), sequence);
                    stream.last_sequence = sequence;
                    appended += 1;
                }
            }
            Ok(appended)
        }
    }
}

fn queue_segment(stream: &mut StreamState, url: String, duration: f64, sequence: u64) {
    stream.seen_urls.push_back(url.clone());
    if stream.seen_urls.len() > SEEN_TRIM_AT {
        while stream.seen_urls.len() > SEEN_KEEP {
            stream.seen_urls.pop_front();
        }
    }
    stream.segments.push(HlsSegment {
        url,
        duration,
        sequence,
    });
}

/// Pick the variant for the measured bandwidth: the highest one not exceeding
/// it, or the lowest when no measurement exists yet (or none fits).
pub fn select_variant(network_bandwidth: u64, stream: &StreamState) -> Option<String> {
    if stream.dynamic_streams.is_empty() {
        return None;
    }
    if network_bandwidth > 0 {
        if let Some((_, url)) = stream
            .dynamic_streams
            .range(..=network_bandwidth)
            .next_back()
        {
            return Some(url.clone());
        }
    }
    stream.dynamic_streams.values().next().cloned()
}

/// Resolve a segment reference against the playlist URL. Absolute URLs
/// (`scheme://`, `//`) pass through, a leading `/` is rooted at the server
/// origin, and bare names are relative to the playlist's directory.
pub fn resolve_url(playlist_url: &Url, reference: &str) -> Result<String> {
    playlist_url
        .join(reference)
        .map(String::from)
        .map_err(|e| Error::InvalidInput(format!("segment url {reference}: {e}")))
}

/// Whether a response content type denotes an HLS playlist.
#[must_use]
pub fn is_hls_content_type(content_type: &str) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(
        ct.as_str(),
        "application/vnd.apple.mpegurl"
            | "application/x-mpegurl"
            | "audio/x-mpegurl"
            | "audio/mpegurl"
            | "application/mpegurl"
            | "video/x-mpegurl"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Admission, BufferRegistry, StreamRequest};
    use std::path::PathBuf;
    use vtuner_core::models::PlaylistId;

    fn with_test_stream<R>(f: impl FnOnce(&mut StreamState) -> R) -> R {
        let reg = BufferRegistry::new(PathBuf::from("tmp"));
        let req = StreamRequest {
            playlist_id: PlaylistId::from("M3U-1"),
            playlist_name: "Provider".to_string(),
            channel_name: "News".to_string(),
            url: "http://host/live/playlist.m3u8".to_string(),
            tuner: 1,
        };
        let Admission::NewStream { handle, .. } = reg.admit(&req) else {
            panic!("expected new stream");
        };
        reg.with_stream(&handle, f).expect("stream exists")
    }

    fn base_url() -> Url {
        Url::parse("http://host/live/playlist.m3u8").unwrap()
    }

    const LIVE_0_TO_9: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:4.0,\nsegment_0.ts\n#EXTINF:4.0,\nsegment_1.ts\n#EXTINF:4.0,\nsegment_2.ts\n#EXTINF:4.0,\nsegment_3.ts\n#EXTINF:4.0,\nsegment_4.ts\n#EXTINF:4.0,\nsegment_5.ts\n#EXTINF:4.0,\nsegment_6.ts\n#EXTINF:4.0,\nsegment_7.ts\n#EXTINF:4.0,\nsegment_8.ts\n#EXTINF:4.0,\nsegment_9.ts\n";

    #[test]
    fn test_not_an_m3u8() {
        with_test_stream(|stream| {
            let err = parse_m3u8(stream, "<html></html>", &base_url()).unwrap_err();
            assert!(matches!(err, Error::NotAnM3u8(_)));
        });
    }

    #[test]
    fn test_vod_parse_is_idempotent() {
        let body = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:9.0,\na.ts\n#EXTINF:9.0,\nb.ts\n#EXT-X-ENDLIST\n";
        with_test_stream(|stream| {
            let first = parse_m3u8(stream, body, &base_url()).unwrap();
            assert_eq!(first, 2);
            assert!(stream.vod);
            let queued: Vec<_> = stream.segments.iter().map(|s| s.url.clone()).collect();
            let last_sequence = stream.last_sequence;

            let second = parse_m3u8(stream, body, &base_url()).unwrap();
            assert_eq!(second, 0);
            assert_eq!(
                stream.segments.iter().map(|s| s.url.clone()).collect::<Vec<_>>(),
                queued
            );
            assert_eq!(stream.last_sequence, last_sequence);
        });
    }

    #[test]
    fn test_live_drops_trailing_segment_on_first_parse() {
        with_test_stream(|stream| {
            let appended = parse_m3u8(stream, LIVE_0_TO_9, &base_url()).unwrap();
            assert_eq!(appended, 9);
            assert!(!stream.vod);
            assert_eq!(stream.last_sequence, 8);
            assert_eq!(stream.segments.last().unwrap().url, "http://host/live/segment_8.ts");
        });
    }

    #[test]
    fn test_live_reparse_appends_only_new_sequences() {
        with_test_stream(|stream| {
            parse_m3u8(stream, LIVE_0_TO_9, &base_url()).unwrap();

            // Same document again: nothing new.
            assert_eq!(parse_m3u8(stream, LIVE_0_TO_9, &base_url()).unwrap(), 0);

            let extended = format!(
                "{LIVE_0_TO_9}#EXTINF:4.0,\nsegment_10.ts\n#EXTINF:4.0,\nsegment_11.ts\n#EXTINF:4.0,\nsegment_12.ts\n"
            );
            let appended = parse_m3u8(stream, &extended, &base_url()).unwrap();
            assert_eq!(appended, 4); // 9..=12
            assert_eq!(stream.last_sequence, 12);

            let urls: Vec<_> = stream.segments.iter().map(|s| s.url.as_str()).collect();
            assert_eq!(urls.len(), 13);
            for (i, url) in urls.iter().enumerate() {
                assert_eq!(*url, format!("http://host/live/segment_{i}.ts"));
            }
        });
    }

    #[test]
    fn test_live_sliding_window_advances_media_sequence() {
        with_test_stream(|stream| {
            parse_m3u8(stream, LIVE_0_TO_9, &base_url()).unwrap();

            let slid = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:8\n#EXTINF:4.0,\nsegment_8.ts\n#EXTINF:4.0,\nsegment_9.ts\n#EXTINF:4.0,\nsegment_10.ts\n";
            let appended = parse_m3u8(stream, slid, &base_url()).unwrap();
            assert_eq!(appended, 2); // 9 and 10
            assert_eq!(stream.last_sequence, 10);
        });
    }

    #[test]
    fn test_master_selects_lowest_without_measurement() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\nlow/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720\nmid/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=7680000,RESOLUTION=1920x1080\nhigh/index.m3u8\n";
        with_test_stream(|stream| {
            let appended = parse_m3u8(stream, master, &base_url()).unwrap();
            assert_eq!(appended, 1);
            assert!(stream.hls);
            assert_eq!(stream.dynamic_streams.len(), 3);
            assert_eq!(
                stream.segments[0].url,
                "http://host/live/low/index.m3u8"
            );
        });
    }

    #[test]
    fn test_master_selects_highest_within_bandwidth() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2560000\nmid.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=7680000\nhigh.m3u8\n";
        with_test_stream(|stream| {
            stream.network_bandwidth = 3_000_000;
            parse_m3u8(stream, master, &base_url()).unwrap();
            assert_eq!(stream.segments[0].url, "http://host/live/mid.m3u8");
        });
    }

    #[test]
    fn test_url_resolution_forms() {
        let base = base_url();
        assert_eq!(
            resolve_url(&base, "https://cdn.example.com/a.ts").unwrap(),
            "https://cdn.example.com/a.ts"
        );
        assert_eq!(
            resolve_url(&base, "//cdn.example.com/a.ts").unwrap(),
            "http://cdn.example.com/a.ts"
        );
        assert_eq!(
            resolve_url(&base, "/root/a.ts").unwrap(),
            "http://host/root/a.ts"
        );
        assert_eq!(
            resolve_url(&base, "a.ts").unwrap(),
            "http://host/live/a.ts"
        );
    }

    #[test]
    fn test_seen_urls_trimmed() {
        with_test_stream(|stream| {
            stream.media_parsed = true;
            for i in 0..40u64 {
                queue_segment(stream, format!("http://host/{i}.ts"), 2.0, i);
            }
            assert!(stream.seen_urls.len() <= SEEN_TRIM_AT);
            assert!(stream.seen_urls.contains(&"http://host/39.ts".to_string()));
            assert!(!stream.seen_urls.contains(&"http://host/0.ts".to_string()));
        });
    }

    #[test]
    fn test_hls_content_types() {
        assert!(is_hls_content_type("application/vnd.apple.mpegurl"));
        assert!(is_hls_content_type("Application/X-MpegURL; charset=utf-8"));
        assert!(!is_hls_content_type("video/mp2t"));
    }
}
