//! On-demand tree derivation
//!
//! Turns the flat channel list of an ingested playlist into the virtual
//! directory hierarchy exposed over WebDAV:
//!
//! ```text
//! /<hash>/On Demand/<group>/Individual/<file>
//! /<hash>/On Demand/<group>/Series/<series>/Season <N>/<file>
//! ```

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use vtuner_core::models::{ChannelEntry, PlaylistSource};

const VOD_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "mpg", "mpeg", "m4v",
];
const NON_VOD_EXTENSIONS: &[&str] = &["m3u8", "ts", "php", "pl"];

/// Group name used for entries without a `group-title`.
const DEFAULT_GROUP: &str = "Ungrouped";

fn series_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(.*?)[_\s]*S(\d{1,3})[_\s]*E\d{1,3}").expect("series regex")
    })
}

/// Extension of the URL path, lowercased, without query or fragment.
#[must_use]
pub fn url_extension(url: &str) -> Option<String> {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or(url);
    let (stem, ext) = path.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A stream belongs to the on-demand tree if its URL extension marks it as a
/// file download; known live extensions are excluded, everything else is
/// decided by the ingested duration.
#[must_use]
pub fn is_vod(entry: &ChannelEntry) -> bool {
    if let Some(ext) = url_extension(&entry.url) {
        if VOD_EXTENSIONS.contains(&ext.as_str()) {
            return true;
        }
        if NON_VOD_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
    }
    entry.duration_secs().is_some_and(|d| d > 0.0)
}

#[must_use]
pub fn sanitize_group(group: &str) -> String {
    group.replace('/', "_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub name: String,
    pub season: u32,
}

/// Detect `<name> SxxEyy` channel names. The captured name keeps only the
/// part after the last ` - ` or `_-_` separator; with `_-_`, underscores in
/// the remainder become spaces.
#[must_use]
pub fn detect_series(channel_name: &str) -> Option<SeriesInfo> {
    let caps = series_regex().captures(channel_name)?;
    let raw = caps.get(1)?.as_str();
    let season: u32 = caps.get(2)?.as_str().parse().ok()?;

    let dash = raw.rfind(" - ");
    let underscore_dash = raw.rfind("_-_");
    let name = match (dash, underscore_dash) {
        (Some(d), Some(u)) if u > d => raw[u + 3..].replace('_', " "),
        (None, Some(u)) => raw[u + 3..].replace('_', " "),
        (Some(d), _) => raw[d + 3..].to_string(),
        (None, None) => raw.to_string(),
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        return None;
    }
    Some(SeriesInfo { name, season })
}

/// Replace every character outside `[A-Za-z0-9.\-_ ():]` with `_`.
#[must_use]
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One synthesized file (video or logo) inside a virtual directory.
#[derive(Debug, Clone)]
pub struct FileStreamInfo {
    /// Synthesized file name, unique within its directory.
    pub name: String,
    /// Upstream URL the file streams from.
    pub target_url: String,
    /// The playlist entry the file was derived from.
    pub entry: ChannelEntry,
}

/// Allocates collision-free file names within one directory.
#[derive(Default)]
struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    fn allocate(&mut self, stem: &str, ext: &str) -> String {
        let candidate = format!("{stem}.{ext}");
        if self.used.insert(candidate.clone()) {
            return candidate;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{stem}_{n}.{ext}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Fully derived on-demand hierarchy for one playlist.
#[derive(Debug, Default, Clone)]
pub struct DerivedTree {
    pub groups: Vec<String>,
    pub individual: HashMap<String, Vec<FileStreamInfo>>,
    pub series: HashMap<String, Vec<String>>,
    pub seasons: HashMap<(String, String), Vec<u32>>,
    pub season_files: HashMap<(String, String, u32), Vec<FileStreamInfo>>,
}

impl DerivedTree {
    #[must_use]
    pub fn season_dir_name(season: u32) -> String {
        format!("Season {season}")
    }

    /// Look up a file by directory components.
    #[must_use]
    pub fn individual_file(&self, group: &str, file: &str) -> Option<&FileStreamInfo> {
        self.individual
            .get(group)?
            .iter()
            .find(|f| f.name == file)
    }

    #[must_use]
    pub fn season_file(
        &self,
        group: &str,
        series: &str,
        season: u32,
        file: &str,
    ) -> Option<&FileStreamInfo> {
        self.season_files
            .get(&(group.to_string(), series.to_string(), season))?
            .iter()
            .find(|f| f.name == file)
    }
}

/// Derive the full tree for a playlist source. Only VOD entries participate.
#[must_use]
pub fn derive_tree(source: &PlaylistSource) -> DerivedTree {
    let mut tree = DerivedTree::default();
    let mut group_set: Vec<String> = Vec::new();
    let mut allocators: HashMap<Vec<String>, NameAllocator> = HashMap::new();

    for entry in &source.entries {
        if !is_vod(entry) {
            continue;
        }
        let group = sanitize_group(entry.group_title().unwrap_or(DEFAULT_GROUP));
        if !group_set.contains(&group) {
            group_set.push(group.clone());
        }

        let stem = sanitize_file_stem(&entry.name);
        let video_ext = url_extension(&entry.url).unwrap_or_else(|| "mp4".to_string());

        match detect_series(&entry.name) {
            Some(info) => {
                let series_list = tree.series.entry(group.clone()).or_default();
                if !series_list.contains(&info.name) {
                    series_list.push(info.name.clone());
                }
                let seasons = tree
                    .seasons
                    .entry((group.clone(), info.name.clone()))
                    .or_default();
                if !seasons.contains(&info.season) {
                    seasons.push(info.season);
                }

                let dir_key = vec![group.clone(), info.name.clone(), info.season.to_string()];
                let allocator = allocators.entry(dir_key).or_default();
                let files = tree
                    .season_files
                    .entry((group.clone(), info.name.clone(), info.season))
                    .or_default();
                push_files(files, allocator, &stem, &video_ext, entry);
            }
            None => {
                let dir_key = vec![group.clone()];
                let allocator = allocators.entry(dir_key).or_default();
                let files = tree.individual.entry(group.clone()).or_default();
                push_files(files, allocator, &stem, &video_ext, entry);
            }
        }
    }

    group_set.sort();
    tree.groups = group_set;
    for series in tree.series.values_mut() {
        series.sort();
    }
    for seasons in tree.seasons.values_mut() {
        seasons.sort_unstable();
    }
    tree
}

/// Emit the video file plus a companion logo file when the entry carries a
/// `tvg-logo`. File names (unlike directory names) carry underscores instead
/// of spaces.
fn push_files(
    files: &mut Vec<FileStreamInfo>,
    allocator: &mut NameAllocator,
    stem: &str,
    video_ext: &str,
    entry: &ChannelEntry,
) {
    let stem = stem.replace(' ', "_");
    let stem = stem.as_str();
    files.push(FileStreamInfo {
        name: allocator.allocate(stem, video_ext),
        target_url: entry.url.clone(),
        entry: entry.clone(),
    });
    if let Some(logo) = entry.tvg_logo() {
        let logo_ext = url_extension(logo).unwrap_or_else(|| "jpg".to_string());
        files.push(FileStreamInfo {
            name: allocator.allocate(stem, &logo_ext),
            target_url: logo.to_string(),
            entry: entry.clone(),
        });
    }
}
