use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynamically-typed M3U attribute value.
///
/// Playlist entries carry free-form `key="value"` attributes plus a few
/// numeric fields the ingest layer may already have parsed. Downstream
/// consumers (WebDAV metadata resolution, lineup synthesis) match on the
/// variant instead of re-parsing strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamAttr {
    Str(String),
    Int(i64),
    Float(f64),
    Map(BTreeMap<String, StreamAttr>),
}

impl StreamAttr {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StreamAttr::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; numeric strings are converted.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StreamAttr::Int(v) => Some(*v),
            StreamAttr::Float(v) => Some(*v as i64),
            StreamAttr::Str(s) => s.trim().parse().ok(),
            StreamAttr::Map(_) => None,
        }
    }

    /// Float view; numeric strings are converted.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StreamAttr::Int(v) => Some(*v as f64),
            StreamAttr::Float(v) => Some(*v),
            StreamAttr::Str(s) => s.trim().parse().ok(),
            StreamAttr::Map(_) => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, StreamAttr>> {
        match self {
            StreamAttr::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for StreamAttr {
    fn from(s: &str) -> Self {
        StreamAttr::Str(s.to_string())
    }
}

impl From<String> for StreamAttr {
    fn from(s: String) -> Self {
        StreamAttr::Str(s)
    }
}

impl From<i64> for StreamAttr {
    fn from(v: i64) -> Self {
        StreamAttr::Int(v)
    }
}

impl From<f64> for StreamAttr {
    fn from(v: f64) -> Self {
        StreamAttr::Float(v)
    }
}
