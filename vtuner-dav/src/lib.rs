//! WebDAV on-demand view
//!
//! Derives a read-only directory hierarchy from ingested playlist data and
//! serves it through `dav-server`, with layered metadata/content caches and
//! range-capable streaming file handles.

pub mod cache;
pub mod content_cache;
pub mod file;
pub mod fs;
pub mod tree;

pub use cache::{FileMeta, WebDavCache};
pub use content_cache::ContentCache;
pub use fs::{VodFs, VodMeta};
