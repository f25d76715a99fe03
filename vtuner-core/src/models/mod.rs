pub mod attr;
pub mod channel;
pub mod id;

pub use attr::StreamAttr;
pub use channel::{CatalogCounts, ChannelEntry, InMemoryCatalog, PlaylistCatalog, PlaylistSource};
pub use id::{Fingerprint, PlaylistId, StreamId};
