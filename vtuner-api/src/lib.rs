//! HTTP surface
//!
//! axum routes for streaming, WebDAV, playlist/guide documents, HDHomeRun
//! emulation, the JSON command API and the WebSocket endpoint, plus the
//! middleware stack shared by all of them.

pub mod api;
pub mod auth_gate;
pub mod dav;
pub mod download;
pub mod error;
pub mod hdhr;
pub mod images;
pub mod middleware;
pub mod playlist;
pub mod state;
pub mod stream;
pub mod ws;

pub use error::{AppError, AppResult};
pub use state::{create_router, AppState, NoopUpdateSink, UpdateSink, UpdateTarget};
