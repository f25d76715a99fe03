pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lineup;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod vfs;

pub use config::Config;
pub use error::{Error, Result};
pub use fetch::Fetcher;
