use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("File too large: {0}")]
    TooLarge(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Not an M3U8 playlist: {0}")]
    NotAnM3u8(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Filesystem error: {0}")]
    Fs(#[from] crate::vfs::FsError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Connect/timeout/body failures are worth retrying; everything else
        // (invalid URL, TLS config, redirect policy) is not.
        if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
            Error::Transient(err.to_string())
        } else {
            Error::Upstream(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Internal(format!("io: {err}"))
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
