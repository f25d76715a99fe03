use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub buffer: BufferConfig,
    pub fetch: FetchConfig,
    pub auth: AuthConfig,
    pub webdav: WebDavConfig,
    pub logging: LoggingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("storage", &self.storage)
            .field("buffer", &self.buffer)
            .field("fetch", &self.fetch)
            .field("auth", &"<redacted>")
            .field("webdav", &self.webdav)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Whether the server is reached over TLS (affects cookie flags and
    /// advertised URLs). TLS termination itself happens in front of us.
    pub tls: bool,
    /// Externally reachable base URL. If empty, derived from host/port.
    pub base_url: String,
    /// Optional udpxy relay address; `udp://` multicast stream URLs are
    /// rewritten to `http://<udpxy>/udp/<addr>` when set.
    pub udpxy: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 34400,
            tls: false,
            base_url: String::new(),
            udpxy: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persistent data directory (lineup table, ingested playlist files).
    pub data_dir: PathBuf,
    /// Root for stream segment buffers.
    pub tmp_dir: PathBuf,
    /// Segment buffer backend: "memory" or "disk".
    pub buffer_backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tmp_dir: std::env::temp_dir().join("vtuner"),
            buffer_backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// When false, `/stream/` redirects clients straight to the upstream URL
    /// instead of buffering.
    pub enabled: bool,
    /// Segment size for TS slicing, in KiB.
    pub size_kb: u64,
    /// Head start given to the producer before a consumer first drains, ms.
    pub timeout_ms: u64,
    /// Per-segment client write deadline, ms.
    pub client_timeout_ms: u64,
    /// How long the "tuner limit reached" video is served, seconds.
    pub limit_duration_secs: u64,
    /// Default tuner count for playlists that do not configure one.
    pub tuner_default: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_kb: 1024,
            timeout_ms: 500,
            client_timeout_ms: 5000,
            limit_duration_secs: 30,
            tuner_default: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Retries after a transient failure or non-2xx response.
    pub max_retries: u32,
    /// Delay between retries, ms.
    pub retry_delay_ms: u64,
    /// Upper bound for playlist (M3U/M3U8/XMLTV) downloads, MiB.
    pub max_playlist_download_mb: u64,
    /// Upper bound for provider file downloads, MiB.
    pub max_provider_download_mb: u64,
    /// Permit requests to loopback/link-local targets. Also enabled by the
    /// XTEVE_ALLOW_LOOPBACK environment variable.
    pub allow_loopback: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "vTuner".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            max_playlist_download_mb: 100,
            max_provider_download_mb: 1024,
            allow_loopback: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require authentication on the web surface (and, transitively, `/api/`).
    pub web: bool,
    /// Require authentication on `/api/`.
    pub api: bool,
    /// Require authentication on `/m3u/`, `/xmltv/` and `/dav/`.
    pub pms: bool,
    /// HS256 secret for the rotating token gate.
    pub token_secret: String,
    /// Token lifetime, seconds.
    pub token_ttl_secs: u64,
    /// Static admin credentials consumed by the login command.
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("web", &self.web)
            .field("api", &self.api)
            .field("pms", &self.pms)
            .field("token_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            web: false,
            api: false,
            pms: false,
            token_secret: "change-me-in-production".to_string(),
            token_ttl_secs: 3600,
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDavConfig {
    /// First-N-bytes content cache entry size.
    pub content_cache_bytes: usize,
    /// Total content cache budget, bytes.
    pub content_cache_budget: usize,
    /// Parallel HEAD requests when resolving file metadata.
    pub head_concurrency: usize,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            content_cache_bytes: 1024 * 1024,
            content_cache_budget: 64 * 1024 * 1024,
            head_concurrency: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Assemble the process configuration: the struct defaults, overlaid by
    /// the YAML file when one is given, overlaid in turn by `VTUNER_*`
    /// environment variables, with the compatibility `XTEVE_*` variables
    /// applied last.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, config::FileFormat::Yaml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("VTUNER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut config: Self = config.try_deserialize()?;
        config.apply_compat_env();
        Ok(config)
    }

    /// Configuration without a file, for containerized deployments that set
    /// everything through the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Overrides kept for compatibility with existing deployments:
    /// `XTEVE_BUFFER_CLIENT_TIMEOUT` (ms) and `XTEVE_ALLOW_LOOPBACK`.
    fn apply_compat_env(&mut self) {
        if let Ok(v) = std::env::var("XTEVE_BUFFER_CLIENT_TIMEOUT") {
            if let Ok(ms) = v.parse::<u64>() {
                self.buffer.client_timeout_ms = ms;
            } else {
                tracing::warn!("Ignoring non-numeric XTEVE_BUFFER_CLIENT_TIMEOUT: {v}");
            }
        }
        if let Ok(v) = std::env::var("XTEVE_ALLOW_LOOPBACK") {
            self.fetch.allow_loopback = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// Externally reachable base URL for generated documents and HDHR fields.
    #[must_use]
    pub fn base_url(&self) -> String {
        if !self.server.base_url.is_empty() {
            return self.server.base_url.trim_end_matches('/').to_string();
        }
        let scheme = if self.server.tls { "https" } else { "http" };
        let host = if self.server.host == "0.0.0.0" || self.server.host == "::" {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        } else {
            self.server.host.clone()
        };
        format!("{scheme}://{host}:{}", self.server.http_port)
    }

    /// Socket address the HTTP listener binds to.
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Validate configuration at startup (fail fast on misconfigurations)
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be between 1 and 65535, got 0".to_string());
        }

        if !matches!(self.storage.buffer_backend.as_str(), "memory" | "disk") {
            errors.push(format!(
                "storage.buffer_backend must be \"memory\" or \"disk\", got \"{}\"",
                self.storage.buffer_backend
            ));
        }

        if self.buffer.size_kb == 0 {
            errors.push("buffer.size_kb must be greater than 0".to_string());
        }
        if self.buffer.client_timeout_ms == 0 {
            errors.push("buffer.client_timeout_ms must be greater than 0".to_string());
        }
        if self.buffer.tuner_default == 0 {
            errors.push("buffer.tuner_default must be greater than 0".to_string());
        }

        if self.fetch.user_agent.is_empty() {
            errors.push("fetch.user_agent must not be empty".to_string());
        }
        if self.fetch.max_playlist_download_mb == 0 {
            errors.push("fetch.max_playlist_download_mb must be greater than 0".to_string());
        }
        if self.fetch.max_provider_download_mb == 0 {
            errors.push("fetch.max_provider_download_mb must be greater than 0".to_string());
        }

        if (self.auth.web || self.auth.api || self.auth.pms)
            && self.auth.token_secret == "change-me-in-production"
        {
            errors.push(
                "auth.token_secret is set to its default value; set VTUNER_AUTH__TOKEN_SECRET"
                    .to_string(),
            );
        }
        if self.auth.token_ttl_secs == 0 {
            errors.push("auth.token_ttl_secs must be greater than 0".to_string());
        }

        if self.webdav.head_concurrency == 0 {
            errors.push("webdav.head_concurrency must be greater than 0".to_string());
        }
        if self.webdav.content_cache_bytes == 0 {
            errors.push("webdav.content_cache_bytes must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
