//! Configuration for the proxy pool.

use crate::error::ConfigError;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the pool picks a proxy address for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Pick a fresh random address on every request.
    #[default]
    PerRequestRandom,
    /// Pick one random address up front and keep using it until it fails.
    PinnedRandom,
    /// Use the single operator-supplied proxy for every request.
    FixedSingle,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerRequestRandom => "per_request_random",
            Self::PinnedRandom => "pinned_random",
            Self::FixedSingle => "fixed_single",
        }
    }
}

impl FromStr for SelectionMode {
    type Err = ConfigError;

    /// Accepts the mode names as well as the numeric `PROXY_MODE` values `0`, `1` and `2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "per_request_random" | "per-request-random" | "perrequestrandom" => {
                Ok(Self::PerRequestRandom)
            }
            "1" | "pinned_random" | "pinned-random" | "pinnedrandom" => Ok(Self::PinnedRandom),
            "2" | "fixed_single" | "fixed-single" | "fixedsingle" => Ok(Self::FixedSingle),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// Where the proxy list lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyListSource {
    /// A file with one proxy URL per line.
    File(PathBuf),
    /// Proxy URL lines held in memory.
    Lines(Vec<String>),
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Selection mode.
    pub mode: SelectionMode,
    /// Proxy list, required by the two random modes.
    pub proxy_list: Option<ProxyListSource>,
    /// The single proxy used by `SelectionMode::FixedSingle`.
    pub custom_proxy: Option<String>,
    /// Never evict proxies or credentials on failure.
    pub suppress_eviction: bool,
    /// Number of times the middleware retries a failed request through a fresh proxy.
    pub retry_count: usize,
    /// Timeout applied to each proxied request by the middleware.
    pub request_timeout: Duration,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    /// Load the configuration from `PROXY_MODE`, `PROXY_LIST`, `CUSTOM_PROXY`,
    /// `DONT_REMOVE_PROXY`, `PROXY_RETRY_COUNT` and `PROXY_REQUEST_TIMEOUT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(mode) = lookup("PROXY_MODE") {
            builder = builder.mode(mode.parse()?);
        }
        if let Some(path) = lookup("PROXY_LIST").filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy_list_file(path.trim());
        }
        if let Some(proxy) = lookup("CUSTOM_PROXY").filter(|p| !p.trim().is_empty()) {
            builder = builder.custom_proxy(proxy.trim());
        }
        if let Some(flag) = lookup("DONT_REMOVE_PROXY") {
            builder = builder.suppress_eviction(parse_bool(&flag));
        }
        if let Some(count) = lookup("PROXY_RETRY_COUNT").and_then(|c| c.trim().parse().ok()) {
            builder = builder.retry_count(count);
        }
        if let Some(secs) = lookup("PROXY_REQUEST_TIMEOUT").and_then(|s| s.trim().parse().ok()) {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        Ok(builder.build())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    mode: Option<SelectionMode>,
    proxy_list: Option<ProxyListSource>,
    custom_proxy: Option<String>,
    suppress_eviction: bool,
    retry_count: Option<usize>,
    request_timeout: Option<Duration>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            mode: None,
            proxy_list: None,
            custom_proxy: None,
            suppress_eviction: false,
            retry_count: None,
            request_timeout: None,
        }
    }

    /// Set the selection mode.
    pub fn mode(mut self, mode: SelectionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Read proxy URLs from a file, one per line.
    pub fn proxy_list_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_list = Some(ProxyListSource::File(path.into()));
        self
    }

    /// Use an in-memory list of proxy URL lines.
    pub fn proxy_list_lines(mut self, lines: Vec<impl Into<String>>) -> Self {
        self.proxy_list = Some(ProxyListSource::Lines(
            lines.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Set the proxy used by `SelectionMode::FixedSingle`.
    pub fn custom_proxy(mut self, url: impl Into<String>) -> Self {
        self.custom_proxy = Some(url.into());
        self
    }

    /// Keep failing proxies in the pool instead of evicting them.
    pub fn suppress_eviction(mut self, suppress: bool) -> Self {
        self.suppress_eviction = suppress;
        self
    }

    /// Set how many times the middleware retries a failed request.
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the per-request timeout used by the middleware.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            mode: self.mode.unwrap_or_default(),
            proxy_list: self.proxy_list,
            custom_proxy: self.custom_proxy,
            suppress_eviction: self.suppress_eviction,
            retry_count: self.retry_count.unwrap_or(0),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
