//! Error types for the rotating-proxies crate.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration problems detected while building a pool. All of them are fatal to startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A random mode was selected but no proxy list was supplied.
    #[error("PROXY_LIST setting is missing")]
    MissingProxyList,
    /// `FixedSingle` mode was selected but no custom proxy was supplied.
    #[error("CUSTOM_PROXY setting is missing")]
    MissingCustomProxy,
    /// The custom proxy URL does not look like `scheme://[user:pass@]host`.
    #[error("CUSTOM_PROXY is not well formatted: {0}")]
    MalformedCustomProxy(String),
    /// The proxy list did not contain a single usable line.
    #[error("proxy list contains no usable proxies")]
    EmptyProxyList,
    /// The proxy list file could not be read.
    #[error("failed to read proxy list {path}: {source}")]
    ProxyListIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Unknown selection mode name.
    #[error("unknown proxy mode: {0}")]
    InvalidMode(String),
}

/// Errors surfaced by the proxy pool.
#[derive(Debug, Error)]
pub enum ProxyPoolError {
    #[error("invalid proxy pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// Every proxy has been evicted; the run cannot make proxied requests anymore.
    #[error("All proxies are unusable, cannot proceed")]
    PoolExhausted,

    /// The address is not in the pool, or has no credentials left.
    #[error("proxy not found in pool: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ProxyPoolError>;
