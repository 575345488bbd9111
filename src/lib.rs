//! # rotating-proxies
//!
//! A random rotating proxy pool for crawlers built on reqwest.
//!
//! The [`ProxyPool`] hands every outgoing request a proxy address and, for proxies that need
//! one, a `Proxy-Authorization` login picked among the logins listed for that address. When a
//! request fails through its proxy the login, and eventually the address, is evicted from the
//! pool. [`ProxyPoolMiddleware`] plugs the pool into a `reqwest-middleware` client.

pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
mod utils;

pub use config::{ProxyListSource, ProxyPoolConfig, ProxyPoolConfigBuilder, SelectionMode};
pub use error::{ConfigError, ProxyPoolError, Result};
pub use middleware::ProxyPoolMiddleware;
pub use pool::ProxyPool;
pub use proxy::{Credential, ProxyAssignment, ProxyEntry};
