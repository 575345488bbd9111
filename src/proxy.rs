//! Proxy credentials, parsed proxy lines and per-request proxy assignments.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

/// A `user:pass` login for a proxy. The empty credential means "no authentication".
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Credential(String);

impl Credential {
    pub fn new(user_pass: impl Into<String>) -> Self {
        Self(user_pass.into())
    }

    /// The credential used by proxies that need no authentication.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into user and password at the first `:`.
    pub fn user_pass(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }

    /// `Proxy-Authorization` value for this login, or `None` for the empty credential.
    pub fn basic_auth(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!("Basic {}", BASE64.encode(self.0.as_bytes())))
    }
}

// Passwords never end up in logs.
impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(':') {
            Some((user, _)) => write!(f, "{}:***", user),
            None if self.0.is_empty() => f.write_str("<none>"),
            None => f.write_str("***"),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self)
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One parsed proxy list line: the normalized address plus the login it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    /// `scheme://host[:port][/path]` with the credentials cut out.
    pub address: String,
    /// The `user:pass` part of the line, or the empty credential.
    pub credential: Credential,
}

/// Proxy metadata attached to one outgoing request.
///
/// The middleware keeps it in the request's `http::Extensions`; callers that drive
/// the pool directly hold one per request and pass it to
/// [`ProxyPool::prepare_request`](crate::ProxyPool::prepare_request) and
/// [`ProxyPool::handle_failure`](crate::ProxyPool::handle_failure).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyAssignment {
    /// The assigned proxy address.
    pub proxy: Option<String>,
    /// `Proxy-Authorization` header value, set only for authenticated proxies.
    pub proxy_authorization: Option<String>,
    /// The credential handed out for this request.
    pub credential: Option<Credential>,
    /// True when the request is being retried after a failure through its proxy.
    pub exception: bool,
}

impl ProxyAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a proxy was assigned.
    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Whether the pool must leave this assignment alone: it already has a proxy and
    /// that proxy has not failed.
    pub fn is_sticky(&self) -> bool {
        self.has_proxy() && !self.exception
    }
}
