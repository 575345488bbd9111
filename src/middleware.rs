//! Middleware implementation for reqwest.

use crate::config::ProxyPoolConfig;
use crate::error::ProxyPoolError;
use crate::pool::ProxyPool;
use crate::proxy::{Credential, ProxyAssignment};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::header::{HeaderValue, PROXY_AUTHORIZATION};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Middleware that sends every request through a proxy picked by a [`ProxyPool`].
///
/// The request's [`ProxyAssignment`] lives in its extensions. A caller may put one there
/// beforehand to keep a request on a known proxy; after the call it holds the proxy that
/// was used last.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    retry_count: usize,
    request_timeout: Duration,
}

impl ProxyPoolMiddleware {
    /// Create a new proxy pool middleware with the given configuration.
    pub fn new(config: &ProxyPoolConfig) -> std::result::Result<Self, ProxyPoolError> {
        let pool = Arc::new(ProxyPool::new(config)?);
        Ok(Self::with_pool(pool, config))
    }

    /// Wrap a pool that is shared with other components.
    pub fn with_pool(pool: Arc<ProxyPool>, config: &ProxyPoolConfig) -> Self {
        let (addresses, logins) = pool.get_stats();
        info!(
            "Proxy pool middleware ready with {} proxies and {} logins",
            addresses, logins
        );
        Self {
            pool,
            retry_count: config.retry_count,
            request_timeout: config.request_timeout,
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Client routed through `address`. The login goes through `Proxy::basic_auth`, so HTTP
    /// proxies get a Basic header and SOCKS5 proxies a username/password handshake.
    fn build_client(
        &self,
        address: &str,
        assignment: &ProxyAssignment,
    ) -> std::result::Result<reqwest::Client, reqwest::Error> {
        let mut proxy = reqwest::Proxy::all(address)?;
        match assignment.credential.as_ref().and_then(Credential::user_pass) {
            Some((user, pass)) => proxy = proxy.basic_auth(user, pass),
            None => {
                if let Some(auth) = auth_header(assignment) {
                    proxy = proxy.custom_http_auth(auth);
                }
            }
        }
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.request_timeout)
            .build()
    }
}

fn auth_header(assignment: &ProxyAssignment) -> Option<HeaderValue> {
    assignment
        .proxy_authorization
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
}

// Only plain http sent to an HTTP proxy carries the header on the request itself. Tunnelled
// requests (https targets, SOCKS proxies) would hand it to the target.
fn sends_proxy_header(proxy_url: &str, target: &Url) -> bool {
    let http_proxy = proxy_url.starts_with("http://") || proxy_url.starts_with("https://");
    http_proxy && target.scheme() == "http"
}

fn pool_error(err: ProxyPoolError) -> Error {
    Error::Middleware(anyhow!(err))
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let mut assignment = extensions.remove::<ProxyAssignment>().unwrap_or_default();
        let mut retry_count = 0;

        loop {
            if let Err(err) = self.pool.prepare_request(&mut assignment) {
                let (addresses, logins) = self.pool.get_stats();
                warn!(
                    "No proxy available. Proxies: {}, logins: {}",
                    addresses, logins
                );
                extensions.insert(assignment);
                return Err(pool_error(err));
            }
            let Some(proxy_url) = assignment.proxy.clone() else {
                extensions.insert(assignment);
                return Err(pool_error(ProxyPoolError::PoolExhausted));
            };

            let Some(mut proxied_request) = req.try_clone() else {
                extensions.insert(assignment);
                return Err(Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?"
                        .to_string()
                )));
            };

            let auth = auth_header(&assignment);
            if let Some(auth) = &auth {
                if sends_proxy_header(&proxy_url, proxied_request.url()) {
                    proxied_request
                        .headers_mut()
                        .entry(PROXY_AUTHORIZATION)
                        .or_insert_with(|| auth.clone());
                }
            }

            info!("Using proxy: {} (attempt {})", proxy_url, retry_count + 1);

            let outcome = match self.build_client(&proxy_url, &assignment) {
                Ok(client) => client.execute(proxied_request).await,
                Err(err) => {
                    warn!("Failed to build client with proxy {}: {}", proxy_url, err);
                    Err(err)
                }
            };

            match outcome {
                Ok(response) => {
                    extensions.insert(assignment);
                    return Ok(response);
                }
                Err(err) => {
                    warn!(
                        "Request failed with proxy {} (attempt {}): {}",
                        proxy_url,
                        retry_count + 1,
                        err
                    );
                    if let Err(pool_err) = self.pool.handle_failure(&mut assignment) {
                        extensions.insert(assignment);
                        return Err(pool_error(pool_err));
                    }

                    retry_count += 1;
                    if retry_count > self.retry_count {
                        extensions.insert(assignment);
                        return Err(Error::Reqwest(err));
                    }
                    // Loop will continue with a fresh proxy
                }
            }
        }
    }
}
