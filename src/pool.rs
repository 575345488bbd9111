//! Core proxy pool implementation.

use crate::config::{ProxyPoolConfig, SelectionMode};
use crate::error::{ConfigError, ProxyPoolError, Result};
use crate::proxy::{Credential, ProxyAssignment, ProxyEntry};
use crate::utils;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::seq::{IndexedRandom, IteratorRandom};
use std::collections::HashMap;

/// Mapping and session state, always accessed under one lock.
#[derive(Debug, Default)]
struct PoolState {
    /// Proxy address -> logins, in the order they were listed. Never holds an empty list.
    proxies: HashMap<String, Vec<Credential>>,
    /// The pinned address for `PinnedRandom` and `FixedSingle`.
    chosen_proxy: Option<String>,
    /// The login most recently handed out.
    chosen_credential: Option<Credential>,
}

impl PoolState {
    fn from_entries(entries: Vec<ProxyEntry>) -> Self {
        let mut proxies: HashMap<String, Vec<Credential>> = HashMap::new();
        for entry in entries {
            proxies.entry(entry.address).or_default().push(entry.credential);
        }
        Self {
            proxies,
            ..Self::default()
        }
    }

    fn random_address(&self) -> Result<String> {
        self.proxies
            .keys()
            .choose(&mut rand::rng())
            .cloned()
            .ok_or(ProxyPoolError::PoolExhausted)
    }

    fn pick_credential(&mut self, address: &str) -> Result<Credential> {
        let credentials = self
            .proxies
            .get(address)
            .filter(|creds| !creds.is_empty())
            .ok_or_else(|| ProxyPoolError::NotFound(address.to_string()))?;

        let picked = if credentials.len() > 1 {
            credentials.choose(&mut rand::rng())
        } else {
            credentials.last()
        };
        let chosen = picked
            .cloned()
            .ok_or_else(|| ProxyPoolError::NotFound(address.to_string()))?;

        self.chosen_credential = Some(chosen.clone());
        Ok(chosen)
    }

    /// Drop `credential` from `address`, and the address itself once it has no logins left.
    /// Entries already removed by an earlier failure are ignored.
    fn evict(&mut self, address: &str, credential: Option<&Credential>) {
        let Some(credentials) = self.proxies.get_mut(address) else {
            debug!("Proxy {} already removed", address);
            return;
        };

        if let Some(position) = credential.and_then(|c| credentials.iter().position(|x| x == c)) {
            let removed = credentials.remove(position);
            info!(
                "Removing failed login {} for {}, {} logins left",
                removed,
                address,
                credentials.len()
            );
        }

        if credentials.is_empty() {
            self.proxies.remove(address);
            info!(
                "Removing failed proxy <{}>, {} proxies left",
                address,
                self.proxies.len()
            );
        }
    }
}

/// A pool of upstream proxies with per-address logins and failure-driven eviction.
///
/// The pool only shrinks. Once the last address is evicted every
/// [`prepare_request`](Self::prepare_request) fails with [`ProxyPoolError::PoolExhausted`].
#[derive(Debug)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
    mode: SelectionMode,
    suppress_eviction: bool,
}

impl ProxyPool {
    /// Build a pool from the given configuration.
    pub fn new(config: &ProxyPoolConfig) -> Result<Self> {
        let mut state = match config.mode {
            SelectionMode::PerRequestRandom | SelectionMode::PinnedRandom => {
                let source = config
                    .proxy_list
                    .as_ref()
                    .ok_or(ConfigError::MissingProxyList)?;
                let lines = utils::read_proxy_lines(source)?;
                let entries = utils::parse_proxy_list(&lines);
                if entries.is_empty() {
                    return Err(ConfigError::EmptyProxyList.into());
                }
                PoolState::from_entries(entries)
            }
            SelectionMode::FixedSingle => {
                let custom = config
                    .custom_proxy
                    .as_deref()
                    .ok_or(ConfigError::MissingCustomProxy)?;
                let entry = utils::parse_proxy_line(custom)
                    .ok_or_else(|| ConfigError::MalformedCustomProxy(custom.to_string()))?;
                let address = entry.address.clone();
                let mut state = PoolState::from_entries(vec![entry]);
                state.chosen_proxy = Some(address);
                state
            }
        };

        if config.mode == SelectionMode::PinnedRandom {
            state.chosen_proxy = Some(state.random_address()?);
        }

        let logins: usize = state.proxies.values().map(Vec::len).sum();
        info!(
            "Proxy pool initialized in {} mode with {} proxies and {} logins",
            config.mode.as_str(),
            state.proxies.len(),
            logins
        );
        if let Some(chosen) = &state.chosen_proxy {
            info!("Using proxy <{}> for all requests", chosen);
        }

        Ok(Self {
            state: Mutex::new(state),
            mode: config.mode,
            suppress_eviction: config.suppress_eviction,
        })
    }

    /// Assign a proxy and, when it has a login, a `Proxy-Authorization` value to a request.
    ///
    /// An assignment that already carries a proxy and is not flagged as a retry after a
    /// failure is left untouched, so a request keeps its proxy across re-entries. A flagged
    /// (or empty) assignment is cleared of the flag and gets a fresh proxy.
    pub fn prepare_request(&self, assignment: &mut ProxyAssignment) -> Result<()> {
        if assignment.is_sticky() {
            return Ok(());
        }
        assignment.exception = false;

        let mut state = self.state.lock();
        if state.proxies.is_empty() {
            warn!("All proxies are unusable, cannot proceed");
            return Err(ProxyPoolError::PoolExhausted);
        }

        let address = match self.mode {
            SelectionMode::PerRequestRandom => state.random_address()?,
            SelectionMode::PinnedRandom | SelectionMode::FixedSingle => state
                .chosen_proxy
                .clone()
                .ok_or(ProxyPoolError::PoolExhausted)?,
        };
        let credential = state.pick_credential(&address)?;

        assignment.proxy_authorization = credential.basic_auth();
        if assignment.proxy_authorization.is_none() {
            debug!("Proxy user pass not found for <{}>", address);
        }
        debug!(
            "Using proxy <{}>, {} proxies left",
            address,
            state.proxies.len()
        );
        assignment.proxy = Some(address);
        assignment.credential = Some(credential);
        Ok(())
    }

    /// React to a failed request: evict the login it used, and its address once no logins
    /// remain, then flag the assignment so the retry gets a fresh proxy.
    ///
    /// Assignments without a proxy are ignored. With eviction suppressed nothing is removed.
    /// In `PinnedRandom` mode a new address is pinned when the failed one was pinned; an
    /// empty pool makes that fail with [`ProxyPoolError::PoolExhausted`].
    pub fn handle_failure(&self, assignment: &mut ProxyAssignment) -> Result<()> {
        let Some(address) = assignment.proxy.clone() else {
            return Ok(());
        };
        assignment.exception = true;

        if self.suppress_eviction {
            info!(
                "Will not remove proxy <{}> because eviction is suppressed",
                address
            );
            return Ok(());
        }

        let mut state = self.state.lock();
        let credential = assignment
            .credential
            .clone()
            .or_else(|| state.chosen_credential.clone());
        state.evict(&address, credential.as_ref());

        if self.mode == SelectionMode::PinnedRandom {
            let pinned_gone = state
                .chosen_proxy
                .as_ref()
                .map_or(true, |chosen| *chosen == address || !state.proxies.contains_key(chosen));
            if pinned_gone {
                match state.random_address() {
                    Ok(next) => {
                        info!("Switching pinned proxy to <{}>", next);
                        state.chosen_proxy = Some(next);
                    }
                    Err(err) => {
                        warn!("No proxy left to pin");
                        state.chosen_proxy = None;
                        return Err(err);
                    }
                }
            }
        } else if state
            .chosen_proxy
            .as_ref()
            .is_some_and(|chosen| !state.proxies.contains_key(chosen))
        {
            warn!("Pinned proxy <{}> evicted, no proxy left to use", address);
            state.chosen_proxy = None;
        }

        Ok(())
    }

    /// The selection mode of this pool.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Whether failures leave the pool untouched.
    pub fn suppress_eviction(&self) -> bool {
        self.suppress_eviction
    }

    /// Number of proxy addresses left.
    pub fn len(&self) -> usize {
        self.state.lock().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().proxies.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.state.lock().proxies.contains_key(address)
    }

    /// Logins left for an address, or `None` once it has been evicted.
    pub fn credentials(&self, address: &str) -> Option<Vec<Credential>> {
        self.state.lock().proxies.get(address).cloned()
    }

    /// The pinned address, if the mode pins one.
    pub fn chosen_proxy(&self) -> Option<String> {
        self.state.lock().chosen_proxy.clone()
    }

    /// The login most recently handed out by [`prepare_request`](Self::prepare_request).
    pub fn chosen_credential(&self) -> Option<Credential> {
        self.state.lock().chosen_credential.clone()
    }

    /// Get statistics about the proxy pool: (addresses, logins).
    pub fn get_stats(&self) -> (usize, usize) {
        let state = self.state.lock();
        let logins = state.proxies.values().map(Vec::len).sum();
        (state.proxies.len(), logins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool_from(mode: SelectionMode, lines: Vec<&str>) -> ProxyPool {
        let config = ProxyPoolConfig::builder()
            .mode(mode)
            .proxy_list_lines(lines)
            .build();
        ProxyPool::new(&config).unwrap()
    }

    fn scenario_pool(mode: SelectionMode) -> ProxyPool {
        pool_from(
            mode,
            vec!["http://a:b@p1:8080", "http://c:d@p1:8080", "http://p2:8080"],
        )
    }

    #[test]
    fn test_pick_credential_for_unknown_address_is_not_found() {
        let mut state = PoolState::from_entries(vec![ProxyEntry {
            address: "http://p1:8080".to_string(),
            credential: Credential::new("a:b"),
        }]);

        assert!(matches!(
            state.pick_credential("http://missing:8080"),
            Err(ProxyPoolError::NotFound(address)) if address == "http://missing:8080"
        ));
        assert!(state.chosen_credential.is_none());

        state.proxies.insert("http://drained:8080".to_string(), Vec::new());
        assert!(matches!(
            state.pick_credential("http://drained:8080"),
            Err(ProxyPoolError::NotFound(_))
        ));

        assert_eq!(
            state.pick_credential("http://p1:8080").unwrap(),
            Credential::new("a:b")
        );
        assert_eq!(state.chosen_credential, Some(Credential::new("a:b")));
    }

    #[test]
    fn test_lines_sharing_an_address_accumulate_logins() {
        let pool = scenario_pool(SelectionMode::PerRequestRandom);

        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool.credentials("http://p1:8080").unwrap(),
            vec![Credential::new("a:b"), Credential::new("c:d")]
        );
        assert_eq!(
            pool.credentials("http://p2:8080").unwrap(),
            vec![Credential::none()]
        );
        assert_eq!(pool.get_stats(), (2, 3));
    }

    #[test]
    fn test_missing_proxy_list_is_config_error() {
        for mode in [SelectionMode::PerRequestRandom, SelectionMode::PinnedRandom] {
            let config = ProxyPoolConfig::builder().mode(mode).build();
            assert!(matches!(
                ProxyPool::new(&config),
                Err(ProxyPoolError::Config(ConfigError::MissingProxyList))
            ));
        }
    }

    #[test]
    fn test_list_without_usable_lines_is_config_error() {
        let config = ProxyPoolConfig::builder()
            .proxy_list_lines(vec!["", "# nothing here", "10.0.0.1:80"])
            .build();
        assert!(matches!(
            ProxyPool::new(&config),
            Err(ProxyPoolError::Config(ConfigError::EmptyProxyList))
        ));
    }

    #[test]
    fn test_fixed_single_requires_well_formed_proxy() {
        let missing = ProxyPoolConfig::builder()
            .mode(SelectionMode::FixedSingle)
            .build();
        assert!(matches!(
            ProxyPool::new(&missing),
            Err(ProxyPoolError::Config(ConfigError::MissingCustomProxy))
        ));

        let malformed = ProxyPoolConfig::builder()
            .mode(SelectionMode::FixedSingle)
            .custom_proxy("localhost:3128")
            .build();
        assert!(matches!(
            ProxyPool::new(&malformed),
            Err(ProxyPoolError::Config(ConfigError::MalformedCustomProxy(_)))
        ));
    }

    #[test]
    fn test_per_request_random_spreads_across_addresses() {
        let pool = scenario_pool(SelectionMode::PerRequestRandom);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for _ in 0..1000 {
            let mut assignment = ProxyAssignment::new();
            pool.prepare_request(&mut assignment).unwrap();
            let proxy = assignment.proxy.unwrap();
            assert!(pool.contains(&proxy));
            *counts.entry(proxy).or_default() += 1;
        }

        let p1 = counts.get("http://p1:8080").copied().unwrap_or(0);
        let p2 = counts.get("http://p2:8080").copied().unwrap_or(0);
        assert_eq!(p1 + p2, 1000);
        assert!(p1 > 350 && p2 > 350, "uneven split: p1={} p2={}", p1, p2);
    }

    #[test]
    fn test_prepare_sets_auth_only_for_logins() {
        let pool = pool_from(SelectionMode::PerRequestRandom, vec!["http://user:pass@p1:8080"]);
        let mut assignment = ProxyAssignment::new();
        pool.prepare_request(&mut assignment).unwrap();
        assert_eq!(assignment.proxy.as_deref(), Some("http://p1:8080"));
        assert_eq!(
            assignment.proxy_authorization.as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
        assert_eq!(pool.chosen_credential(), Some(Credential::new("user:pass")));

        let pool = pool_from(SelectionMode::PerRequestRandom, vec!["http://p2:8080"]);
        let mut assignment = ProxyAssignment::new();
        pool.prepare_request(&mut assignment).unwrap();
        assert_eq!(assignment.proxy.as_deref(), Some("http://p2:8080"));
        assert!(assignment.proxy_authorization.is_none());
    }

    #[test]
    fn test_prepare_leaves_working_assignment_alone() {
        let pool = scenario_pool(SelectionMode::PerRequestRandom);
        let mut assignment = ProxyAssignment {
            proxy: Some("http://elsewhere:1".to_string()),
            ..ProxyAssignment::default()
        };
        let before = assignment.clone();

        pool.prepare_request(&mut assignment).unwrap();
        assert_eq!(assignment, before);
    }

    #[test]
    fn test_prepare_reassigns_after_failure() {
        let pool = pool_from(SelectionMode::PerRequestRandom, vec!["http://p2:8080"]);
        let mut assignment = ProxyAssignment {
            proxy: Some("http://old:1".to_string()),
            exception: true,
            ..ProxyAssignment::default()
        };

        pool.prepare_request(&mut assignment).unwrap();
        assert_eq!(assignment.proxy.as_deref(), Some("http://p2:8080"));
        assert!(!assignment.exception);
    }

    #[test]
    fn test_failure_evicts_only_the_used_login() {
        let pool = pool_from(
            SelectionMode::PerRequestRandom,
            vec!["http://a:b@p1:8080", "http://c:d@p1:8080"],
        );
        let mut assignment = ProxyAssignment {
            proxy: Some("http://p1:8080".to_string()),
            credential: Some(Credential::new("a:b")),
            ..ProxyAssignment::default()
        };

        pool.handle_failure(&mut assignment).unwrap();
        assert!(assignment.exception);
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool.credentials("http://p1:8080").unwrap(),
            vec![Credential::new("c:d")]
        );
    }

    #[test]
    fn test_failure_of_last_login_removes_address() {
        let pool = pool_from(
            SelectionMode::PerRequestRandom,
            vec!["http://a:b@p1:8080", "http://p2:8080"],
        );
        let mut assignment = ProxyAssignment::new();
        while assignment.proxy.as_deref() != Some("http://p1:8080") {
            assignment = ProxyAssignment::new();
            pool.prepare_request(&mut assignment).unwrap();
        }

        pool.handle_failure(&mut assignment).unwrap();
        assert!(!pool.contains("http://p1:8080"));
        assert_eq!(pool.get_stats(), (1, 1));
    }

    #[test]
    fn test_eviction_is_idempotent() {
        let pool = scenario_pool(SelectionMode::PerRequestRandom);
        let mut first = ProxyAssignment {
            proxy: Some("http://p1:8080".to_string()),
            credential: Some(Credential::new("a:b")),
            ..ProxyAssignment::default()
        };
        let mut second = first.clone();

        pool.handle_failure(&mut first).unwrap();
        pool.handle_failure(&mut second).unwrap();
        assert_eq!(pool.get_stats(), (2, 2));

        let mut gone = ProxyAssignment {
            proxy: Some("http://p2:8080".to_string()),
            credential: Some(Credential::none()),
            ..ProxyAssignment::default()
        };
        let mut again = gone.clone();
        pool.handle_failure(&mut gone).unwrap();
        pool.handle_failure(&mut again).unwrap();
        assert_eq!(pool.get_stats(), (1, 1));
    }

    #[test]
    fn test_failure_without_proxy_is_noop() {
        let pool = scenario_pool(SelectionMode::PerRequestRandom);
        let mut assignment = ProxyAssignment::new();
        pool.handle_failure(&mut assignment).unwrap();
        assert!(!assignment.exception);
        assert_eq!(pool.get_stats(), (2, 3));
    }

    #[test]
    fn test_suppressed_eviction_keeps_pool() {
        let config = ProxyPoolConfig::builder()
            .proxy_list_lines(vec!["http://a:b@p1:8080", "http://p2:8080"])
            .suppress_eviction(true)
            .build();
        let pool = ProxyPool::new(&config).unwrap();

        for _ in 0..20 {
            let mut assignment = ProxyAssignment::new();
            pool.prepare_request(&mut assignment).unwrap();
            pool.handle_failure(&mut assignment).unwrap();
            assert!(assignment.exception);
        }
        assert_eq!(pool.get_stats(), (2, 2));
    }

    #[test]
    fn test_fixed_single_uses_configured_proxy_until_evicted() {
        let config = ProxyPoolConfig::builder()
            .mode(SelectionMode::FixedSingle)
            .custom_proxy("http://u:p@fixed:3128")
            .build();
        let pool = ProxyPool::new(&config).unwrap();
        assert_eq!(pool.chosen_proxy().as_deref(), Some("http://fixed:3128"));

        let mut last = ProxyAssignment::new();
        for _ in 0..10 {
            last = ProxyAssignment::new();
            pool.prepare_request(&mut last).unwrap();
            assert_eq!(last.proxy.as_deref(), Some("http://fixed:3128"));
        }

        pool.handle_failure(&mut last).unwrap();
        assert!(pool.is_empty());
        assert!(pool.chosen_proxy().is_none());

        let mut next = ProxyAssignment::new();
        assert!(matches!(
            pool.prepare_request(&mut next),
            Err(ProxyPoolError::PoolExhausted)
        ));
    }

    #[test]
    fn test_pinned_random_keeps_proxy_until_it_fails() {
        let pool = pool_from(
            SelectionMode::PinnedRandom,
            vec!["http://p1:8080", "http://p2:8080", "http://p3:8080"],
        );
        let pinned = pool.chosen_proxy().unwrap();

        for _ in 0..50 {
            let mut assignment = ProxyAssignment::new();
            pool.prepare_request(&mut assignment).unwrap();
            assert_eq!(assignment.proxy.as_ref(), Some(&pinned));
        }
        assert_eq!(pool.chosen_proxy().as_ref(), Some(&pinned));

        let mut failed = ProxyAssignment::new();
        pool.prepare_request(&mut failed).unwrap();
        pool.handle_failure(&mut failed).unwrap();

        let next = pool.chosen_proxy().unwrap();
        assert_ne!(next, pinned);
        assert!(pool.contains(&next));
    }

    #[test]
    fn test_pinned_random_stale_failure_keeps_pin() {
        let pool = pool_from(
            SelectionMode::PinnedRandom,
            vec!["http://p1:8080", "http://p2:8080", "http://p3:8080"],
        );
        let pinned = pool.chosen_proxy().unwrap();
        let other = ["http://p1:8080", "http://p2:8080", "http://p3:8080"]
            .into_iter()
            .find(|a| *a != pinned)
            .unwrap();

        let mut stale = ProxyAssignment {
            proxy: Some(other.to_string()),
            credential: Some(Credential::none()),
            ..ProxyAssignment::default()
        };
        pool.handle_failure(&mut stale).unwrap();

        assert!(!pool.contains(other));
        assert_eq!(pool.chosen_proxy(), Some(pinned));
    }

    #[test]
    fn test_pinned_random_exhaustion_is_surfaced() {
        let pool = pool_from(SelectionMode::PinnedRandom, vec!["http://only:8080"]);
        let mut assignment = ProxyAssignment::new();
        pool.prepare_request(&mut assignment).unwrap();

        assert!(matches!(
            pool.handle_failure(&mut assignment),
            Err(ProxyPoolError::PoolExhausted)
        ));
        assert!(assignment.exception);
        assert!(pool.chosen_proxy().is_none());
        assert!(matches!(
            pool.prepare_request(&mut assignment),
            Err(ProxyPoolError::PoolExhausted)
        ));
    }

    #[test]
    fn test_concurrent_prepare_and_failure() {
        let lines: Vec<String> = (0..20)
            .flat_map(|i| {
                vec![
                    format!("http://u{}:p@proxy{}:8080", i, i),
                    format!("http://v{}:p@proxy{}:8080", i, i),
                ]
            })
            .collect();
        let config = ProxyPoolConfig::builder().proxy_list_lines(lines).build();
        let pool = Arc::new(ProxyPool::new(&config).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let mut assignment = ProxyAssignment::new();
                        if pool.prepare_request(&mut assignment).is_err() {
                            return;
                        }
                        pool.handle_failure(&mut assignment).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (addresses, logins) = pool.get_stats();
        assert!(logins <= 40);
        assert!(addresses <= 20);
        for address in (0..20).map(|i| format!("http://proxy{}:8080", i)) {
            if let Some(creds) = pool.credentials(&address) {
                assert!(!creds.is_empty());
            }
        }
    }
}
