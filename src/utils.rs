//! Utility functions for reading and parsing proxy lists.

use crate::config::ProxyListSource;
use crate::error::ConfigError;
use crate::proxy::{Credential, ProxyEntry};

use log::debug;

/// Read the raw lines of a proxy list source.
pub(crate) fn read_proxy_lines(source: &ProxyListSource) -> Result<Vec<String>, ConfigError> {
    match source {
        ProxyListSource::File(path) => std::fs::read_to_string(path)
            .map(|content| content.lines().map(str::to_string).collect())
            .map_err(|source| ConfigError::ProxyListIo {
                path: path.clone(),
                source,
            }),
        ProxyListSource::Lines(lines) => Ok(lines.clone()),
    }
}

/// Parse every line that looks like a proxy URL, skipping blanks, comments and junk.
pub(crate) fn parse_proxy_list<S: AsRef<str>>(lines: &[S]) -> Vec<ProxyEntry> {
    lines
        .iter()
        .filter_map(|line| {
            let line = line.as_ref();
            let entry = parse_proxy_line(line);
            if entry.is_none() && !line.trim().is_empty() {
                debug!("Skipping malformed proxy line: {}", line.trim());
            }
            entry
        })
        .collect()
}

/// Parse `scheme://[user:pass@]rest` into the credential-free address and the login.
///
/// The scheme is one or more word characters. The login runs up to the first `:` for the
/// user and up to the next `@` for the password; both must be non-empty and something must
/// follow the `@`, otherwise the whole remainder after `://` becomes part of the address.
pub(crate) fn parse_proxy_line(line: &str) -> Option<ProxyEntry> {
    let line = line.trim();
    let (scheme, remainder) = line.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let (credential, rest) = match split_login(remainder) {
        Some((user_pass, rest)) => (Credential::new(user_pass), rest),
        None => (Credential::none(), remainder),
    };
    if rest.is_empty() {
        return None;
    }

    Some(ProxyEntry {
        address: format!("{}://{}", scheme, rest),
        credential,
    })
}

fn split_login(remainder: &str) -> Option<(&str, &str)> {
    let colon = remainder.find(':')?;
    let user = &remainder[..colon];
    if user.is_empty() {
        return None;
    }
    let after_user = &remainder[colon + 1..];
    let at = after_user.find('@')?;
    if at == 0 {
        return None;
    }
    let rest = &after_user[at + 1..];
    // The address after the login must not be empty.
    if rest.is_empty() {
        return None;
    }
    Some((&remainder[..colon + 1 + at], rest))
}
