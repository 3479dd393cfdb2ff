// Scope keys: partition patches by page address at a chosen granularity.

use thiserror::Error;
use url::Url;

use crate::types::ScopeGranularity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("page address is empty")]
    Empty,

    #[error("page address `{address}` is not a valid URL: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("page address `{0}` has no origin")]
    OpaqueOrigin(String),
}

/// A parsed page address with its derived scope key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageScope {
    pub granularity: ScopeGranularity,
    pub key: String,
}

impl PageScope {
    pub fn from_address(address: &str, granularity: ScopeGranularity) -> Result<Self, ScopeError> {
        Ok(Self { granularity, key: scope_key(address, granularity)? })
    }
}

/// Derive the scope key for `address`.
///
/// - `Origin` → `scheme://host[:port]`
/// - `Path` → origin + pathname
/// - `Full` → origin + pathname + query string
///
/// The fragment never contributes to the key.
pub fn scope_key(address: &str, granularity: ScopeGranularity) -> Result<String, ScopeError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ScopeError::Empty);
    }

    let url = Url::parse(address).map_err(|e| ScopeError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })?;

    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(ScopeError::OpaqueOrigin(address.to_string()));
    }
    let mut key = origin.ascii_serialization();

    if matches!(granularity, ScopeGranularity::Path | ScopeGranularity::Full) {
        key.push_str(url.path());
    }
    if granularity == ScopeGranularity::Full {
        if let Some(query) = url.query() {
            key.push('?');
            key.push_str(query);
        }
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "https://shop.example.com:8443/items/42?color=red#reviews";

    #[test]
    fn origin_granularity_keeps_scheme_host_port() {
        assert_eq!(
            scope_key(ADDRESS, ScopeGranularity::Origin).unwrap(),
            "https://shop.example.com:8443"
        );
    }

    #[test]
    fn path_granularity_appends_pathname() {
        assert_eq!(
            scope_key(ADDRESS, ScopeGranularity::Path).unwrap(),
            "https://shop.example.com:8443/items/42"
        );
    }

    #[test]
    fn full_granularity_appends_query_but_not_fragment() {
        assert_eq!(
            scope_key(ADDRESS, ScopeGranularity::Full).unwrap(),
            "https://shop.example.com:8443/items/42?color=red"
        );
    }

    #[test]
    fn default_port_is_omitted() {
        assert_eq!(
            scope_key("https://example.com:443/", ScopeGranularity::Origin).unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn full_without_query_matches_path() {
        let full = scope_key("https://example.com/a", ScopeGranularity::Full).unwrap();
        let path = scope_key("https://example.com/a", ScopeGranularity::Path).unwrap();
        assert_eq!(full, path);
    }

    #[test]
    fn rejects_empty_and_relative_addresses() {
        assert_eq!(scope_key("  ", ScopeGranularity::Full), Err(ScopeError::Empty));
        assert!(matches!(
            scope_key("/just/a/path", ScopeGranularity::Full),
            Err(ScopeError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn rejects_opaque_origins() {
        assert!(matches!(
            scope_key("data:text/html,hello", ScopeGranularity::Origin),
            Err(ScopeError::OpaqueOrigin(_))
        ));
    }
}
