//! Authorization modes, scope sets and cache keys.

use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Trust model a token is issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Machine-to-machine service account, no human present.
    Service,
    /// Human-delegated identity obtained through interactive consent.
    User,
}

impl AuthMode {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::User => "user",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalised, non-empty set of OAuth scopes.
///
/// Scopes are trimmed, de-duplicated and kept sorted, so two sets built from
/// the same scopes in a different order compare (and hash) equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Build a scope set, rejecting empty input and blank entries.
    pub fn new<I, S>(scopes: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for scope in scopes {
            let scope = scope.as_ref().trim();
            if scope.is_empty() {
                return Err(AuthError::validation("scope entries must not be blank"));
            }
            if scope.chars().any(char::is_whitespace) {
                return Err(AuthError::validation(format!(
                    "scope '{scope}' must not contain whitespace"
                )));
            }
            set.insert(scope.to_string());
        }
        if set.is_empty() {
            return Err(AuthError::validation("at least one scope is required"));
        }
        Ok(Self(set.into_iter().collect()))
    }

    /// Parse a space-delimited scope string, as found in token responses.
    pub fn parse(scopes: &str) -> AuthResult<Self> {
        Self::new(scopes.split_whitespace())
    }

    /// The sorted scopes.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Space-delimited form used on the wire.
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }

    /// Number of distinct scopes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `scope` is part of this set.
    pub fn contains(&self, scope: &str) -> bool {
        self.0.binary_search_by(|s| s.as_str().cmp(scope)).is_ok()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl TryFrom<Vec<String>> for ScopeSet {
    type Error = AuthError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(value: ScopeSet) -> Self {
        value.0
    }
}

/// Cache key: one entry per (mode, scope set).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Trust model.
    pub mode: AuthMode,
    /// Normalised scopes.
    pub scopes: ScopeSet,
}

impl CacheKey {
    /// Create a new key.
    pub fn new(mode: AuthMode, scopes: ScopeSet) -> Self {
        Self { mode, scopes }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.mode, self.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn test_scope_order_is_irrelevant() {
        let a = ScopeSet::new(["data:write", "data:read"]).unwrap();
        let b = ScopeSet::new(["data:read", "data:write", "data:read"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.joined(), "data:read data:write");

        let keys: HashSet<_> = [
            CacheKey::new(AuthMode::User, a.clone()),
            CacheKey::new(AuthMode::User, b),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_modes_produce_distinct_keys() {
        let scopes = ScopeSet::new(["data:read"]).unwrap();
        assert_ne!(
            CacheKey::new(AuthMode::User, scopes.clone()),
            CacheKey::new(AuthMode::Service, scopes)
        );
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::blank(vec!["data:read", "  "])]
    #[case::embedded_space(vec!["data:read account:read"])]
    fn test_invalid_scopes_rejected(#[case] scopes: Vec<&str>) {
        let err = ScopeSet::new(scopes).unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn test_parse_space_delimited() {
        let scopes = ScopeSet::parse(" data:read  account:read ").unwrap();
        assert_eq!(scopes.as_slice(), &["account:read", "data:read"]);
        assert!(scopes.contains("data:read"));
        assert!(!scopes.contains("data:write"));
    }

    #[test]
    fn test_try_from_vec_normalises() {
        let scopes = ScopeSet::try_from(vec!["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(scopes.joined(), "a b");
        assert!(ScopeSet::try_from(Vec::new()).is_err());
    }
}
