//! Authentication gate contract and transport-neutral request headers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Maximum accepted length of a document id.
pub const MAX_DOCUMENT_ID_LEN: usize = 128;

/// Who is behind a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Why a connection attempt was refused.
///
/// A missing document and a non-member user both map to `AccessDenied` so
/// callers cannot probe for document existence.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("authentication failed")]
    AuthFailed,
    #[error("access denied")]
    AccessDenied,
    /// The document id is malformed and cannot name any document.
    #[error("not found")]
    NotFound,
}

impl Rejection {
    /// Stable code used in response bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AuthFailed => "auth_failed",
            Rejection::AccessDenied => "access_denied",
            Rejection::NotFound => "not_found",
        }
    }
}

/// The one-shot result of an authentication check. Never stored.
pub type AccessGrant = Result<Identity, Rejection>;

/// Resolves identity and document access for a connection attempt.
#[async_trait]
pub trait AuthenticationGate: Send + Sync + 'static {
    async fn admit(&self, document_id: &str, headers: &HeaderBag) -> AccessGrant;
}

/// Check that a document id is syntactically valid.
///
/// Ids are opaque to the engine but must be non-empty, bounded, and made of
/// URL-safe characters.
pub fn validate_document_id(document_id: &str) -> Result<(), Rejection> {
    let ok = !document_id.is_empty()
        && document_id.len() <= MAX_DOCUMENT_ID_LEN
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if ok { Ok(()) } else { Err(Rejection::NotFound) }
}

// ==================== HeaderBag ====================

/// Case-insensitive header multimap detached from any HTTP library.
#[derive(Debug, Clone, Default)]
pub struct HeaderBag {
    headers: HashMap<String, Vec<String>>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, e.g. an axum `HeaderMap` iterator.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut bag = Self::new();
        for (name, value) in pairs {
            bag.insert(name.as_ref(), value);
        }
        bag
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Look up a cookie across every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get("cookie")?
            .iter()
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }

    /// Token from an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.get("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            Some(token.trim())
        } else {
            None
        }
    }

    /// Session token from the named cookie, falling back to a bearer header.
    pub fn session_token(&self, cookie_name: &str) -> Option<&str> {
        self.cookie(cookie_name)
            .filter(|token| !token.is_empty())
            .or_else(|| self.bearer_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_lookup_across_headers() {
        let bag = HeaderBag::from_pairs([
            ("Cookie", "theme=dark; docsync_session=abc123"),
            ("cookie", "other=1"),
        ]);
        assert_eq!(bag.cookie("docsync_session"), Some("abc123"));
        assert_eq!(bag.cookie("other"), Some("1"));
        assert_eq!(bag.cookie("missing"), None);
    }

    #[test]
    fn test_session_token_prefers_cookie() {
        let bag = HeaderBag::from_pairs([
            ("Authorization", "Bearer from-header"),
            ("Cookie", "sid=from-cookie"),
        ]);
        assert_eq!(bag.session_token("sid"), Some("from-cookie"));
        assert_eq!(bag.session_token("nope"), Some("from-header"));
    }

    #[test]
    fn test_bearer_requires_scheme() {
        let bag = HeaderBag::from_pairs([("authorization", "Basic Zm9vOmJhcg==")]);
        assert_eq!(bag.bearer_token(), None);
    }

    #[test]
    fn test_document_id_validation() {
        assert!(validate_document_id("doc1").is_ok());
        assert!(validate_document_id("org:doc_1.v2").is_ok());
        assert_eq!(validate_document_id(""), Err(Rejection::NotFound));
        assert_eq!(validate_document_id("../etc"), Err(Rejection::NotFound));
        assert_eq!(
            validate_document_id(&"a".repeat(MAX_DOCUMENT_ID_LEN + 1)),
            Err(Rejection::NotFound)
        );
    }
}
