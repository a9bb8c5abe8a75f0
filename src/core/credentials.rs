use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Key under which the auth layer stores the bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Source of the bearer credential presented on every connection attempt.
///
/// The manager never refreshes credentials; an expired token surfaces as a connection error.
pub trait CredentialSource: Send + Sync + 'static {
    fn access_token(&self) -> Option<String>;
}

/// Shared key-value store written by the auth layer and read on each connect.
#[derive(Clone, Debug, Default)]
pub struct TokenStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(ACCESS_TOKEN_KEY, token);
        store
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl CredentialSource for TokenStore {
    fn access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN_KEY).filter(|token| !token.is_empty())
    }
}

/// Fixed credential, mostly useful for tools and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}
