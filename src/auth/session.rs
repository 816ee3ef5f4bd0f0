// Client-side session state
//
// The token set and the cached user/menu/permission/language entries share one
// namespace in the credential store and are only ever cleared together.

use std::sync::Arc;

use super::store::CredentialStore;
use super::types::{
    TokenSet, ACCESS_TOKEN_KEY, EXPIRES_KEY, REFRESH_TOKEN_KEY, SESSION_ENTRY_KEYS,
    TOKEN_KEYS, TOKEN_TYPE_KEY,
};
use crate::error::StoreError;

/// Authenticated session backed by a credential store
pub struct Session {
    store: Arc<dyn CredentialStore>,
    namespace: String,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    /// Every store key owned by this session
    pub fn keys(&self) -> Vec<String> {
        TOKEN_KEYS
            .iter()
            .chain(SESSION_ENTRY_KEYS.iter())
            .map(|name| self.key(name))
            .collect()
    }

    /// Current token set, if a complete one is stored
    pub fn token_set(&self) -> Result<Option<TokenSet>, StoreError> {
        let keys = [ACCESS_TOKEN_KEY, TOKEN_TYPE_KEY, EXPIRES_KEY, REFRESH_TOKEN_KEY]
            .map(|name| self.key(name));
        // One batch, so a concurrent replacement is seen whole or not at all
        let mut values = self.store.get_many(&keys)?.into_iter();
        let access = values.next().flatten();
        let token_type = values.next().flatten();
        let expires = values.next().flatten();
        let refresh = values.next().flatten();

        let any_present =
            access.is_some() || token_type.is_some() || expires.is_some() || refresh.is_some();

        let token_set = TokenSet::from_entries(access, token_type, expires, refresh);
        if token_set.is_none() && any_present {
            tracing::warn!(
                namespace = %self.namespace,
                "Incomplete token set in store, treating session as unauthenticated"
            );
        }

        Ok(token_set)
    }

    /// Replace the whole token set in one store batch
    pub fn replace_token_set(&self, token_set: &TokenSet) -> Result<(), StoreError> {
        let entries: Vec<(String, String)> = token_set
            .to_entries()
            .into_iter()
            .map(|(name, value)| (self.key(name), value))
            .collect();

        self.store.set_many(&entries)?;

        tracing::debug!(
            namespace = %self.namespace,
            expires_at = %token_set.expires_at.to_rfc3339(),
            "Token set replaced"
        );
        Ok(())
    }

    /// Read a cached session entry (user info, menu, language, ...)
    pub fn entry(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.store.get(&self.key(name))
    }

    /// Write a cached session entry
    pub fn set_entry(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.store.set(&self.key(name), value)
    }

    /// Drop the token set and every cached entry in one store batch.
    /// Clearing an already empty session succeeds.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove_many(&self.keys())?;
        tracing::info!(namespace = %self.namespace, "Session cleared");
        Ok(())
    }

    /// True when no key of this session is present in the store
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_many(&self.keys())?
            .iter()
            .all(Option::is_none))
    }
}
