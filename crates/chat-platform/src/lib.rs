use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chat_core::{ChatError, ChatErrorCategory, Credential};
use thiserror::Error;
use tracing::debug;

mod file_store;

pub use file_store::FileCredentialStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    #[error("credential not found")]
    NotFound,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

impl From<CredentialStoreError> for ChatError {
    fn from(err: CredentialStoreError) -> Self {
        let code = match err {
            CredentialStoreError::NotFound => "credential_not_found",
            CredentialStoreError::Unavailable(_) => "credential_store_unavailable",
            CredentialStoreError::Backend(_) => "credential_store_failed",
        };
        ChatError::new(ChatErrorCategory::Storage, code, err.to_string())
    }
}

/// Entries a login flow leaves behind for the chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Token,
    UserId,
    Role,
}

impl CredentialKey {
    /// Storage key name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::UserId => "userId",
            Self::Role => "role",
        }
    }
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Result<String, CredentialStoreError>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialStoreError>;

    fn delete(&self, key: CredentialKey) -> Result<(), CredentialStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    data: Arc<RwLock<HashMap<CredentialKey, String>>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<String, CredentialStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&key).cloned().ok_or(CredentialStoreError::NotFound)
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(key, value.to_owned());
        Ok(())
    }

    fn delete(&self, key: CredentialKey) -> Result<(), CredentialStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CredentialStoreError::Backend("poisoned lock".to_owned()))?;
        if data.remove(&key).is_none() {
            return Err(CredentialStoreError::NotFound);
        }
        Ok(())
    }
}

/// Credentials kept in the OS keyring under one service name.
#[cfg(feature = "os-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

#[cfg(feature = "os-keyring")]
impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: CredentialKey) -> Result<keyring::Entry, CredentialStoreError> {
        keyring::Entry::new(&self.service, key.as_str())
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<String, CredentialStoreError> {
        self.entry(key)?.get_password().map_err(map_keyring_error)
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialStoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(map_keyring_error)
    }

    fn delete(&self, key: CredentialKey) -> Result<(), CredentialStoreError> {
        self.entry(key)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> CredentialStoreError {
    match err {
        keyring::Error::NoEntry => CredentialStoreError::NotFound,
        keyring::Error::PlatformFailure(inner) | keyring::Error::NoStorageAccess(inner) => {
            CredentialStoreError::Unavailable(inner.to_string())
        }
        other => CredentialStoreError::Backend(other.to_string()),
    }
}

/// Session inputs found in a credential store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub token: Option<Credential>,
    pub user_id: Option<String>,
}

/// Read the token and user id. Missing or blank entries are `None`; only
/// store failures are errors.
pub fn load_session_credentials(
    store: &dyn CredentialStore,
) -> Result<StoredSession, CredentialStoreError> {
    let token = read_optional(store, CredentialKey::Token)?.and_then(Credential::new);
    let user_id = read_optional(store, CredentialKey::UserId)?
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty());
    debug!(
        has_token = token.is_some(),
        has_user_id = user_id.is_some(),
        "loaded stored chat credentials"
    );
    Ok(StoredSession { token, user_id })
}

fn read_optional(
    store: &dyn CredentialStore,
    key: CredentialKey,
) -> Result<Option<String>, CredentialStoreError> {
    match store.get(key) {
        Ok(value) => Ok(Some(value)),
        Err(CredentialStoreError::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip() {
        let store = InMemoryCredentialStore::default();
        store
            .set(CredentialKey::Token, "jwt-abc")
            .expect("set should work");
        assert_eq!(store.get(CredentialKey::Token).expect("get"), "jwt-abc");

        store.delete(CredentialKey::Token).expect("delete should work");
        assert_eq!(
            store.get(CredentialKey::Token),
            Err(CredentialStoreError::NotFound)
        );
        assert_eq!(
            store.delete(CredentialKey::Token),
            Err(CredentialStoreError::NotFound)
        );
    }

    #[test]
    fn loads_present_credentials() {
        let store = InMemoryCredentialStore::default();
        store.set(CredentialKey::Token, "jwt-abc").expect("set");
        store.set(CredentialKey::UserId, " 42 ").expect("set");
        store.set(CredentialKey::Role, "STUDENT").expect("set");

        let session = load_session_credentials(&store).expect("load");
        assert_eq!(session.token, Credential::new("jwt-abc"));
        assert_eq!(session.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn absent_or_blank_entries_are_none() {
        let store = InMemoryCredentialStore::default();
        store.set(CredentialKey::Token, "   ").expect("set");

        let session = load_session_credentials(&store).expect("load");
        assert_eq!(session, StoredSession::default());
    }

    struct FailingStore;

    impl CredentialStore for FailingStore {
        fn get(&self, _key: CredentialKey) -> Result<String, CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn set(&self, _key: CredentialKey, _value: &str) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn delete(&self, _key: CredentialKey) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[test]
    fn store_failure_propagates_as_storage_error() {
        let err = load_session_credentials(&FailingStore).expect_err("load must fail");
        assert_eq!(
            err,
            CredentialStoreError::Unavailable("mock outage".to_owned())
        );

        let chat: ChatError = err.into();
        assert_eq!(chat.category, ChatErrorCategory::Storage);
        assert_eq!(chat.code, "credential_store_unavailable");
    }

    #[test]
    fn key_names_match_login_flow() {
        assert_eq!(CredentialKey::Token.as_str(), "token");
        assert_eq!(CredentialKey::UserId.as_str(), "userId");
        assert_eq!(CredentialKey::Role.as_str(), "role");
    }
}
