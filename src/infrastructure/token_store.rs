use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Keeps the FocusFlow API bearer token across restarts. The authentication
/// flow itself lives in the web app; the desktop backend only stores what the
/// user pasted or the deep link delivered.
pub trait TokenStore: Send + Sync {
    fn save_token(&self, token: &str) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<String>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
    account_name: String,
}

impl KeyringTokenStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new("focusflow.api", "default")
    }
}

impl TokenStore for KeyringTokenStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(InfraError::Credential(
                "token must not be empty".to_string(),
            ));
        }
        self.entry()?
            .set_password(token)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl TokenStore for InMemoryTokenStore {
    fn save_token(&self, token: &str) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.to_string());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<String>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemoryTokenStore::default();
        assert!(store.load_token().expect("load empty").is_none());

        store.save_token("bearer-token").expect("save token");
        assert_eq!(
            store.load_token().expect("load token").as_deref(),
            Some("bearer-token")
        );

        store.delete_token().expect("delete token");
        assert!(store.load_token().expect("load after delete").is_none());
    }
}
