use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Credential, TokenStore};
use crate::error::Result;

/// Keeps the credential in process memory. Default store of a client.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `credential`.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, credential: &Credential) -> Result<()> {
        *self.credential.write().await = Some(credential.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>> {
        Ok(self.credential.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_replaces_credential() {
        let expires_at = Utc::now() + TimeDelta::seconds(3600);
        let store = MemoryTokenStore::with_credential(Credential::new("tok-1", expires_at));

        store
            .save(&Credential::new("tok-2", expires_at))
            .await
            .unwrap();

        let credential = store.load().await.unwrap().unwrap();
        assert_eq!(credential.token(), "tok-2");
        assert_eq!(credential.expires_at(), expires_at);
    }
}
