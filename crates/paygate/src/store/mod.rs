//! Storage of the current access token.
mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use file::*;
pub use memory::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bearer token together with its absolute expiry.
///
/// Credentials are never mutated. A refresh replaces the stored value wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, veil::Redact)]
pub struct Credential {
    #[redact]
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// A credential is usable strictly before its expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Persists the credential of a single client.
///
/// Implementations must allow concurrent readers next to a single writer, and a
/// failed [`save`](TokenStore::save) must leave the previously stored value readable.
#[async_trait]
pub trait TokenStore: fmt::Debug + Send + Sync {
    /// Replace the stored credential.
    ///
    /// # Errors
    /// Fails with [`Error::StorageFailed`](crate::Error::StorageFailed) if a durable backend cannot write.
    async fn save(&self, credential: &Credential) -> Result<()>;

    /// Read the stored credential. Returns `None` if nothing was saved yet.
    ///
    /// # Errors
    /// Fails with [`Error::StorageFailed`](crate::Error::StorageFailed) if a durable backend cannot read.
    async fn load(&self) -> Result<Option<Credential>>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_validity_is_exclusive_of_expiry() {
        let now = Utc::now();
        let credential = Credential::new("tok-1", now);

        assert!(credential.is_valid_at(now - TimeDelta::seconds(1)));
        assert!(!credential.is_valid_at(now));
        assert!(!credential.is_valid_at(now + TimeDelta::seconds(1)));
    }

    #[test]
    fn test_token_is_redacted() {
        let credential = Credential::new("super-secret-token", Utc::now());
        assert!(!format!("{credential:?}").contains("super-secret-token"));
    }
}
