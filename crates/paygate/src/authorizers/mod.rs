mod client_credentials;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
pub use client_credentials::*;
use http::HeaderValue;

/// Main trait of this crate.
#[async_trait]
pub trait Authorizer: fmt::Debug + Send + Sync {
    /// Returns the authorization header to use for the next request.
    ///
    /// # Errors
    /// Fails if a token is not available, for example because the token exchange failed.
    async fn authorization_header(&self) -> Result<Arc<HeaderValue>, crate::error::Error>;
}

/// Build a sensitive `Bearer` header from a raw access token.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the token is not ASCII or contains control characters.
pub(crate) fn bearer_header(token: &str) -> Result<HeaderValue, crate::error::Error> {
    require_ascii(token)?;
    let mut header = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_e| crate::error::Error::InvalidHeaderValue)?;
    header.set_sensitive(true);
    Ok(header)
}

/// Helper function to ensure that a string is ASCII.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the string is not ASCII.
fn require_ascii(s: &str) -> Result<(), crate::error::Error> {
    if s.is_ascii() {
        Ok(())
    } else {
        Err(crate::error::Error::InvalidHeaderValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_bearer_header_is_sensitive() {
        let header = bearer_header("my-token").unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer my-token");
        assert!(header.is_sensitive());
    }

    #[test]
    fn test_non_ascii_token_is_rejected() {
        assert!(matches!(
            bearer_header("tok\u{e9}n"),
            Err(Error::InvalidHeaderValue)
        ));
        assert!(matches!(
            bearer_header("tok\nen"),
            Err(Error::InvalidHeaderValue)
        ));
    }
}
