use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;

use super::Transport;
use crate::{
    authorizers::Authorizer,
    error::{Error, Result},
};

/// Attaches `Authorization: Bearer <token>` to every request before handing it on.
///
/// If no token can be obtained the request is never sent and the failure is
/// returned as [`Error::AuthenticationFailed`].
#[derive(Debug, Clone)]
pub struct AuthTransport {
    authorizer: Arc<dyn Authorizer>,
    next: Arc<dyn Transport>,
}

impl AuthTransport {
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorizer>, next: Arc<dyn Transport>) -> Self {
        Self { authorizer, next }
    }
}

#[async_trait]
impl Transport for AuthTransport {
    async fn send(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let header = self
            .authorizer
            .authorization_header()
            .await
            .map_err(|e| Error::AuthenticationFailed(Box::new(e)))?;

        // Replaces any caller-supplied value.
        request
            .headers_mut()
            .insert(AUTHORIZATION, Arc::unwrap_or_clone(header));
        self.next.send(request).await
    }
}
