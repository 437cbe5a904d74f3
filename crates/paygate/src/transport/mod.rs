//! Transport decorators every gateway request passes through.
//!
//! A request travels outer to inner through the chain and the response travels back
//! the same way. The chain is assembled once and never changes afterwards.
mod auth;
mod metrics;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
pub use auth::*;
pub use metrics::*;

use crate::error::Result;

/// Sends a request and returns the response, possibly delegating to an inner transport.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Send `request` and return the response head. The body is left unread.
    ///
    /// # Errors
    /// Fails if the request cannot be completed. Decorators may add their own failures.
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// Base of every chain: hands the request to a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let response = self.client.execute(request).await?;
        // `execute` resolves once the response head has arrived.
        mark_phase(Phase::FirstByte);
        Ok(response)
    }
}

type Wrap = Box<dyn Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync>;

/// Ordered list of transport decorators.
///
/// Decorators are applied in the order they were added: the first one wraps the base
/// transport directly, the last one becomes the outermost.
#[derive(Default)]
pub struct TransportChain {
    layers: Vec<(&'static str, Wrap)>,
}

impl TransportChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decorator around everything added before.
    #[must_use]
    pub fn layer<F>(mut self, name: &'static str, wrap: F) -> Self
    where
        F: Fn(Arc<dyn Transport>) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.layers.push((name, Box::new(wrap)));
        self
    }

    /// Names of the decorators, innermost first.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.layers.iter().map(|(name, _)| *name)
    }

    /// Wrap `base` with every decorator and return the outermost transport.
    #[must_use]
    pub fn build(&self, base: Arc<dyn Transport>) -> Arc<dyn Transport> {
        self.layers
            .iter()
            .fold(base, |next, (_name, wrap)| wrap(next))
    }
}

impl fmt::Debug for TransportChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
