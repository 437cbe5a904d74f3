use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, OnceLock},
    task::{Context, Poll},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::Instrument;

use super::Transport;
use crate::error::Result;

tokio::task_local! {
    static PHASES: Arc<PhaseRecorder>;
}

/// Connection phases observed while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    FirstByte,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::DnsStart => "dns_start",
            Phase::DnsDone => "dns_done",
            Phase::ConnectStart => "connect_start",
            Phase::ConnectDone => "connect_done",
            Phase::FirstByte => "first_byte",
        }
    }
}

/// Record `phase` for the request measured by the enclosing [`MetricsTransport`], if any.
pub(crate) fn mark_phase(phase: Phase) {
    let _ = PHASES.try_with(|recorder| recorder.mark(phase));
}

#[derive(Debug)]
struct PhaseRecorder {
    started: Instant,
    dns_start: OnceLock<Instant>,
    dns_done: OnceLock<Instant>,
    connect_start: OnceLock<Instant>,
    connect_done: OnceLock<Instant>,
    first_byte: OnceLock<Instant>,
}

impl PhaseRecorder {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            dns_start: OnceLock::new(),
            dns_done: OnceLock::new(),
            connect_start: OnceLock::new(),
            connect_done: OnceLock::new(),
            first_byte: OnceLock::new(),
        }
    }

    fn mark(&self, phase: Phase) {
        let slot = match phase {
            Phase::DnsStart => &self.dns_start,
            Phase::DnsDone => &self.dns_done,
            Phase::ConnectStart => &self.connect_start,
            Phase::ConnectDone => &self.connect_done,
            Phase::FirstByte => &self.first_byte,
        };
        let now = Instant::now();
        // Only the first occurrence counts, e.g. the first of several addresses tried.
        if slot.set(now).is_ok() {
            tracing::debug!(
                phase = phase.as_str(),
                elapsed_ms = millis(now - self.started),
                "request phase"
            );
        }
    }

    fn span(start: &OnceLock<Instant>, done: &OnceLock<Instant>) -> Option<u64> {
        Some(millis(*done.get()? - *start.get()?))
    }

    fn dns_ms(&self) -> Option<u64> {
        Self::span(&self.dns_start, &self.dns_done)
    }

    fn connect_ms(&self) -> Option<u64> {
        Self::span(&self.connect_start, &self.connect_done)
    }

    fn ttfb_ms(&self) -> Option<u64> {
        self.first_byte.get().map(|at| millis(*at - self.started))
    }

    /// A pooled connection was used if no new connection was opened.
    fn reused(&self) -> bool {
        self.connect_start.get().is_none()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Records latency and connection phases of every request as a structured log event.
///
/// Emits one `request metrics` event at INFO per request with `method`, `path`,
/// `status` (`0` if no response was received) and `latency_ms`. If the underlying
/// `reqwest::Client` was built with [`with_timing_hooks`], `dns_ms` and `connect_ms`
/// are reported as well and `reused` tells whether a pooled connection was used.
/// Without the hooks `reused` is always `true`.
///
/// Responses and errors are passed through untouched.
#[derive(Debug, Clone)]
pub struct MetricsTransport {
    next: Arc<dyn Transport>,
}

impl MetricsTransport {
    #[must_use]
    pub fn new(next: Arc<dyn Transport>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl Transport for MetricsTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let method = request.method().clone();
        let path = request.url().path().to_string();
        let recorder = Arc::new(PhaseRecorder::new());
        let span = tracing::info_span!("gateway_request", method = %method, path = %path);

        let result = PHASES
            .scope(recorder.clone(), self.next.send(request))
            .instrument(span)
            .await;

        let status = result
            .as_ref()
            .map_or(0, |response| response.status().as_u16());
        tracing::info!(
            method = %method,
            path = %path,
            status,
            latency_ms = millis(recorder.started.elapsed()),
            dns_ms = ?recorder.dns_ms(),
            connect_ms = ?recorder.connect_ms(),
            ttfb_ms = ?recorder.ttfb_ms(),
            reused = recorder.reused(),
            "request metrics"
        );

        result
    }
}

/// Install the DNS and connect hooks used by [`MetricsTransport`] on a client builder.
#[must_use]
pub fn with_timing_hooks(builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
    builder
        .dns_resolver(Arc::new(TimingResolver))
        .connector_layer(ConnectTimingLayer)
}

/// System resolver that records the DNS phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingResolver;

impl Resolve for TimingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            mark_phase(Phase::DnsStart);
            // The port is replaced by the connector.
            let addrs = tokio::net::lookup_host((host.as_str(), 0)).await?;
            mark_phase(Phase::DnsDone);
            let addrs: Addrs = Box::new(addrs.collect::<Vec<SocketAddr>>().into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Connector layer that records when a new connection is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectTimingLayer;

impl<S> tower::Layer<S> for ConnectTimingLayer {
    type Service = ConnectTiming<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectTiming { inner }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectTiming<S> {
    inner: S,
}

impl<S, Req> tower::Service<Req> for ConnectTiming<S>
where
    S: tower::Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Req) -> Self::Future {
        mark_phase(Phase::ConnectStart);
        let connecting = self.inner.call(request);
        Box::pin(async move {
            let connection = connecting.await;
            if connection.is_ok() {
                mark_phase(Phase::ConnectDone);
            }
            connection
        })
    }
}

#[cfg(test)]
mod tests {
    use http::header::DATE;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::*;
    use crate::{error::Error, transport::ReqwestTransport};

    async fn snapshot(
        transport: &dyn Transport,
        client: &reqwest::Client,
        url: &str,
    ) -> (http::StatusCode, http::HeaderMap, bytes::Bytes) {
        let request = client.get(url).build().unwrap();
        let response = transport.send(request).await.unwrap();
        let status = response.status();
        let mut headers = response.headers().clone();
        headers.remove(DATE);
        (status, headers, response.bytes().await.unwrap())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_responses_pass_through_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/api/payments/payment/1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-request-id", "abc")
            .with_body(r#"{"id":1,"state":"PAID"}"#)
            .create_async()
            .await;
        let _failed = server
            .mock("GET", "/api/payments/payment/2")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = with_timing_hooks(reqwest::Client::builder())
            .build()
            .unwrap();
        let plain = ReqwestTransport::new(client.clone());
        let measured = MetricsTransport::new(Arc::new(plain.clone()));

        for resource in ["payments/payment/1", "payments/payment/2"] {
            let url = format!("{}/api/{resource}", server.url());
            assert_eq!(
                snapshot(&measured, &client, &url).await,
                snapshot(&plain, &client, &url).await
            );
        }

        assert!(logs_contain("request metrics"));
        assert!(logs_contain("status=200"));
        assert!(logs_contain("status=503"));
        assert!(logs_contain("path=/api/payments/payment/2"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_errors_are_passed_through() {
        // Nothing listens on a freshly released port.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = with_timing_hooks(reqwest::Client::builder())
            .build()
            .unwrap();
        let measured = MetricsTransport::new(Arc::new(ReqwestTransport::new(client.clone())));

        let request = client
            .get(format!("http://127.0.0.1:{port}/api/ping"))
            .build()
            .unwrap();
        let err = measured.send(request).await.unwrap_err();

        assert!(matches!(err, Error::ReqwestFailed(_)));
        assert!(logs_contain("request metrics"));
        assert!(logs_contain("status=0"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_new_connection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/ping")
            .with_status(200)
            .with_body("pong")
            .create_async()
            .await;
        let client = with_timing_hooks(reqwest::Client::builder())
            .build()
            .unwrap();
        let measured = MetricsTransport::new(Arc::new(ReqwestTransport::new(client.clone())));

        let request = client
            .get(format!("{}/api/ping", server.url()))
            .build()
            .unwrap();
        let response = measured.send(request).await.unwrap();
        assert_eq!(response.bytes().await.unwrap(), "pong");

        assert!(logs_contain("reused=false"));
        assert!(logs_contain("connect_ms=Some("));
    }

    #[test]
    fn test_phase_spans() {
        let recorder = PhaseRecorder::new();
        assert_eq!(recorder.dns_ms(), None);
        assert!(recorder.reused());

        recorder.mark(Phase::ConnectStart);
        recorder.mark(Phase::ConnectDone);
        recorder.mark(Phase::FirstByte);

        assert!(recorder.connect_ms().is_some());
        assert!(recorder.ttfb_ms().is_some());
        assert!(!recorder.reused());
    }
}
