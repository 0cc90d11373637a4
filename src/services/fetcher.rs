//! Instrumented origin fetches through a local bridge

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{debug, debug_span, error, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::error::{BenchError, Result};
use crate::models::*;
use crate::proxy::bridge::{BridgeConfig, LocalBridge};
use crate::proxy::buffer_pool::BufferPool;
use crate::proxy::dialer::DialerSet;
use crate::proxy::transport::split_host_port;

/// Total budget for one origin fetch, body included
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROXY_TYPE_CHAINED: &str = "chained";

/// Runs trials: one bridge, one GET, one optional report
#[derive(Clone)]
pub struct Fetcher {
    bridge: BridgeConfig,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(dialers: Arc<DialerSet>) -> Self {
        Self::with_bridge_config(BridgeConfig::new(
            dialers,
            Arc::new(BufferPool::default()),
        ))
    }

    pub fn with_bridge_config(bridge: BridgeConfig) -> Self {
        Self {
            bridge,
            timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dialers(&self) -> &DialerSet {
        &self.bridge.dialers
    }

    /// Fetch `origin` through `endpoint` over `protocol`.
    ///
    /// Returns `None` when the trial is dropped; the reason is logged.
    pub async fn run_trial(
        &self,
        origin: &str,
        endpoint: &ProxyEndpoint,
        protocol: Protocol,
    ) -> Option<TrialReport> {
        let span = debug_span!(
            "trial",
            trial_id = %Uuid::new_v4(),
            origin = %origin,
            protocol = %protocol,
            provider = %endpoint.provider
        );

        async move {
            // The HTTP client can't talk TLS to its proxy, so it goes through a local bridge
            let bridge = match LocalBridge::open(endpoint, protocol, &self.bridge).await {
                Ok(bridge) => bridge,
                Err(e) if e.is_setup_error() => {
                    warn!("Skipping trial: {}", e);
                    return None;
                }
                Err(e) => {
                    error!("Unable to set up local proxy: {}", e);
                    return None;
                }
            };

            let result = self
                .do_request(origin, endpoint, protocol, bridge.local_addr())
                .await;
            drop(bridge);

            match result {
                Ok(report) => Some(report),
                Err(e) => {
                    debug!("Dropping sample for {}: {}", origin, e);
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Issue one GET for `origin` via the bridge listening on `bridge_addr`
    pub async fn do_request(
        &self,
        origin: &str,
        endpoint: &ProxyEndpoint,
        protocol: Protocol,
        bridge_addr: SocketAddr,
    ) -> Result<TrialReport> {
        let mut context = TrialContext::new();
        context
            .set(FIELD_URL, origin)
            .set(FIELD_PROXY_TYPE, PROXY_TYPE_CHAINED)
            .set(FIELD_PROXY_PROTOCOL, protocol.as_str())
            .set(FIELD_PROXY_PROVIDER, endpoint.provider.as_str())
            .set(FIELD_PROXY_DATACENTER, endpoint.data_center.as_str());

        let (proxy_host, proxy_port) = endpoint
            .address_for(protocol)
            .and_then(|addr| split_host_port(addr).ok())
            .map(|(host, port)| (host, port.to_string()))
            .unwrap_or_default();
        context
            .set(FIELD_PROXY_HOST, proxy_host)
            .set(FIELD_PROXY_PORT, proxy_port);

        let url = Url::parse(origin)?;
        let origin_host = url
            .host_str()
            .ok_or_else(|| BenchError::InvalidConfig(format!("URL has no host: {}", origin)))?
            .to_string();
        let origin_authority = match url.port() {
            Some(port) => format!("{}:{}", origin_host, port),
            None => origin_host.clone(),
        };
        context
            .set(FIELD_ORIGIN, origin_authority)
            .set(FIELD_ORIGIN_HOST, origin_host);

        // Plain HTTP to the local bridge; the bridge speaks the real protocol upstream.
        // No idle pooling, so one connection and one bridge per trial.
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(format!("http://{}", bridge_addr))?)
            .pool_max_idle_per_host(0)
            .timeout(self.timeout)
            .build()?;

        debug!("Making request");
        let start = Instant::now();
        let mut response = client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::INTERNAL_SERVER_ERROR {
            debug!("Unexpected status {} fetching {}", status, origin);
            return Err(BenchError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        // Read the full response body
        let mut body_bytes = 0usize;
        while let Some(chunk) = response.chunk().await? {
            body_bytes += chunk.len();
        }
        let elapsed = start.elapsed();

        context.set(FIELD_SUCCESS, true);
        debug!(
            status = status.as_u16(),
            body_bytes, "Request succeeded in {:?}", elapsed
        );

        Ok(TrialReport { elapsed, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_tls_http_proxy;

    fn fetcher() -> Fetcher {
        Fetcher::new(Arc::new(DialerSet::new())).with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_trial_reports_full_context() {
        let proxy = spawn_tls_http_proxy(200).await;
        let endpoint = ProxyEndpoint::https(proxy.addr.to_string(), "digitalocean", "ams3");

        let report = fetcher()
            .run_trial("http://i.ytimg.com/vi/video_id/0.jpg", &endpoint, Protocol::Https)
            .await
            .expect("trial should be reported");

        assert!(report.elapsed > Duration::ZERO);

        let ctx = &report.context;
        assert_eq!(ctx.get_str(FIELD_URL), Some("http://i.ytimg.com/vi/video_id/0.jpg"));
        assert_eq!(ctx.get_str(FIELD_PROXY_TYPE), Some("chained"));
        assert_eq!(ctx.get_str(FIELD_PROXY_PROTOCOL), Some("https"));
        assert_eq!(ctx.get_str(FIELD_PROXY_PROVIDER), Some("digitalocean"));
        assert_eq!(ctx.get_str(FIELD_PROXY_DATACENTER), Some("ams3"));
        assert_eq!(
            ctx.get_str(FIELD_PROXY_HOST),
            Some(proxy.addr.ip().to_string().as_str())
        );
        assert_eq!(
            ctx.get_str(FIELD_PROXY_PORT),
            Some(proxy.addr.port().to_string().as_str())
        );
        assert_eq!(ctx.get_str(FIELD_ORIGIN), Some("i.ytimg.com"));
        assert_eq!(ctx.get_str(FIELD_ORIGIN_HOST), Some("i.ytimg.com"));
        assert_eq!(ctx.get_bool(FIELD_SUCCESS), Some(true));

        // The remote proxy saw the absolute-form request the client sent to the bridge
        assert_eq!(
            proxy.requests(),
            vec!["http://i.ytimg.com/vi/video_id/0.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_origin_keeps_explicit_port() {
        let proxy = spawn_tls_http_proxy(200).await;
        let endpoint = ProxyEndpoint::https(proxy.addr.to_string(), "p", "dc");

        let report = fetcher()
            .run_trial("http://origin.example:8080/x", &endpoint, Protocol::Https)
            .await
            .unwrap();

        assert_eq!(report.context.get_str(FIELD_ORIGIN), Some("origin.example:8080"));
        assert_eq!(report.context.get_str(FIELD_ORIGIN_HOST), Some("origin.example"));
    }

    #[tokio::test]
    async fn test_forbidden_and_server_error_are_dropped() {
        for status in [403u16, 500] {
            let proxy = spawn_tls_http_proxy(status).await;
            let endpoint = ProxyEndpoint::https(proxy.addr.to_string(), "p", "dc");
            let fetcher = fetcher();

            let bridge = LocalBridge::open(&endpoint, Protocol::Https, &fetcher.bridge)
                .await
                .unwrap();
            let result = fetcher
                .do_request("http://example.com/", &endpoint, Protocol::Https, bridge.local_addr())
                .await;
            assert!(
                matches!(result, Err(BenchError::UnexpectedStatus { status: s }) if s == status)
            );

            assert!(fetcher
                .run_trial("http://example.com/", &endpoint, Protocol::Https)
                .await
                .is_none());
        }
    }

    #[tokio::test]
    async fn test_other_statuses_are_reported() {
        let proxy = spawn_tls_http_proxy(404).await;
        let endpoint = ProxyEndpoint::https(proxy.addr.to_string(), "p", "dc");

        let report = fetcher()
            .run_trial("http://example.com/missing", &endpoint, Protocol::Https)
            .await;
        assert!(report.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_dropped() {
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let endpoint = ProxyEndpoint::https(dead_addr.to_string(), "p", "dc");
        let report = fetcher()
            .run_trial("http://example.com/", &endpoint, Protocol::Https)
            .await;
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_invalid_origin_is_dropped() {
        let proxy = spawn_tls_http_proxy(200).await;
        let endpoint = ProxyEndpoint::https(proxy.addr.to_string(), "p", "dc");

        let report = fetcher()
            .run_trial("not a url", &endpoint, Protocol::Https)
            .await;
        assert!(report.is_none());
        assert!(proxy.requests().is_empty());
    }
}
