//! Outbound dialers, one per protocol, and per-trial protocol selection
//!
//! Every variant ends in a TLS client session whose certificate is not
//! verified: the benchmark measures reachability of an address, not trust.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::seq::SliceRandom;
use rand::Rng;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use crate::error::{BenchError, Result};
use crate::models::{Protocol, ProxyEndpoint};
use crate::proxy::transport::{split_host_port, ProxyConnection, SessionTransport, TransportParams};

/// Shared obfs4 bridge cert of the benchmarked fleet
pub const OBFS4_CERT: &str =
    "1LYfzzTyz7xsu0bTBUJacwDTLN3NU/gNSjC+pfdRVNuh/LYmtbLOlhZwCfNTKyUVvfMTWQ";
pub const OBFS4_IAT_MODE: u8 = 0;
/// Node id (20 bytes) followed by the curve25519 public key (32 bytes)
const OBFS4_CERT_LEN: usize = 52;

pub const KCP_DATA_SHARDS: usize = 10;
pub const KCP_PARITY_SHARDS: usize = 3;

/// Upper bound on TCP connect plus TLS handshake
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts any server certificate
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// TLS client config with certificate verification disabled
pub fn insecure_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        .with_no_client_auth();
    Arc::new(config)
}

/// Layers a TLS client session over an established connection
#[derive(Clone)]
pub struct TlsWrapper {
    connector: TlsConnector,
}

impl TlsWrapper {
    pub fn insecure() -> Self {
        Self {
            connector: TlsConnector::from(insecure_client_config()),
        }
    }

    /// Run the TLS handshake over `conn`, using the host part of `addr` as server name
    pub async fn wrap<C>(&self, conn: C, addr: &str) -> Result<Box<dyn ProxyConnection>>
    where
        C: ProxyConnection,
    {
        let (host, _) = split_host_port(addr)?;
        let server_name = ServerName::try_from(host.as_str())
            .map_err(|e| BenchError::InvalidServerName(format!("{}: {}", host, e)))?;

        let tls = self.connector.connect(server_name, conn).await?;
        Ok(Box::new(tls))
    }
}

impl Default for TlsWrapper {
    fn default() -> Self {
        Self::insecure()
    }
}

/// Produces outbound connections to a proxy over one protocol
#[async_trait]
pub trait ProtocolDialer: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyConnection>>;
}

/// TLS directly over TCP
pub struct TlsDialer {
    tls: TlsWrapper,
    dial_timeout: Duration,
}

impl TlsDialer {
    pub fn new() -> Self {
        Self {
            tls: TlsWrapper::insecure(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }
}

impl Default for TlsDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolDialer for TlsDialer {
    fn protocol(&self) -> Protocol {
        Protocol::Https
    }

    #[instrument(skip(self))]
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyConnection>> {
        debug!("Dialing TLS proxy at {}", addr);
        timeout(self.dial_timeout, async {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            self.tls.wrap(stream, addr).await
        })
        .await?
    }
}

/// TLS over an obfs4 channel opened by an external pluggable transport
pub struct Obfs4Dialer {
    transport: Arc<dyn SessionTransport>,
    params: TransportParams,
    tls: TlsWrapper,
    dial_timeout: Duration,
}

impl Obfs4Dialer {
    /// Dialer using the fleet's shared cert
    pub fn new(transport: Arc<dyn SessionTransport>) -> Result<Self> {
        Self::with_cert(transport, OBFS4_CERT, OBFS4_IAT_MODE)
    }

    pub fn with_cert(
        transport: Arc<dyn SessionTransport>,
        cert: &str,
        iat_mode: u8,
    ) -> Result<Self> {
        validate_obfs4_cert(cert)?;
        if iat_mode > 2 {
            return Err(BenchError::InvalidTransportArgs(format!(
                "iat-mode must be 0, 1 or 2, got {}",
                iat_mode
            )));
        }

        Ok(Self {
            transport,
            params: TransportParams::Obfs4 {
                cert: cert.to_string(),
                iat_mode,
            },
            tls: TlsWrapper::insecure(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        })
    }
}

fn validate_obfs4_cert(cert: &str) -> Result<()> {
    let raw = STANDARD_NO_PAD
        .decode(cert.trim_end_matches('='))
        .map_err(|e| BenchError::InvalidTransportArgs(format!("obfs4 cert: {}", e)))?;
    if raw.len() != OBFS4_CERT_LEN {
        return Err(BenchError::InvalidTransportArgs(format!(
            "obfs4 cert must decode to {} bytes, got {}",
            OBFS4_CERT_LEN,
            raw.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl ProtocolDialer for Obfs4Dialer {
    fn protocol(&self) -> Protocol {
        Protocol::Obfs4
    }

    #[instrument(skip(self))]
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyConnection>> {
        debug!(args = ?self.params.as_args(), "Dialing obfs4 proxy at {}", addr);
        timeout(self.dial_timeout, async {
            let channel = self.transport.dial(addr, &self.params).await?;
            self.tls.wrap(channel, addr).await
        })
        .await?
    }
}

/// TLS over a forward-error-corrected KCP session opened by an external transport
pub struct KcpDialer {
    transport: Arc<dyn SessionTransport>,
    params: TransportParams,
    tls: TlsWrapper,
    dial_timeout: Duration,
}

impl KcpDialer {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            params: TransportParams::Kcp {
                data_shards: KCP_DATA_SHARDS,
                parity_shards: KCP_PARITY_SHARDS,
            },
            tls: TlsWrapper::insecure(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

#[async_trait]
impl ProtocolDialer for KcpDialer {
    fn protocol(&self) -> Protocol {
        Protocol::Kcp
    }

    #[instrument(skip(self))]
    async fn dial(&self, addr: &str) -> Result<Box<dyn ProxyConnection>> {
        debug!(args = ?self.params.as_args(), "Dialing kcp proxy at {}", addr);
        timeout(self.dial_timeout, async {
            let session = self.transport.dial(addr, &self.params).await?;
            self.tls.wrap(session, addr).await
        })
        .await?
    }
}

/// The dialers available to this process, keyed by protocol
#[derive(Clone)]
pub struct DialerSet {
    dialers: BTreeMap<Protocol, Arc<dyn ProtocolDialer>>,
}

impl DialerSet {
    /// Only the TLS dialer; obfs4 and kcp need an external transport
    pub fn new() -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(TlsDialer::new()));
        set
    }

    pub fn empty() -> Self {
        Self {
            dialers: BTreeMap::new(),
        }
    }

    pub fn with_obfs4(mut self, transport: Arc<dyn SessionTransport>) -> Result<Self> {
        self.register(Arc::new(Obfs4Dialer::new(transport)?));
        Ok(self)
    }

    pub fn with_kcp(mut self, transport: Arc<dyn SessionTransport>) -> Self {
        self.register(Arc::new(KcpDialer::new(transport)));
        self
    }

    /// Add or replace the dialer for its protocol
    pub fn register(&mut self, dialer: Arc<dyn ProtocolDialer>) {
        self.dialers.insert(dialer.protocol(), dialer);
    }

    pub fn supports(&self, protocol: Protocol) -> bool {
        self.dialers.contains_key(&protocol)
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.dialers.keys().copied().collect()
    }

    /// Protocols both the endpoint exposes and this set can dial
    pub fn candidates(&self, endpoint: &ProxyEndpoint) -> Vec<Protocol> {
        endpoint
            .protocols()
            .into_iter()
            .filter(|p| self.supports(*p))
            .collect()
    }

    /// Choose uniformly among the candidates for `endpoint`
    pub fn select<R: Rng + ?Sized>(&self, endpoint: &ProxyEndpoint, rng: &mut R) -> Option<Protocol> {
        self.candidates(endpoint).choose(rng).copied()
    }

    pub fn select_random(&self, endpoint: &ProxyEndpoint) -> Option<Protocol> {
        self.select(endpoint, &mut rand::thread_rng())
    }

    pub async fn dial(&self, protocol: Protocol, addr: &str) -> Result<Box<dyn ProxyConnection>> {
        let dialer = self
            .dialers
            .get(&protocol)
            .ok_or_else(|| BenchError::UnsupportedProtocol(protocol.to_string()))?;
        dialer.dial(addr).await
    }
}

impl Default for DialerSet {
    fn default() -> Self {
        Self::new()
    }
}
