//! Connection types and the external session transport capability
//!
//! The obfs4 handshake and the KCP/FEC framing are provided by external
//! libraries. They plug in through [`SessionTransport`].

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{BenchError, Result};
use crate::models::Protocol;

/// Trait for outbound proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Protocol-specific parameters handed to a [`SessionTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    Obfs4 {
        /// Base64 node id and public key of the bridge
        cert: String,
        iat_mode: u8,
    },
    Kcp {
        data_shards: usize,
        parity_shards: usize,
    },
}

impl TransportParams {
    pub fn protocol(&self) -> Protocol {
        match self {
            TransportParams::Obfs4 { .. } => Protocol::Obfs4,
            TransportParams::Kcp { .. } => Protocol::Kcp,
        }
    }

    /// Flatten into `key=value` pairs the way pluggable transports take their args
    pub fn as_args(&self) -> Vec<(&'static str, String)> {
        match self {
            TransportParams::Obfs4 { cert, iat_mode } => {
                vec![("cert", cert.clone()), ("iat-mode", iat_mode.to_string())]
            }
            TransportParams::Kcp {
                data_shards,
                parity_shards,
            } => vec![
                ("datashard", data_shards.to_string()),
                ("parityshard", parity_shards.to_string()),
            ],
        }
    }
}

/// An external transport library able to open a session to a proxy address
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session to `addr`. The result carries raw proxy traffic; TLS is
    /// layered on top by the caller.
    async fn dial(&self, addr: &str, params: &TransportParams)
        -> Result<Box<dyn ProxyConnection>>;
}

/// Split `host:port`, handling bracketed IPv6 like `[::1]:8080`
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let url = url::Url::parse(&format!("http://{}", addr)).map_err(|e| {
        BenchError::InvalidProxyAddress(format!("Invalid address '{}': {}", addr, e))
    })?;

    let host = url.host_str().ok_or_else(|| {
        BenchError::InvalidProxyAddress(format!("Invalid address '{}': missing host", addr))
    })?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    // Url drops the default port, so read it back from the raw string when needed
    let port = match url.port() {
        Some(p) => p,
        None => addr
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok())
            .ok_or_else(|| {
                BenchError::InvalidProxyAddress(format!("Invalid address '{}': missing port", addr))
            })?,
    };

    Ok((host.to_string(), port))
}
