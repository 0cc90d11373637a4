use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Transport used to reach a chained proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TLS over plain TCP
    Https,
    /// TLS over the obfs4 pluggable transport
    Obfs4,
    /// TLS over a forward-error-corrected KCP session
    Kcp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Https, Protocol::Obfs4, Protocol::Kcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Https => "https",
            Protocol::Obfs4 => "obfs4",
            Protocol::Kcp => "kcp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "https" | "tls" => Some(Protocol::Https),
            "obfs4" => Some(Protocol::Obfs4),
            "kcp" => Some(Protocol::Kcp),
            _ => None,
        }
    }

    /// Whether this protocol runs over UDP rather than TCP
    pub fn is_datagram(&self) -> bool {
        matches!(self, Protocol::Kcp)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A remote chained proxy, reachable over one or more protocols
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEndpoint {
    /// Legacy single address, equivalent to an `https` entry in `addrs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Protocol name -> `host:port`
    #[serde(default)]
    pub addrs: BTreeMap<String, String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub data_center: String,
}

impl ProxyEndpoint {
    /// Endpoint reachable only over TLS at `addr`
    pub fn https(addr: impl Into<String>, provider: &str, data_center: &str) -> Self {
        let mut addrs = BTreeMap::new();
        addrs.insert(Protocol::Https.as_str().to_string(), addr.into());
        Self {
            addr: None,
            addrs,
            provider: provider.to_string(),
            data_center: data_center.to_string(),
        }
    }

    /// Add an address for another protocol
    pub fn with_addr(mut self, protocol: Protocol, addr: impl Into<String>) -> Self {
        self.addrs.insert(protocol.as_str().to_string(), addr.into());
        self
    }

    /// Address to dial for the given protocol
    pub fn address_for(&self, protocol: Protocol) -> Option<&str> {
        let explicit = self
            .addrs
            .iter()
            .find(|(name, _)| Protocol::from_str(name) == Some(protocol))
            .map(|(_, addr)| addr.as_str());

        let legacy = match protocol {
            Protocol::Https => self.addr.as_deref(),
            _ => None,
        };

        explicit
            .filter(|a| !a.is_empty())
            .or(legacy.filter(|a| !a.is_empty()))
    }

    /// Protocols this endpoint has an address for, in stable order
    pub fn protocols(&self) -> Vec<Protocol> {
        Protocol::ALL
            .into_iter()
            .filter(|p| self.address_for(*p).is_some())
            .collect()
    }
}
