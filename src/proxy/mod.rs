//! Proxy plumbing for benchmark trials
//!
//! This module provides:
//! - Protocol dialers (TLS, obfs4 over TLS, KCP over TLS) and per-trial selection
//! - The one-shot local bridge that fronts a remote proxy as a plain HTTP proxy
//! - Pooled relay buffers shared by concurrently open bridges

pub mod bridge;
pub mod buffer_pool;
pub mod dialer;
pub mod transport;

pub use bridge::{BridgeConfig, LocalBridge, RelayStats};
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use dialer::{DialerSet, KcpDialer, Obfs4Dialer, ProtocolDialer, TlsDialer};
pub use transport::{ProxyConnection, SessionTransport, TransportParams};
