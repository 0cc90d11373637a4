//! One-shot local bridge to a remote proxy
//!
//! A plain HTTP client can only talk cleartext to its forward proxy. The
//! bridge listens on an ephemeral local port, accepts a single connection and
//! relays it to the remote proxy over whichever transport the trial selected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, Instrument};

use crate::error::{BenchError, Result};
use crate::models::{Protocol, ProxyEndpoint};
use crate::proxy::buffer_pool::{BufferPool, PooledBuffer};
use crate::proxy::dialer::DialerSet;

/// Relay is torn down after this long without bytes in either direction
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a bridge needs to service its connection
#[derive(Clone)]
pub struct BridgeConfig {
    pub dialers: Arc<DialerSet>,
    pub pool: Arc<BufferPool>,
    pub idle_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(dialers: Arc<DialerSet>, pool: Arc<BufferPool>) -> Self {
        Self {
            dialers,
            pool,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Handle to an open bridge.
///
/// Dropping it closes the listener if the expected connection never arrived.
/// A relay that is already running is left to finish on its own.
pub struct LocalBridge {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl LocalBridge {
    /// Bind an ephemeral local listener and start waiting for one connection
    #[instrument(skip(endpoint, config), fields(provider = %endpoint.provider))]
    pub async fn open(
        endpoint: &ProxyEndpoint,
        protocol: Protocol,
        config: &BridgeConfig,
    ) -> Result<Self> {
        let remote_addr = endpoint
            .address_for(protocol)
            .ok_or_else(|| BenchError::MissingAddress {
                protocol: protocol.to_string(),
            })?
            .to_string();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        debug!("Bridge for {} listening on {}", remote_addr, local_addr);

        let config = config.clone();
        let accept_task = tokio::spawn(
            async move {
                let (inbound, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Unable to accept connection: {}", e);
                        return;
                    }
                };
                // One connection per bridge
                drop(listener);
                debug!("Accepted bridge connection from {}", peer);

                tokio::spawn(
                    relay_to_proxy(inbound, protocol, remote_addr, config).in_current_span(),
                );
            }
            .in_current_span(),
        );

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL an HTTP client should use as its forward proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }
}

impl Drop for LocalBridge {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Dial the remote proxy and relay `inbound` to it. The inbound connection
/// is closed when this returns, whatever the outcome.
async fn relay_to_proxy(
    inbound: TcpStream,
    protocol: Protocol,
    remote_addr: String,
    config: BridgeConfig,
) {
    let outbound = match config.dialers.dial(protocol, &remote_addr).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!("Unable to dial proxy {} over {}: {}", remote_addr, protocol, e);
            return;
        }
    };

    let buf_out = config.pool.get();
    let buf_in = config.pool.get();
    let stats = relay(inbound, outbound, buf_out, buf_in, config.idle_timeout).await;

    debug!(
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        idle_timed_out = stats.idle_timed_out,
        "Bridge to {} closed",
        remote_addr
    );
}

/// Byte counts and outcome of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub idle_timed_out: bool,
}

/// Copy bytes both ways between `client` and `server` until both sides are
/// done or nothing has moved for `idle_timeout`.
///
/// Each direction shuts down its write half on EOF. Errors are logged per
/// direction. Both streams and both buffers are released on return.
pub async fn relay<C, S>(
    client: C,
    server: S,
    mut upstream_buf: PooledBuffer,
    mut downstream_buf: PooledBuffer,
    idle_timeout: Duration,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut server_read, mut server_write) = tokio::io::split(server);

    let activity = Activity::new();
    let sent = AtomicU64::new(0);
    let received = AtomicU64::new(0);

    let client_to_server = async {
        let result = copy_with_buffer(
            &mut client_read,
            &mut server_write,
            &mut upstream_buf,
            &activity,
            &sent,
        )
        .await;
        let _ = server_write.shutdown().await;
        result
    };

    let server_to_client = async {
        let result = copy_with_buffer(
            &mut server_read,
            &mut client_write,
            &mut downstream_buf,
            &activity,
            &received,
        )
        .await;
        let _ = client_write.shutdown().await;
        result
    };

    let idle_timed_out = tokio::select! {
        (up, down) = async { tokio::join!(client_to_server, server_to_client) } => {
            if let Err(e) = up {
                debug!("Error copying from local client to proxy: {}", e);
            }
            if let Err(e) = down {
                debug!("Error copying from proxy to local client: {}", e);
            }
            false
        }
        _ = activity.idle(idle_timeout) => {
            debug!("Relay idle for {:?}, tearing down", idle_timeout);
            true
        }
    };

    RelayStats {
        bytes_sent: sent.load(Ordering::Relaxed),
        bytes_received: received.load(Ordering::Relaxed),
        idle_timed_out,
    }
}

async fn copy_with_buffer<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    activity: &Activity,
    counter: &AtomicU64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = reader.read(buf).await?;
        if n == 0 {
            return Ok(());
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }
}

/// Last time any byte moved through the relay
struct Activity {
    start: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let millis = self.start.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(millis, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.last_millis.load(Ordering::Relaxed))
    }

    /// Resolves once nothing has moved for `timeout`
    async fn idle(&self, timeout: Duration) {
        loop {
            let deadline = self.last() + timeout;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}
