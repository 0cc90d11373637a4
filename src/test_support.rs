//! Local servers and fakes shared by the unit tests

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustls::{Certificate, PrivateKey, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::error::Result;
use crate::proxy::transport::{ProxyConnection, SessionTransport, TransportParams};

/// Acceptor with a fresh self-signed certificate for `localhost`
pub fn tls_acceptor() -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let key_der = cert.serialize_private_key_der();

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![Certificate(cert_der)], PrivateKey(key_der))
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// TLS server echoing every byte back
pub async fn spawn_tls_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tls_acceptor();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    let (mut reader, mut writer) = tokio::io::split(tls);
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                }
            });
        }
    });

    addr
}

/// A remote proxy speaking HTTP over TLS that answers every request itself
pub struct FakeProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeProxy {
    /// Request targets seen so far, in absolute form
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

pub async fn spawn_tls_http_proxy(status: u16) -> FakeProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = tls_acceptor();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let service = service_fn(move |req: Request<Incoming>| {
                    seen.lock().push(req.uri().to_string());
                    async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::from_u16(status).unwrap())
                                .body(Full::new(Bytes::from_static(b"image bytes")))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(tls), service)
                    .await;
            });
        }
    });

    FakeProxy { addr, requests }
}

/// Plain HTTP server answering every request with `status` and `body`
pub async fn spawn_http_server(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(StatusCode::from_u16(status).unwrap())
                            .header("content-type", "application/json")
                            .body(Full::new(Bytes::from_static(body.as_bytes())))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Session transport stand-in: plain TCP, recording what it was asked to dial
#[derive(Default)]
pub struct TcpSessionTransport {
    dialed: Mutex<Vec<(String, TransportParams)>>,
}

impl TcpSessionTransport {
    pub fn dialed(&self) -> Vec<(String, TransportParams)> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl SessionTransport for TcpSessionTransport {
    async fn dial(
        &self,
        addr: &str,
        params: &TransportParams,
    ) -> Result<Box<dyn ProxyConnection>> {
        self.dialed.lock().push((addr.to_string(), params.clone()));
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(stream))
    }
}
