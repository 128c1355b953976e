//! TCP transport for running the chat client without Bluetooth hardware

use crate::transport::traits::{Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btchat_shared::PeerIdentity;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[TCP] Unable to disable Nagle: {}", e);
        }
        Self { inner: stream }
    }

    /// Local socket address of this end of the connection
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Bound TCP listener
pub struct TcpTransportListener {
    inner: TcpListener,
}

impl TcpTransportListener {
    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Stream = TcpTransportStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerIdentity)> {
        let (stream, addr) = self
            .inner
            .accept()
            .await
            .map_err(|e| anyhow!("TCP accept failed: {}", e))?;
        Ok((
            TcpTransportStream::new(stream),
            PeerIdentity::unnamed(addr.to_string()),
        ))
    }
}

/// TCP transport listening on a fixed address and dialing `host:port` peers
pub struct TcpTransport {
    listen_addr: String,
}

impl TcpTransport {
    /// Create a new TCP transport that listens on `listen_addr`
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
        }
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpTransportStream;
    type Listener = TcpTransportListener;

    async fn bind(&self) -> Result<Self::Listener> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| anyhow!("TCP bind to {} failed: {}", self.listen_addr, e))?;
        Ok(TcpTransportListener { inner: listener })
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<Self::Stream> {
        let stream = TcpStream::connect(peer.address()).await?;
        Ok(TcpTransportStream::new(stream))
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_tcp_transport_name() {
        let transport = TcpTransport::new("127.0.0.1:9000");
        assert_eq!(transport.name(), "TCP");
        assert_eq!(transport.listen_addr(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_accept_reports_remote_address() {
        let transport = TcpTransport::new("127.0.0.1:0");
        let mut listener = transport.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = tokio::spawn(async move {
            let peer = PeerIdentity::unnamed(addr.to_string());
            let mut stream = TcpTransport::new("127.0.0.1:0").connect(&peer).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
            stream.local_addr().unwrap()
        });

        let (mut stream, peer) = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        let dialer_addr = dialer.await.unwrap();
        assert_eq!(peer.address(), dialer_addr.to_string());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Reserve a port and release it so nothing is listening there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let transport = TcpTransport::new("127.0.0.1:0");
        let result = transport.connect(&PeerIdentity::unnamed(addr.to_string())).await;
        assert!(result.is_err());
    }
}
