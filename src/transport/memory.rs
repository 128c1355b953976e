//! In-process transport for simulations and tests
//!
//! A [`MemoryNetwork`] is a registry of named endpoints. Binding registers an
//! address; connecting hands the listener a request and waits until it is
//! accepted, at which point both sides hold the two ends of a
//! `tokio::io::duplex` pipe.

use crate::transport::traits::{Transport, TransportListener, TransportStream};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use btchat_shared::PeerIdentity;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot, Mutex};

/// Pipe capacity for each direction of a memory stream
const PIPE_CAPACITY: usize = 64 * 1024;

/// Pending inbound connections a bound endpoint can queue
const ACCEPT_BACKLOG: usize = 8;

/// One end of an in-memory duplex pipe
pub struct MemoryStream {
    inner: DuplexStream,
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
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
impl TransportStream for MemoryStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

struct ConnectRequest {
    from: PeerIdentity,
    reply: oneshot::Sender<DuplexStream>,
}

/// Shared registry of bound memory endpoints
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<ConnectRequest>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that binds and dials as `local`
    pub fn transport(&self, local: PeerIdentity) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local,
        }
    }

    async fn register(&self, address: &str) -> Result<mpsc::Receiver<ConnectRequest>> {
        let mut endpoints = self.endpoints.lock().await;
        if let Some(existing) = endpoints.get(address) {
            if !existing.is_closed() {
                bail!("address {} already in use", address);
            }
        }

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        endpoints.insert(address.to_string(), tx);
        Ok(rx)
    }

    async fn lookup(&self, address: &str) -> Option<mpsc::Sender<ConnectRequest>> {
        self.endpoints.lock().await.get(address).cloned()
    }
}

/// Bound memory endpoint; dropping it closes the address
pub struct MemoryListener {
    requests: mpsc::Receiver<ConnectRequest>,
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Stream = MemoryStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerIdentity)> {
        loop {
            let request = self
                .requests
                .recv()
                .await
                .ok_or_else(|| anyhow!("memory listener closed"))?;

            let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
            // The dialer may have given up while queued
            if request.reply.send(theirs).is_ok() {
                return Ok((MemoryStream { inner: ours }, request.from));
            }
        }
    }
}

/// Transport endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: PeerIdentity,
}

#[async_trait]
impl Transport for MemoryTransport {
    type Stream = MemoryStream;
    type Listener = MemoryListener;

    async fn bind(&self) -> Result<Self::Listener> {
        let requests = self.network.register(self.local.address()).await?;
        Ok(MemoryListener { requests })
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<Self::Stream> {
        let endpoint = self
            .network
            .lookup(peer.address())
            .await
            .ok_or_else(|| anyhow!("{} is not reachable", peer))?;

        let (reply, accepted) = oneshot::channel();
        endpoint
            .send(ConnectRequest {
                from: self.local.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("connection refused by {}", peer))?;

        let inner = accepted
            .await
            .map_err(|_| anyhow!("connection to {} was reset", peer))?;
        Ok(MemoryStream { inner })
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
