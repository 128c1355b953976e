//! Transport trait abstraction for pluggable stream-socket backends

use anyhow::Result;
use async_trait::async_trait;
use btchat_shared::PeerIdentity;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// A bound listening socket producing inbound streams
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// The stream type accepted connections produce
    type Stream: TransportStream;

    /// Wait for the next inbound connection
    ///
    /// Dropping the listener closes it, which also ends a pending accept.
    async fn accept(&mut self) -> Result<(Self::Stream, PeerIdentity)>;
}

/// Factory for listening and dialing on one transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type this transport produces
    type Stream: TransportStream;

    /// The listener type returned by `bind`
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Bind the chat service so inbound connections can be accepted
    async fn bind(&self) -> Result<Self::Listener>;

    /// Attempt one outbound connection to `peer`
    async fn connect(&self, peer: &PeerIdentity) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
