//! RFCOMM transport implementation for Bluetooth chat connections

use crate::transport::bt_discovery::device_name;
use crate::transport::traits::{Transport, TransportListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream as RfcommStream};
use bluer::{Adapter, Address, Session, Uuid};
use btchat_shared::{limits, PeerIdentity};
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// Default RFCOMM channel for the chat service
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Service UUID both chat peers agree on
pub const BTCHAT_SERVICE_UUID: Uuid = Uuid::from_u128(limits::SERVICE_UUID);

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
}

impl RfcommTransportStream {
    /// Create a new RFCOMM transport stream
    pub fn new(stream: RfcommStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// RFCOMM channel advertised in the service record
    pub channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_RFCOMM_CHANNEL,
        }
    }
}

/// Profile advertising or dialing the chat service
///
/// Peers find each other by service UUID through SDP, so the channel only
/// matters on the server side where it is published in the record.
pub fn service_profile(role: Role, channel: u8) -> Profile {
    let channel = match role {
        Role::Server => Some(u16::from(channel)),
        _ => None,
    };
    Profile {
        uuid: BTCHAT_SERVICE_UUID,
        name: Some(limits::SERVICE_NAME.to_string()),
        role: Some(role),
        channel,
        require_authentication: Some(false),
        require_authorization: Some(false),
        ..Default::default()
    }
}

/// Registered server profile; dropping it removes the service record
pub struct RfcommTransportListener {
    profile: ProfileHandle,
    adapter: Adapter,
}

#[async_trait]
impl TransportListener for RfcommTransportListener {
    type Stream = RfcommTransportStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerIdentity)> {
        let request = self
            .profile
            .next()
            .await
            .ok_or_else(|| anyhow!("{} profile was unregistered", limits::SERVICE_NAME))?;

        let remote = request.device();
        let stream = request
            .accept()
            .map_err(|e| anyhow!("RFCOMM accept from {} failed: {}", remote, e))?;

        let name = device_name(&self.adapter, remote).await;
        info!("[BT] Accepted connection from {} ({})", name, remote);

        Ok((
            RfcommTransportStream::new(stream),
            PeerIdentity::new(remote.to_string(), name),
        ))
    }
}

/// RFCOMM transport for Bluetooth chat connections
pub struct RfcommTransport {
    config: RfcommConfig,
    session: Session,
    adapter: Adapter,
}

impl RfcommTransport {
    /// Create a transport on a powered adapter of `session`
    pub fn new(session: Session, adapter: Adapter, config: RfcommConfig) -> Self {
        Self {
            config,
            session,
            adapter,
        }
    }

    pub fn channel(&self) -> u8 {
        self.config.channel
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    type Stream = RfcommTransportStream;
    type Listener = RfcommTransportListener;

    async fn bind(&self) -> Result<Self::Listener> {
        let profile = service_profile(Role::Server, self.config.channel);
        let handle = self.session.register_profile(profile).await.map_err(|e| {
            anyhow!(
                "registering {} on channel {} failed: {}",
                limits::SERVICE_NAME,
                self.config.channel,
                e
            )
        })?;

        info!(
            "[BT] {} listening on channel {} ({})",
            limits::SERVICE_NAME,
            self.config.channel,
            BTCHAT_SERVICE_UUID
        );
        Ok(RfcommTransportListener {
            profile: handle,
            adapter: self.adapter.clone(),
        })
    }

    async fn connect(&self, peer: &PeerIdentity) -> Result<Self::Stream> {
        let target_addr: Address = peer
            .address()
            .parse()
            .map_err(|e| anyhow!("Invalid Bluetooth address {:?}: {}", peer.address(), e))?;
        let device = self.adapter.device(target_addr)?;

        // The connection is handed to the client profile once SDP resolves the service
        let mut profile = self
            .session
            .register_profile(service_profile(Role::Client, self.config.channel))
            .await
            .map_err(|e| anyhow!("registering {} client failed: {}", limits::SERVICE_NAME, e))?;

        info!("[BT] Connecting to {} service {}", target_addr, BTCHAT_SERVICE_UUID);
        let connect = device.connect_profile(&BTCHAT_SERVICE_UUID);
        tokio::pin!(connect);
        let mut requested = false;

        loop {
            tokio::select! {
                result = &mut connect, if !requested => {
                    result.map_err(|e| anyhow!("RFCOMM connect to {} failed: {}", target_addr, e))?;
                    requested = true;
                }
                request = profile.next() => {
                    let request = request
                        .ok_or_else(|| anyhow!("{} client profile closed", limits::SERVICE_NAME))?;
                    if request.device() != target_addr {
                        debug!("[BT] Ignoring connection from {}", request.device());
                        continue;
                    }
                    let stream = request
                        .accept()
                        .map_err(|e| anyhow!("RFCOMM connect to {} failed: {}", target_addr, e))?;

                    info!("[BT] Connected to {}", target_addr);
                    return Ok(RfcommTransportStream::new(stream));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
