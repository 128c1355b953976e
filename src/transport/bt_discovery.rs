//! Bluetooth adapter bootstrap and paired-device enumeration

use crate::directory::PeerDirectory;
use anyhow::Result;
use async_trait::async_trait;
use bluer::{Adapter, Address, Session};
use btchat_shared::PeerIdentity;
use tracing::{debug, info};

/// Paired-device directory backed by the local Bluetooth adapter
pub struct BtDiscovery {
    adapter: Adapter,
}

impl BtDiscovery {
    /// Create a directory over an already powered adapter
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the default Bluetooth adapter of `session`, powering it on if needed
    pub async fn get_adapter(session: &Session) -> Result<Adapter> {
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("[BT] Using adapter {} ({})", adapter.name(), adapter.address().await?);
        Ok(adapter)
    }

    /// List devices previously paired with this adapter, sorted by name
    pub async fn paired_peers(&self) -> Result<Vec<PeerIdentity>> {
        let mut peers = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if !device.is_paired().await? {
                continue;
            }
            let name = device_name(&self.adapter, addr).await;
            peers.push(PeerIdentity::new(addr.to_string(), name));
        }

        peers.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(peers)
    }
}

#[async_trait]
impl PeerDirectory for BtDiscovery {
    async fn known_peers(&self) -> Result<Vec<PeerIdentity>> {
        self.paired_peers().await
    }
}

/// Best-effort display name for a device, falling back to its address
pub async fn device_name(adapter: &Adapter, addr: Address) -> String {
    let name = match adapter.device(addr) {
        Ok(device) => device.name().await.ok().flatten(),
        Err(e) => {
            debug!("[BT] No device entry for {}: {}", addr, e);
            None
        }
    };
    name.unwrap_or_else(|| addr.to_string())
}
