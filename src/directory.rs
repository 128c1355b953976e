//! Sources of dialable peers

use anyhow::Result;
use async_trait::async_trait;
use btchat_shared::PeerIdentity;

/// Provider of previously known (paired) peers the user can dial
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn known_peers(&self) -> Result<Vec<PeerIdentity>>;
}

/// Fixed list of peers, used with the TCP simulation transport
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    peers: Vec<PeerIdentity>,
}

impl StaticDirectory {
    /// Build a directory of unnamed peers from their addresses
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: addresses.into_iter().map(PeerIdentity::unnamed).collect(),
        }
    }
}

#[async_trait]
impl PeerDirectory for StaticDirectory {
    async fn known_peers(&self) -> Result<Vec<PeerIdentity>> {
        Ok(self.peers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_preserves_order() {
        let directory = StaticDirectory::from_addresses(["127.0.0.1:9001", "127.0.0.1:9000"]);

        let peers = directory.known_peers().await.unwrap();
        let addresses: Vec<&str> = peers.iter().map(|p| p.address()).collect();
        assert_eq!(addresses, vec!["127.0.0.1:9001", "127.0.0.1:9000"]);
        assert_eq!(peers[0].name(), "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let directory = StaticDirectory::default();
        assert!(directory.known_peers().await.unwrap().is_empty());
    }
}
