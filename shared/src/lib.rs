//! BT2Chat Shared Types
//!
//! This crate provides the types shared between the connection manager and
//! the chat front-end: peer identities, connection states, the connection
//! state machine, and the chat history document and its codec.

pub mod codec;
pub mod state_machine;

use prost::Message;
use std::fmt;

/// Transport-level constants for the chat service
pub mod limits {
    /// Read buffer size for an established session; one inbound chunk never exceeds this
    pub const READ_BUFFER_SIZE: usize = 256;

    /// Service name advertised by the listener
    pub const SERVICE_NAME: &str = "BT2Chat";

    /// Service UUID shared by both sides of a chat
    pub const SERVICE_UUID: u128 = 0x85715ea5_ee6e_4086_a49c_b425d17192cd;
}

/// Identity of a remote endpoint: a stable address plus a display name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    address: String,
    name: String,
}

impl PeerIdentity {
    /// Create a peer identity with an explicit display name
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Create a peer identity whose display name is its address
    pub fn unnamed(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
        }
    }

    /// Address used to re-dial this peer
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Lifecycle state of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Listening,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Listening => write!(f, "listening"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Ordered chat lines exchanged with one peer
#[derive(Clone, PartialEq, Message)]
pub struct ChatHistory {
    #[prost(string, repeated, tag = "1")]
    pub lines: Vec<String>,
}

impl ChatHistory {
    /// Record a message we sent
    pub fn push_outgoing(&mut self, text: &str) {
        self.lines.push(format!("Me: {}", text));
    }

    /// Record a message received from `peer_name`
    pub fn push_incoming(&mut self, peer_name: &str, text: &str) {
        self.lines.push(format!("{}:  {}", peer_name, text));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
