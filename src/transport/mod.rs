pub mod bt_discovery;
pub mod memory;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use bt_discovery::BtDiscovery;
pub use memory::{MemoryListener, MemoryNetwork, MemoryStream, MemoryTransport};
pub use rfcomm::{
    RfcommConfig, RfcommTransport, RfcommTransportStream, BTCHAT_SERVICE_UUID,
    DEFAULT_RFCOMM_CHANNEL,
};
pub use tcp::{TcpTransport, TcpTransportStream};
pub use traits::{Transport, TransportListener, TransportStream};
