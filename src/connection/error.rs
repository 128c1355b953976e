//! Connection error taxonomy

use std::io;
use thiserror::Error;

/// Errors raised while establishing or running a connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The listener could not bind or stopped accepting; not retried automatically
    #[error("Unable to listen for connections: {0}")]
    Bind(String),

    /// A single dial attempt failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Read or write failure on an established session
    #[error("Device connection was lost: {0}")]
    Stream(#[from] io::Error),

    /// The manager task is no longer running
    #[error("Connection manager has shut down")]
    ManagerClosed,
}
