//! Connection management for a single peer-to-peer chat session
//!
//! This module handles:
//! - Listening for inbound peers and dialing outbound ones
//! - Cancelling the losing role when a session is established
//! - Pumping bytes in both directions over the live stream
//! - Falling back to listening after recoverable failures

mod dialer;
mod error;
mod listener;
mod manager;
mod pump;

pub use error::ConnectionError;
pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager};
