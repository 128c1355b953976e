//! BT2Chat: one-to-one chat between two devices over a byte-stream link

pub mod config;
pub mod connection;
pub mod directory;
pub mod history;
pub mod transport;
