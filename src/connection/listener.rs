//! Listener role: bind the service once and report every accepted connection

use super::error::ConnectionError;
use super::manager::{Report, ReportSender, TaskId};
use crate::transport::{Transport, TransportListener};
use std::sync::Arc;
use tracing::{info, warn};

/// Bind and accept until cancelled or the listening socket fails
///
/// Cancellation aborts the task, dropping the listener and closing the
/// socket a pending accept is blocked on.
pub(crate) async fn run<T: Transport>(
    task: TaskId,
    transport: Arc<T>,
    reports: ReportSender<T::Stream>,
) {
    let mut listener = match transport.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("[LISTEN] {} bind failed: {:#}", transport.name(), e);
            let _ = reports.send(Report::ListenFailed {
                task,
                error: ConnectionError::Bind(format!("{:#}", e)),
            });
            return;
        }
    };
    info!("[LISTEN] Waiting for {} connections", transport.name());

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("[LISTEN] Accepted connection from {}", peer);
                if reports.send(Report::Accepted { task, stream, peer }).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("[LISTEN] Accept failed: {:#}", e);
                let _ = reports.send(Report::ListenFailed {
                    task,
                    error: ConnectionError::Bind(format!("{:#}", e)),
                });
                break;
            }
        }
    }
}
