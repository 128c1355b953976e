//! Dialer role: exactly one outbound attempt per task

use super::error::ConnectionError;
use super::manager::{Report, ReportSender, TaskId};
use crate::transport::Transport;
use btchat_shared::PeerIdentity;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Dial `peer` once and report the outcome
///
/// Cancellation aborts the task mid-connect, dropping the half-open socket;
/// an aborted dialer never reports.
pub(crate) async fn run<T: Transport>(
    task: TaskId,
    transport: Arc<T>,
    peer: PeerIdentity,
    connect_timeout: Duration,
    reports: ReportSender<T::Stream>,
) {
    info!("[DIAL] Connecting to {} via {}", peer, transport.name());

    let outcome = match dial(transport.as_ref(), &peer, connect_timeout).await {
        Ok(stream) => {
            info!("[DIAL] Connected to {}", peer);
            Ok((stream, peer))
        }
        Err(e) => {
            warn!("[DIAL] {}", e);
            Err(e)
        }
    };

    let _ = reports.send(Report::Dialed { task, outcome });
}

/// Perform one connection attempt bounded by `connect_timeout`
pub(crate) async fn dial<T: Transport>(
    transport: &T,
    peer: &PeerIdentity,
    connect_timeout: Duration,
) -> Result<T::Stream, ConnectionError> {
    match timeout(connect_timeout, transport.connect(peer)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConnectionError::Connect(format!("{}: {:#}", peer, e))),
        Err(_) => Err(ConnectionError::Connect(format!(
            "{}: timed out after {:?}",
            peer, connect_timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    #[tokio::test]
    async fn test_dial_unreachable_peer() {
        let network = MemoryNetwork::new();
        let transport = network.transport(PeerIdentity::unnamed("mem:a"));

        let result = dial(&transport, &PeerIdentity::unnamed("mem:b"), Duration::from_secs(1)).await;
        match result {
            Err(ConnectionError::Connect(reason)) => assert!(reason.contains("mem:b")),
            _ => panic!("expected connect error"),
        }
    }

    #[tokio::test]
    async fn test_dial_times_out_when_never_accepted() {
        let network = MemoryNetwork::new();
        let silent = network.transport(PeerIdentity::unnamed("mem:silent"));
        let _listener = silent.bind().await.unwrap();

        let transport = network.transport(PeerIdentity::unnamed("mem:a"));
        let result = dial(
            &transport,
            &PeerIdentity::unnamed("mem:silent"),
            Duration::from_millis(50),
        )
        .await;
        match result {
            Err(ConnectionError::Connect(reason)) => assert!(reason.contains("timed out")),
            _ => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_run_reports_once() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.transport(PeerIdentity::unnamed("mem:a")));
        let (reports, mut rx) = tokio::sync::mpsc::unbounded_channel();

        run(7, transport, PeerIdentity::unnamed("mem:b"), Duration::from_secs(1), reports).await;

        match rx.recv().await {
            Some(Report::Dialed { task: 7, outcome: Err(_) }) => {}
            _ => panic!("expected a failed dial report"),
        }
        assert!(rx.recv().await.is_none());
    }
}
