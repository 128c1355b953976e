//! Pump role: drive one established stream in both directions

use super::error::ConnectionError;
use super::manager::{Report, ReportSender, TaskId};
use crate::transport::TransportStream;
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Manager-side handle to a running pump
pub(crate) struct PumpHandle {
    id: TaskId,
    outbound: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Queue one write; false if the pump has already stopped
    pub(crate) fn send(&self, data: Bytes) -> bool {
        self.outbound.send(data).is_ok()
    }

    /// Stop the pump and wait for its stream to close
    ///
    /// Closing the outbound queue lets the pump shut the stream down
    /// gracefully; a pump still stuck after `grace` is aborted.
    pub(crate) async fn close(self, grace: Duration) {
        let PumpHandle { outbound, mut task, .. } = self;
        drop(outbound);

        if timeout(grace, &mut task).await.is_err() {
            debug!("[PUMP] Close timed out, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

/// Spawn a pump over `stream`
pub(crate) fn spawn<S: TransportStream>(
    id: TaskId,
    stream: S,
    buffer_size: usize,
    reports: ReportSender<S>,
) -> PumpHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(id, stream, buffer_size, outbound_rx, reports));
    PumpHandle { id, outbound, task }
}

async fn run<S: TransportStream>(
    task: TaskId,
    stream: S,
    buffer_size: usize,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    reports: ReportSender<S>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Whichever direction finishes first ends the session
    let result = tokio::select! {
        result = inbound(task, &mut reader, buffer_size, &reports) => result,
        result = outbound(task, &mut writer, &mut outbound_rx, &reports) => result,
    };

    if let Err(error) = result {
        warn!("[PUMP] {}", error);
        let _ = reports.send(Report::Lost { task, error });
    }

    let mut stream = reader.unsplit(writer);
    if let Err(e) = TransportStream::shutdown(&mut stream).await {
        debug!("[PUMP] Shutdown: {:#}", e);
    }
    debug!("[PUMP] Stream closed");
}

/// Deliver one event per read until the stream fails or ends
async fn inbound<S: TransportStream>(
    task: TaskId,
    reader: &mut ReadHalf<S>,
    buffer_size: usize,
    reports: &ReportSender<S>,
) -> Result<(), ConnectionError> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection");
            return Err(eof.into());
        }

        debug!("[PUMP] Read {} bytes", n);
        let data = Bytes::copy_from_slice(&buf[..n]);
        if reports.send(Report::Received { task, data }).is_err() {
            return Ok(());
        }
    }
}

/// Write queued payloads until the queue closes or a write fails
async fn outbound<S: TransportStream>(
    task: TaskId,
    writer: &mut WriteHalf<S>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Bytes>,
    reports: &ReportSender<S>,
) -> Result<(), ConnectionError> {
    while let Some(data) = outbound_rx.recv().await {
        writer.write_all(&data).await?;
        writer.flush().await?;

        debug!("[PUMP] Wrote {} bytes", data.len());
        let _ = reports.send(Report::Sent { task, data });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNetwork, MemoryStream, Transport, TransportListener};
    use btchat_shared::PeerIdentity;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Stream whose reads never complete and whose writes always fail
    struct BrokenWriter;

    impl AsyncRead for BrokenWriter {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[async_trait::async_trait]
    impl TransportStream for BrokenWriter {
        async fn shutdown(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn stream_pair() -> (MemoryStream, MemoryStream) {
        let network = MemoryNetwork::new();
        let a = network.transport(PeerIdentity::unnamed("mem:a"));
        let b = network.transport(PeerIdentity::unnamed("mem:b"));

        let mut listener = a.bind().await.unwrap();
        let dial =
            tokio::spawn(async move { b.connect(&PeerIdentity::unnamed("mem:a")).await.unwrap() });
        let (accepted, _) = listener.accept().await.unwrap();
        (accepted, dial.await.unwrap())
    }

    async fn next_report(rx: &mut UnboundedReceiver<Report<MemoryStream>>) -> Report<MemoryStream> {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for report")
            .expect("report channel closed")
    }

    #[tokio::test]
    async fn test_reads_are_bounded_by_buffer() {
        let (local, mut remote) = stream_pair().await;
        let (reports, mut rx) = mpsc::unbounded_channel();
        let _pump = spawn(1, local, 4, reports);

        remote.write_all(b"abcdef").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 6 {
            match next_report(&mut rx).await {
                Report::Received { task: 1, data } => {
                    assert!(data.len() <= 4);
                    received.extend_from_slice(&data);
                }
                _ => panic!("expected received data"),
            }
        }
        assert_eq!(received, b"abcdef");
    }

    #[tokio::test]
    async fn test_write_is_acknowledged() {
        let (local, mut remote) = stream_pair().await;
        let (reports, mut rx) = mpsc::unbounded_channel();
        let pump = spawn(2, local, 256, reports);

        assert!(pump.send(Bytes::from_static(b"Hi")));

        match next_report(&mut rx).await {
            Report::Sent { task: 2, data } => assert_eq!(data, Bytes::from_static(b"Hi")),
            _ => panic!("expected sent report"),
        }

        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Hi");
    }

    #[tokio::test]
    async fn test_peer_close_reports_loss_once() {
        let (local, remote) = stream_pair().await;
        let (reports, mut rx) = mpsc::unbounded_channel();
        let pump = spawn(3, local, 256, reports);

        drop(remote);

        match next_report(&mut rx).await {
            Report::Lost { task: 3, error } => assert!(matches!(error, ConnectionError::Stream(_))),
            _ => panic!("expected loss report"),
        }

        // The pump ends after a loss; its report sender goes with it
        pump.close(Duration::from_secs(1)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_shuts_stream_without_loss_report() {
        let (local, mut remote) = stream_pair().await;
        let (reports, mut rx) = mpsc::unbounded_channel();
        let pump = spawn(4, local, 256, reports);

        pump.close(Duration::from_secs(1)).await;

        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_reports_loss_once() {
        let (reports, mut rx) = mpsc::unbounded_channel::<Report<BrokenWriter>>();
        let pump = spawn(5, BrokenWriter, 256, reports);

        assert!(pump.send(Bytes::from_static(b"Hi")));

        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            Some(Report::Lost {
                task: 5,
                error: ConnectionError::Stream(e),
            }) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            Some(Report::Sent { .. }) => panic!("failed write was acknowledged"),
            _ => panic!("expected loss report"),
        }

        // Nothing follows the loss; the pump has exited
        assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_none());
        pump.close(Duration::from_secs(1)).await;
    }
}
