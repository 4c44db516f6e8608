use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;

/// Bytes handed to the wire so far for one request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// `floor(bytes_sent / total_bytes * 100)`, clamped to 100. An empty body counts as done.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.bytes_sent.saturating_mul(100) / self.total_bytes;
        pct.min(100) as u8
    }
}

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

pin_project! {
    /// Wraps a body stream and reports cumulative bytes as the HTTP client pulls chunks.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        total_bytes: u64,
        progress_tx: Option<ProgressSender>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total_bytes: u64, progress_tx: Option<ProgressSender>) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            total_bytes,
            progress_tx,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    if let Some(tx) = this.progress_tx.as_ref() {
                        // 接收端已关闭说明这次尝试被放弃了，忽略即可
                        let _ = tx.send(TransferProgress {
                            bytes_sent: *this.bytes_sent,
                            total_bytes: *this.total_bytes,
                        });
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_percent_floors() {
        let p = |sent, total| TransferProgress { bytes_sent: sent, total_bytes: total }.percent();
        assert_eq!(p(0, 1000), 0);
        assert_eq!(p(999, 1000), 99);
        assert_eq!(p(1000, 1000), 100);
        assert_eq!(p(1, 3), 33);
        assert_eq!(p(0, 0), 100);
    }

    #[tokio::test]
    async fn test_progress_stream_reports_cumulative_bytes() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abcd")),
            Ok(Bytes::from_static(b"efgh")),
            Ok(Bytes::from_static(b"ij")),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = ProgressStream::new(futures::stream::iter(chunks), 10, Some(tx));

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 3);

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p.percent());
        }
        assert_eq!(seen, vec![40, 80, 100]);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
    }
}
