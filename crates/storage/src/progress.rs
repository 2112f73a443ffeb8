//! Byte-level progress for streamed request bodies.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use shared::domain::TransferProgress;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

/// Finite stream of `(bytes_transferred, total_bytes)` updates. It ends once
/// every sender is dropped, which happens when the request body is consumed
/// or the request is abandoned.
pub struct ProgressStream {
    inner: UnboundedReceiverStream<TransferProgress>,
}

impl ProgressStream {
    /// Updates already queued, without waiting for the senders to close.
    pub fn drain_ready(&mut self) -> Vec<TransferProgress> {
        let mut ready = Vec::new();
        while let Ok(update) = self.inner.as_mut().try_recv() {
            ready.push(update);
        }
        ready
    }
}

impl Stream for ProgressStream {
    type Item = TransferProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        tx,
        ProgressStream {
            inner: UnboundedReceiverStream::new(rx),
        },
    )
}

/// Splits `content` into chunks and reports the running byte count as each
/// chunk is handed to the transport.
pub fn progress_chunks(
    content: Arc<Vec<u8>>,
    chunk_bytes: usize,
    progress: ProgressSender,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static {
    let chunk_bytes = chunk_bytes.max(1);
    let total = content.len() as u64;
    futures::stream::unfold(0usize, move |offset| {
        let content = content.clone();
        let progress = progress.clone();
        async move {
            if offset >= content.len() {
                return None;
            }
            let end = (offset + chunk_bytes).min(content.len());
            let chunk = content[offset..end].to_vec();
            let _ = progress.send(TransferProgress::new(end as u64, total));
            Some((Ok(chunk), end))
        }
    })
}

pub fn progress_body(
    content: Arc<Vec<u8>>,
    chunk_bytes: usize,
    progress: ProgressSender,
) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_chunks(content, chunk_bytes, progress))
}
