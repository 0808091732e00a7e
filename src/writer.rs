//! Dedicated writer task for a channel's write half.
//!
//! The channel driver hands complete frames (length prefix included) to the
//! writer through an mpsc channel. The writer batches whatever is queued into
//! a single vectored write and reports the outcome of every frame back on a
//! second channel, so the driver learns which requests are on the wire.
//!
//! # Architecture
//!
//! ```text
//! Driver ─► mpsc<OutboundFrame> ─► Writer Task ─► socket
//!   ▲                                  │
//!   └────────── mpsc<WriteReport> ◄────┘
//! ```
//!
//! Admission is already bounded by the channel's in-flight limits, so the
//! frame queue itself is unbounded.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MuxError, Result};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    pub sequence_id: u32,
    pub oneway: bool,
    /// Length prefix and body.
    pub bytes: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Outcome of writing one frame.
#[derive(Debug)]
pub(crate) struct WriteReport {
    pub sequence_id: u32,
    pub oneway: bool,
    pub result: Result<()>,
}

/// Handle for queueing frames on the writer task.
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame. Fails only once the writer task has stopped.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| MuxError::SendFailed("writer stopped".to_string()))
    }
}

/// Spawn the writer task.
///
/// Returns the frame handle, the receiver for per-frame reports and the
/// task handle. The task ends cleanly when the handle is dropped, or with
/// an error after the first failed write.
pub(crate) fn spawn_writer_task<W>(
    writer: W,
) -> (
    WriterHandle,
    mpsc::UnboundedReceiver<WriteReport>,
    JoinHandle<Result<()>>,
)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer, report_tx));
    (WriterHandle { tx }, report_rx, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    reports: mpsc::UnboundedSender<WriteReport>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                for frame in &batch {
                    let _ = reports.send(WriteReport {
                        sequence_id: frame.sequence_id,
                        oneway: frame.oneway,
                        result: Ok(()),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Write of {} frames failed: {}", batch.len(), e);
                let cause = MuxError::SendFailed(e.to_string());
                for frame in &batch {
                    let _ = reports.send(WriteReport {
                        sequence_id: frame.sequence_id,
                        oneway: frame.oneway,
                        result: Err(cause.clone()),
                    });
                }
                return Err(e);
            }
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxError::from(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut frame_start = 0;

    for frame in batch {
        let frame_end = frame_start + frame.size();
        if skip_bytes < frame_end && !frame.bytes.is_empty() {
            let offset = skip_bytes.saturating_sub(frame_start);
            slices.push(IoSlice::new(&frame.bytes[offset..]));
        }
        frame_start = frame_end;
    }

    slices
}
