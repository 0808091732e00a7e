//! Multiplexed request/response channel over a single connection.
//!
//! Many requests share one connection. Each request is identified by the
//! sequence id in its envelope; responses may arrive in any order and are
//! matched back to the waiting [`ResponseListener`] by that id.
//!
//! # Architecture
//!
//! ```text
//! dispatch() ──► pending table ──► mailbox ──► Driver task ──► Writer task ──► socket
//!                      ▲                          │  ▲
//!                      └──── take(seq) ◄──────────┘  └── timers, write reports, reads
//! ```
//!
//! The driver task owns the read half and is the only place where timers
//! are armed, write completions are processed and responses are correlated.
//! Timer tasks just post a `Timeout` command to its mailbox.
//!
//! Every request is completed exactly once: the path that removes it from
//! the pending table owns the completion, and the `completed` flag guards
//! the listener call. Permits are released on the driver; the terminal
//! callback itself runs on the [`ResponseExecutor`].
//!
//! Handles hold the only strong mailbox senders. Once every handle is
//! dropped the driver shuts down and the connection is closed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backpressure::{
    InflightLimiter, InflightPermit, DEFAULT_MAX_PENDING_BYTES, DEFAULT_MAX_PENDING_REQUESTS,
};
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result, TimeoutKind};
use crate::executor::ResponseExecutor;
use crate::listener::ResponseListener;
use crate::protocol::{max_accepted_frame, peek_sequence_id, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use crate::timer::{self, TimerHandle};
use crate::writer::{spawn_writer_task, OutboundFrame, WriteReport, WriterHandle};

const READ_BUFFER_SIZE: usize = 64 * 1024;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-channel limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub max_pending_requests: usize,
    pub max_pending_bytes: usize,
    /// Inbound frames larger than this plus the envelope slack close the channel.
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Handle to a multiplexed connection. Cheap to clone.
///
/// Dropping the last handle closes the connection.
#[derive(Clone)]
pub struct MultiplexedChannel {
    shared: Arc<Shared>,
    mailbox: mpsc::UnboundedSender<Command>,
}

struct Shared {
    id: u64,
    endpoint: Endpoint,
    open: AtomicBool,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    limiter: InflightLimiter,
    /// Timers only; a weak sender does not keep the driver alive.
    mailbox: mpsc::WeakUnboundedSender<Command>,
    executor: ResponseExecutor,
    /// Set once the driver has failed every pending request and exited.
    terminated: AtomicBool,
    closed: Notify,
}

impl Shared {
    fn take(&self, sequence_id: u32) -> Option<PendingRequest> {
        self.pending.lock().remove(&sequence_id)
    }

    /// Register a request; hands it back if the id is already pending.
    fn insert(&self, request: PendingRequest) -> std::result::Result<(), PendingRequest> {
        match self.pending.lock().entry(request.sequence_id) {
            Entry::Occupied(_) => Err(request),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    fn drain(&self) -> Vec<PendingRequest> {
        self.pending.lock().drain().map(|(_, request)| request).collect()
    }

    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.pending
            .lock()
            .values()
            .filter_map(|request| request.permit.as_ref())
            .map(InflightPermit::size)
            .sum()
    }
}

enum Command {
    Write {
        sequence_id: u32,
        frame: Bytes,
        oneway: bool,
    },
    Timeout {
        sequence_id: u32,
        kind: TimeoutKind,
    },
    Close,
}

enum Event {
    Command(Option<Command>),
    Written(Option<WriteReport>),
    Read(std::io::Result<usize>),
}

enum Outcome {
    Response(Bytes),
    Failed(MuxError),
    /// Oneway request written; nothing more will happen.
    Sent,
}

/// A request awaiting its response.
struct PendingRequest {
    sequence_id: u32,
    listener: Option<Box<dyn ResponseListener>>,
    deadline: Instant,
    permit: Option<InflightPermit>,
    send_timer: Option<TimerHandle>,
    receive_timer: Option<TimerHandle>,
    completed: AtomicBool,
}

impl PendingRequest {
    fn new(
        sequence_id: u32,
        listener: Box<dyn ResponseListener>,
        deadline: Instant,
        permit: InflightPermit,
    ) -> Self {
        Self {
            sequence_id,
            listener: Some(listener),
            deadline,
            permit: Some(permit),
            send_timer: None,
            receive_timer: None,
            completed: AtomicBool::new(false),
        }
    }

    /// The response may be read before the write report is processed;
    /// the listener still sees `on_request_sent` first.
    fn respond(mut self, body: Bytes, executor: &ResponseExecutor) {
        if self.send_timer.is_some() {
            self.notify_sent();
        }
        self.complete(Outcome::Response(body), executor);
    }

    fn notify_sent(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_request_sent())).is_err() {
                tracing::error!("Listener for request {} panicked in on_request_sent", self.sequence_id);
            }
        }
    }

    /// Cancel timers, release permits, then hand the listener to the
    /// executor for its single terminal callback.
    fn complete(mut self, outcome: Outcome, executor: &ResponseExecutor) {
        if let Some(timer) = self.send_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.receive_timer.take() {
            timer.cancel();
        }
        drop(self.permit.take());

        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(listener) = self.listener.take() else {
            return;
        };
        match outcome {
            Outcome::Response(body) => {
                executor.execute(move || listener.on_response_received(body))
            }
            Outcome::Failed(cause) => executor.execute(move || listener.on_channel_error(cause)),
            Outcome::Sent => drop(listener),
        }
    }
}

impl MultiplexedChannel {
    /// Start a channel over an established connection with its own
    /// response executor.
    ///
    /// Spawns the driver and writer tasks; must be called within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, endpoint: Endpoint, config: &ChannelConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_executor(reader, writer, endpoint, config, ResponseExecutor::default())
    }

    /// Start a channel whose callbacks run on a shared `executor`.
    pub fn with_executor<R, W>(
        reader: R,
        writer: W,
        endpoint: Endpoint,
        config: &ChannelConfig,
        executor: ResponseExecutor,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            open: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            limiter: InflightLimiter::new(config.max_pending_requests, config.max_pending_bytes),
            mailbox: mailbox.downgrade(),
            executor,
            terminated: AtomicBool::new(false),
            closed: Notify::new(),
        });

        let (writer, reports, writer_task) = spawn_writer_task(writer);
        let driver = Driver {
            shared: shared.clone(),
            commands,
            reports,
            writer,
            writer_task,
            frames: FrameBuffer::with_max_frame(max_accepted_frame(config.max_frame_size)),
        };
        tokio::spawn(driver.run(reader));

        tracing::debug!("Channel {} to {} opened", shared.id, shared.endpoint);
        Self { shared, mailbox }
    }

    /// Register a request and queue its frame for writing.
    ///
    /// `frame` is the complete wire frame (length prefix included) whose
    /// envelope carries `sequence_id`. Waits up to half of `timeout` for a
    /// request slot and half of the remainder for byte budget; whatever is
    /// left bounds the send and receive timers.
    ///
    /// An `Err` means the listener was dropped without being called.
    /// On `Ok`, the listener receives exactly one terminal callback (oneway
    /// requests: `on_request_sent` only).
    pub async fn dispatch(
        &self,
        sequence_id: u32,
        frame: Bytes,
        oneway: bool,
        listener: Box<dyn ResponseListener>,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = timer::deadline_after(timeout);
        let (permit, _remaining) = self.shared.limiter.acquire(frame.len(), timeout).await?;

        if !self.is_open() {
            return Err(self.not_connected());
        }

        let request = PendingRequest::new(sequence_id, listener, deadline, permit);
        if self.shared.insert(request).is_err() {
            tracing::error!(
                "Sequence id {} already pending on channel {}, rejecting new request",
                sequence_id,
                self.shared.id
            );
            return Err(MuxError::Protocol(format!(
                "Sequence id {} is already pending",
                sequence_id
            )));
        }

        let command = Command::Write {
            sequence_id,
            frame,
            oneway,
        };
        if self.mailbox.send(command).is_err() && self.shared.take(sequence_id).is_some() {
            return Err(self.not_connected());
        }
        // Otherwise the driver's shutdown already failed it through the listener.
        Ok(())
    }

    /// Close the connection, failing every pending request.
    pub fn close(&self) {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            let _ = self.mailbox.send(Command::Close);
        }
    }

    /// Resolves once the channel is closed, locally or by the peer.
    pub async fn closed(&self) {
        let notified = self.shared.closed.notified();
        if self.shared.terminated.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Unique id of this channel within the process.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Requests registered and not yet completed.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn available_slots(&self) -> usize {
        self.shared.limiter.available_slots()
    }

    pub fn available_bytes(&self) -> usize {
        self.shared.limiter.available_bytes()
    }

    pub fn limiter(&self) -> &InflightLimiter {
        &self.shared.limiter
    }

    fn not_connected(&self) -> MuxError {
        MuxError::NotConnected {
            endpoint: self.shared.endpoint.to_string(),
        }
    }
}

impl fmt::Debug for MultiplexedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedChannel")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Single execution context of a channel.
struct Driver {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports: mpsc::UnboundedReceiver<WriteReport>,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    frames: FrameBuffer,
}

impl Driver {
    async fn run<R: AsyncRead + Unpin>(mut self, mut reader: R) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let cause = loop {
            let event = tokio::select! {
                biased;
                command = self.commands.recv() => Event::Command(command),
                report = self.reports.recv() => Event::Written(report),
                read = reader.read(&mut buf) => Event::Read(read),
            };

            match event {
                Event::Command(Some(Command::Write {
                    sequence_id,
                    frame,
                    oneway,
                })) => self.submit(sequence_id, frame, oneway),
                Event::Command(Some(Command::Timeout { sequence_id, kind })) => {
                    self.expire(sequence_id, kind)
                }
                Event::Command(Some(Command::Close)) => {
                    break MuxError::ChannelError(format!(
                        "channel to {} closed",
                        self.shared.endpoint
                    ));
                }
                Event::Command(None) => {
                    break MuxError::ChannelError(format!(
                        "every handle to channel {} was dropped",
                        self.shared.id
                    ));
                }
                Event::Written(Some(report)) => self.on_written(report),
                Event::Written(None) => {
                    break MuxError::ChannelError("writer stopped".to_string());
                }
                Event::Read(Ok(0)) => {
                    break MuxError::ChannelError(format!(
                        "connection to {} closed by peer",
                        self.shared.endpoint
                    ));
                }
                Event::Read(Ok(n)) => {
                    if let Err(e) = self.on_readable(&buf[..n]) {
                        break e;
                    }
                }
                Event::Read(Err(e)) => {
                    break MuxError::ChannelError(format!(
                        "read from {} failed: {}",
                        self.shared.endpoint, e
                    ));
                }
            }
        };

        self.shutdown(cause);
    }

    fn schedule_timeout(&self, sequence_id: u32, deadline: Instant, kind: TimeoutKind) -> TimerHandle {
        let mailbox = self.shared.mailbox.clone();
        timer::schedule_at(deadline, move || {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Command::Timeout { sequence_id, kind });
            }
        })
    }

    fn submit(&mut self, sequence_id: u32, frame: Bytes, oneway: bool) {
        {
            let mut pending = self.shared.pending.lock();
            let Some(request) = pending.get_mut(&sequence_id) else {
                return;
            };
            request.send_timer = Some(self.schedule_timeout(sequence_id, request.deadline, TimeoutKind::Send));
        }

        let frame = OutboundFrame {
            sequence_id,
            oneway,
            bytes: frame,
        };
        if let Err(e) = self.writer.send(frame) {
            if let Some(request) = self.shared.take(sequence_id) {
                request.complete(Outcome::Failed(e), &self.shared.executor);
            }
        }
    }

    fn on_written(&mut self, report: WriteReport) {
        // Already timed out or answered
        let Some(mut request) = self.shared.take(report.sequence_id) else {
            return;
        };
        if let Some(timer) = request.send_timer.take() {
            timer.cancel();
        }

        if let Err(cause) = report.result {
            request.complete(Outcome::Failed(cause), &self.shared.executor);
            return;
        }

        request.notify_sent();

        if report.oneway {
            tracing::debug!(
                "Oneway request {} written on channel {}",
                report.sequence_id,
                self.shared.id
            );
            request.complete(Outcome::Sent, &self.shared.executor);
            return;
        }

        if Instant::now() >= request.deadline {
            request.complete(
                Outcome::Failed(MuxError::TimedOut(TimeoutKind::Receive)),
                &self.shared.executor,
            );
            return;
        }

        request.receive_timer = Some(self.schedule_timeout(
            report.sequence_id,
            request.deadline,
            TimeoutKind::Receive,
        ));
        if let Err(request) = self.shared.insert(request) {
            request.complete(
                Outcome::Failed(MuxError::Protocol(format!(
                    "Sequence id {} reused while in flight",
                    report.sequence_id
                ))),
                &self.shared.executor,
            );
        }
    }

    fn expire(&mut self, sequence_id: u32, kind: TimeoutKind) {
        if let Some(request) = self.shared.take(sequence_id) {
            tracing::warn!(
                "Request {} on channel {} to {} timed out waiting to {}",
                sequence_id,
                self.shared.id,
                self.shared.endpoint,
                kind
            );
            request.complete(Outcome::Failed(MuxError::TimedOut(kind)), &self.shared.executor);
        }
    }

    fn on_readable(&mut self, data: &[u8]) -> Result<()> {
        let bodies = self
            .frames
            .push(data)
            .map_err(|e| MuxError::Protocol(format!("inbound frame rejected: {}", e)))?;

        for body in bodies {
            let sequence_id = peek_sequence_id(&body)?;
            match self.shared.take(sequence_id) {
                Some(request) => request.respond(body, &self.shared.executor),
                None => tracing::debug!(
                    "No pending request for sequence id {} on channel {}, dropping response",
                    sequence_id,
                    self.shared.id
                ),
            }
        }
        Ok(())
    }

    fn shutdown(mut self, cause: MuxError) {
        self.shared.open.store(false, Ordering::Release);
        self.commands.close();

        let mut failed = self.shared.drain();
        // Writes queued before the mailbox closed belong to drained requests.
        while self.commands.try_recv().is_ok() {}
        failed.extend(self.shared.drain());

        self.writer_task.abort();

        if failed.is_empty() {
            tracing::debug!("Channel {} to {} closed: {}", self.shared.id, self.shared.endpoint, cause);
        } else {
            tracing::warn!(
                "Channel {} to {} closed with {} pending requests: {}",
                self.shared.id,
                self.shared.endpoint,
                failed.len(),
                cause
            );
        }

        for request in failed {
            request.complete(Outcome::Failed(cause.clone()), &self.shared.executor);
        }
        self.shared.terminated.store(true, Ordering::Release);
        self.shared.closed.notify_waiters();
    }
}
