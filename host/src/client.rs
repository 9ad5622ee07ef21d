//! # Async Link
//!
//! One tokio task owns the stream, the framer and the supervisor. Callers
//! never touch that state; they talk to the task through channels.
//!
//! ```text
//!   LinkHandle ──Request (mpsc)──► link task ──frames──► stream
//!        ▲                            │
//!        └──────LinkEvent (mpsc)──────┘◄──frames── stream
//! ```
//!
//! Retry policy lives in [`LinkHandle::request`]; the task only reports
//! timeouts.

use std::collections::VecDeque;
use std::time::Duration;

use rig_protocol::{
    build_command, build_ping, build_update_request, AckMask, CircuitMask, Clock, CommandFlags,
    Framer, FramerStats, LinkError, Packet, ParamMask, Supervisor, UpdateFlags, ValueContext,
    RX_SLOTS,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HostConfig;
use crate::error::{HostError, Result};

/// Bytes handed to the framer at once; at most `RX_SLOTS` frames can
/// complete within one piece
pub(crate) const FEED_LEN: usize = RX_SLOTS * 4;

const REQUEST_QUEUE: usize = 8;

/// Something the link task observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Packet(Packet),
    /// The pending exchange expired without a satisfying reply
    Timeout,
    /// The stream closed or failed; the task has stopped
    Disconnected,
}

/// Link counters, reported as JSON by [`LinkStats::to_json`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    #[serde(flatten)]
    pub framer: FramerStats,
    pub timeouts: u32,
    pub rx_overflows: u32,
    pub events_dropped: u32,
    pub awaiting_ack: bool,
}

impl LinkStats {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

enum Request {
    Send {
        packet: Packet,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats(oneshot::Sender<LinkStats>),
    Shutdown,
}

/// [`Clock`] on tokio's time source, so paused test time applies
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

struct LinkTask<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    framer: Framer,
    supervisor: Supervisor,
    clock: TokioClock,
    events: mpsc::Sender<LinkEvent>,
    stats: LinkStats,
    config: HostConfig,
}

impl<S: AsyncRead + AsyncWrite> LinkTask<S> {
    fn snapshot(&self) -> LinkStats {
        LinkStats {
            framer: self.framer.stats(),
            awaiting_ack: self.supervisor.is_awaiting_ack(),
            ..self.stats
        }
    }

    /// Queue an event without waiting; false once the handle is gone
    fn emit(&mut self, event: LinkEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!("event queue full, dropping {:?}", event);
                self.stats.events_dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn receive(&mut self, bytes: &[u8]) -> bool {
        for piece in bytes.chunks(FEED_LEN) {
            if self.framer.push_bytes(piece).is_err() {
                self.stats.rx_overflows += 1;
            }
            while let Some(packet) = self.framer.read() {
                if self.supervisor.observe(packet.kind) {
                    log::debug!("exchange satisfied by {:?}", packet.kind);
                }
                if !self.emit(LinkEvent::Packet(packet)) {
                    return false;
                }
            }
        }
        true
    }

    /// One write per frame, bounded by `write_timeout_ms`. A partial or
    /// stalled write fails the transmit; it is not retried.
    async fn transmit(&mut self, packet: &Packet) -> Result<()> {
        let limit = Duration::from_millis(self.config.write_timeout_ms.max(1));
        let frame = self.framer.encode(packet).map_err(LinkError::from)?;
        let expected = frame.len();
        let written = match tokio::time::timeout(limit, self.writer.write(frame)).await {
            Ok(result) => result?,
            Err(_) => 0,
        };
        if written != expected {
            log::warn!("short write: {} of {} bytes", written, expected);
            return Err(LinkError::ShortWrite { written, expected }.into());
        }
        match tokio::time::timeout(limit, self.writer.flush()).await {
            Ok(result) => result?,
            Err(_) => return Err(std::io::Error::from(std::io::ErrorKind::TimedOut).into()),
        }

        self.framer.record_tx(expected);
        log::trace!("tx {:?} flags={:#04x}", packet.kind, packet.flags);
        self.supervisor.arm(packet, self.clock.now_ms());
        Ok(())
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) -> Result<LinkStats> {
        let mut buf = vec![0u8; self.config.read_chunk.max(1)];
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Send { packet, reply }) => {
                        let result = self.transmit(&packet).await;
                        if let Err(e) = &result {
                            log::warn!("transmit failed: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(Request::Stats(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Request::Shutdown) | None => {
                        log::info!("link shutting down");
                        break;
                    }
                },
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        log::info!("stream closed by peer");
                        self.emit(LinkEvent::Disconnected);
                        break;
                    }
                    Ok(n) => {
                        if !self.receive(&buf[..n]) {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("stream read failed: {}", e);
                        self.emit(LinkEvent::Disconnected);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.supervisor.check_timeout(self.clock.now_ms()) {
                        self.stats.timeouts += 1;
                        if !self.emit(LinkEvent::Timeout) {
                            break;
                        }
                    }
                }
            }
        }

        Ok(self.snapshot())
    }
}

/// Caller side of a spawned link
pub struct LinkHandle {
    requests: mpsc::Sender<Request>,
    events: mpsc::Receiver<LinkEvent>,
    backlog: VecDeque<LinkEvent>,
    config: HostConfig,
}

/// Start the link task on `stream`.
///
/// The join handle resolves to the final counters once the link shuts down
/// or the stream closes.
pub fn spawn_link<S>(stream: S, config: HostConfig) -> (LinkHandle, JoinHandle<Result<LinkStats>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
    let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
    let (reader, writer) = tokio::io::split(stream);

    let task = LinkTask {
        reader,
        writer,
        framer: Framer::new(config.link.profile),
        supervisor: Supervisor::new(),
        clock: TokioClock::new(),
        events: event_tx,
        stats: LinkStats::default(),
        config: config.clone(),
    };
    let join = tokio::spawn(task.run(request_rx));

    let handle = LinkHandle {
        requests: request_tx,
        events: event_rx,
        backlog: VecDeque::new(),
        config,
    };
    (handle, join)
}

impl LinkHandle {
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Transmit one packet; resolves once the frame is written
    pub async fn send(&self, packet: Packet) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(Request::Send { packet, reply })
            .await
            .map_err(|_| HostError::Closed)?;
        result.await.map_err(|_| HostError::Closed)?
    }

    /// Request values with the configured timeout
    pub async fn send_update(
        &self,
        flags: UpdateFlags,
        circuits: CircuitMask,
        params: ParamMask,
    ) -> Result<()> {
        let packet = build_update_request(flags, circuits, params, self.config.link.timeout_secs)
            .map_err(LinkError::from)?;
        self.send(packet).await
    }

    pub async fn send_command(
        &self,
        flags: CommandFlags,
        circuits: CircuitMask,
        values: &[ValueContext],
    ) -> Result<()> {
        let packet = build_command(flags, circuits, values, self.config.link.timeout_secs)
            .map_err(LinkError::from)?;
        self.send(packet).await
    }

    /// Ping with the configured time-to-live
    pub async fn send_ping(&self) -> Result<()> {
        let link = &self.config.link;
        self.send(build_ping(link.ping_ttl, link.timeout_secs)).await
    }

    /// Next observed event; `None` once the task has stopped and every event
    /// was consumed
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        match self.backlog.pop_front() {
            Some(event) => Some(event),
            None => self.events.recv().await,
        }
    }

    /// Send `packet` and wait for a reply its ack mask accepts, resending
    /// after each timeout up to `request_attempts` times.
    ///
    /// Other packets that arrive meanwhile stay queued for
    /// [`LinkHandle::next_event`].
    pub async fn request(&mut self, mut packet: Packet) -> Result<Packet> {
        if packet.timeout == 0 {
            packet.timeout = self.config.link.timeout_secs.max(1);
        }
        let accepts = AckMask::for_request(&packet);
        if accepts.is_empty() {
            return Err(HostError::NoReplyExpected);
        }

        let attempts = self.config.request_attempts.max(1);
        for attempt in 1..=attempts {
            self.send(packet.clone()).await?;
            loop {
                match self.events.recv().await {
                    Some(LinkEvent::Packet(reply)) if accepts.accepts(reply.kind) => {
                        return Ok(reply)
                    }
                    Some(event @ LinkEvent::Packet(_)) => self.backlog.push_back(event),
                    Some(LinkEvent::Timeout) => {
                        log::warn!("attempt {}/{} timed out", attempt, attempts);
                        break;
                    }
                    Some(LinkEvent::Disconnected) => return Err(HostError::Disconnected),
                    None => return Err(HostError::Closed),
                }
            }
        }
        Err(HostError::RequestTimeout { attempts })
    }

    pub async fn stats(&self) -> Result<LinkStats> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(Request::Stats(reply))
            .await
            .map_err(|_| HostError::Closed)?;
        result.await.map_err(|_| HostError::Closed)
    }

    /// Ask the task to stop; succeeds if it already has
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown).await;
    }
}
