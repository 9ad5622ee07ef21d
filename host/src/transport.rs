//! Blocking-free adapters for driving a [`rig_protocol::Link`] from plain
//! `std` code, plus the bounded wait used by one-shot tools.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use rig_protocol::traits::TransportResult;
use rig_protocol::{Clock, Link, Packet, Transport, TransportError};

use crate::error::{HostError, Result};

/// [`Transport`] over a `std` stream in non-blocking mode
pub struct StdTransport<S> {
    stream: S,
}

impl StdTransport<TcpStream> {
    /// Wrap a TCP stream, switching it to non-blocking reads
    pub fn tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl<S> StdTransport<S> {
    /// Wrap a stream the caller already made non-blocking
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn map_io_error(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io,
    }
}

impl<S: Read + Write> Transport for StdTransport<S> {
    fn read_available(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(map_io_error(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> TransportResult<usize> {
        match self.stream.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(map_io_error(e)),
        }
    }
}

/// Milliseconds since the clock was created
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Poll `link` until the pending exchange is satisfied or times out.
///
/// Packets that arrive meanwhile are returned in receipt order; the last one
/// is the reply. Nothing else runs while this waits.
pub fn wait_reply<T: Transport, C: Clock>(
    link: &mut Link<T, C>,
    poll_every: Duration,
) -> Result<Vec<Packet>> {
    let mut received = Vec::new();
    loop {
        if let Some(packet) = link.poll_link()? {
            received.push(packet);
            if !link.is_awaiting_ack() {
                return Ok(received);
            }
            continue;
        }
        if !link.is_awaiting_ack() {
            return Ok(received);
        }
        if link.check_timeout(link.now_ms()) {
            return Err(HostError::RequestTimeout { attempts: 1 });
        }
        std::thread::sleep(poll_every);
    }
}
