//! UDP controller streaming channel.
//!
//! The channel owns at most one worker thread.  [`StreamingChannel::start`]
//! binds the UDP socket on the calling thread, so a port that cannot be bound
//! is reported straight back to the `#ArticController` handler, and then
//! spawns a named worker that:
//!
//! 1. Waits for a single handshake datagram from the peer (any payload of at
//!    least one byte).  The wait is bounded by `handshake_timeout` and the stop
//!    flag is polled every `poll_interval`.
//! 2. Latches the sender address and switches to `Running`.
//! 3. Every `period`, samples the [`InputSampler`], encodes a 32-byte
//!    [`ControllerPacket`] and sends it to the latched address.
//!
//! # Why a thread and not a tokio task (for beginners)
//!
//! The worker sleeps for ~2 ms between packets and makes blocking socket calls.
//! A plain OS thread gives it a predictable cadence and keeps it off the
//! runtime threads that serve the main channel.  `stop` sets an atomic flag
//! and *joins* the thread; when `stop` returns, the socket has been dropped
//! and no further packet can leave the device.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tether_core::protocol::SequenceCounter;
use tether_core::ControllerPacket;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::native::InputSampler;

/// Error type for streaming channel operations.
#[derive(Debug, Error)]
pub enum StreamingError {
    /// The UDP socket could not be bound.
    #[error("failed to bind stream socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The socket was bound but could not be configured.
    #[error("stream socket error: {0}")]
    Socket(io::Error),
    /// The worker thread could not be spawned.
    #[error("failed to spawn stream worker: {0}")]
    SpawnFailed(io::Error),
}

/// Lifecycle of the streaming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No worker, or the worker has exited.
    Stopped = 0,
    /// Socket bound; waiting for the peer's handshake datagram.
    Starting = 1,
    /// Handshake received; packets are flowing.
    Running = 2,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Starting,
            2 => StreamState::Running,
            _ => StreamState::Stopped,
        }
    }
}

/// Tunables for the streaming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingSettings {
    pub bind: IpAddr,
    /// UDP port to bind; `0` lets the OS choose.
    pub port: u16,
    pub period: Duration,
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive send failures tolerated before the worker gives up.
    pub max_send_failures: u32,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5553,
            period: Duration::from_micros(2000),
            handshake_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            max_send_failures: 1000,
        }
    }
}

/// State shared between the channel and its worker thread.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    packets_sent: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Single-owner UDP controller stream.
pub struct StreamingChannel {
    settings: StreamingSettings,
    sampler: Arc<dyn InputSampler>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl StreamingChannel {
    pub fn new(settings: StreamingSettings, sampler: Arc<dyn InputSampler>) -> Self {
        Self {
            settings,
            sampler,
            shared: Self::fresh_shared(),
            worker: None,
        }
    }

    fn fresh_shared() -> Arc<Shared> {
        Arc::new(Shared {
            state: AtomicU8::new(StreamState::Stopped as u8),
            stop: AtomicBool::new(false),
            packets_sent: AtomicU64::new(0),
        })
    }

    /// Starts streaming, stopping any previous worker first.
    ///
    /// Returns the bound UDP port.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::BindFailed`] if the port cannot be bound; the
    /// channel is left stopped.
    pub fn start(&mut self) -> Result<u16, StreamingError> {
        self.stop();

        let addr = SocketAddr::new(self.settings.bind, self.settings.port);
        let socket =
            UdpSocket::bind(addr).map_err(|source| StreamingError::BindFailed { addr, source })?;
        socket
            .set_read_timeout(Some(self.settings.poll_interval))
            .map_err(StreamingError::Socket)?;
        let port = socket.local_addr().map_err(StreamingError::Socket)?.port();

        let shared = Self::fresh_shared();
        shared.set_state(StreamState::Starting);

        let worker_shared = Arc::clone(&shared);
        let sampler = Arc::clone(&self.sampler);
        let settings = self.settings;
        let handle = std::thread::Builder::new()
            .name("tether-stream".to_string())
            .spawn(move || stream_loop(socket, settings, sampler, worker_shared))
            .map_err(StreamingError::SpawnFailed)?;

        self.shared = shared;
        self.worker = Some(handle);
        info!("controller stream listening on UDP {}:{port}", self.settings.bind);
        Ok(port)
    }

    /// Stops the worker and waits for it to exit.  Safe to call when stopped.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            error!("controller stream worker panicked");
        }
        self.shared.set_state(StreamState::Stopped);
        debug!("controller stream stopped");
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Packets sent by the current (or most recent) worker.
    pub fn packets_sent(&self) -> u64 {
        self.shared.packets_sent.load(Ordering::SeqCst)
    }
}

impl Drop for StreamingChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Where the send loop puts encoded packets.
#[cfg_attr(test, mockall::automock)]
trait PacketSink {
    fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<usize>;
}

impl PacketSink for UdpSocket {
    fn send_to(&self, packet: &[u8], peer: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, packet, peer)
    }
}

/// Body of the worker thread.
fn stream_loop(
    socket: UdpSocket,
    settings: StreamingSettings,
    sampler: Arc<dyn InputSampler>,
    shared: Arc<Shared>,
) {
    match await_handshake(&socket, &settings, &shared) {
        Some(peer) => {
            info!("controller stream handshake from {peer}");
            serve_peer(&socket, peer, &settings, sampler.as_ref(), &shared);
        }
        None => shared.set_state(StreamState::Stopped),
    }
}

/// Streams to `peer` until stopped or the sends keep failing.
fn serve_peer<S: PacketSink + ?Sized>(
    sink: &S,
    peer: SocketAddr,
    settings: &StreamingSettings,
    sampler: &dyn InputSampler,
    shared: &Shared,
) {
    shared.set_state(StreamState::Running);
    send_loop(sink, peer, settings, sampler, shared);
    shared.set_state(StreamState::Stopped);
}

/// Waits for the first non-empty datagram; returns its sender.
fn await_handshake(
    socket: &UdpSocket,
    settings: &StreamingSettings,
    shared: &Shared,
) -> Option<SocketAddr> {
    let deadline = Instant::now() + settings.handshake_timeout;
    let mut buf = [0u8; 64];

    while !shared.stop.load(Ordering::SeqCst) {
        if Instant::now() >= deadline {
            warn!(
                "controller stream handshake timed out after {:?}",
                settings.handshake_timeout
            );
            return None;
        }
        match socket.recv_from(&mut buf) {
            Ok((0, _)) => continue,
            Ok((_, src)) => return Some(src),
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("controller stream recv error: {e}");
                return None;
            }
        }
    }
    None
}

fn send_loop<S: PacketSink + ?Sized>(
    sink: &S,
    peer: SocketAddr,
    settings: &StreamingSettings,
    sampler: &dyn InputSampler,
    shared: &Shared,
) {
    let sequence = SequenceCounter::new();
    let mut failures: u32 = 0;

    while !shared.stop.load(Ordering::SeqCst) {
        let started = Instant::now();

        let packet = ControllerPacket::new(sequence.next(), sampler.sample());
        match sink.send_to(&packet.encode(), peer) {
            Ok(_) => {
                failures = 0;
                shared.packets_sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                failures += 1;
                if failures > settings.max_send_failures {
                    error!("controller stream giving up after {failures} failed sends: {e}");
                    return;
                }
                debug!("controller stream send failed ({failures}): {e}");
            }
        }

        if let Some(rest) = settings.period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::native::MockInputSampler;
    use std::sync::atomic::AtomicUsize;
    use tether_core::ControllerState;

    fn loopback_settings() -> StreamingSettings {
        StreamingSettings {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            handshake_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            ..StreamingSettings::default()
        }
    }

    fn sampler() -> Arc<dyn InputSampler> {
        let mut mock = MockInputSampler::new();
        mock.expect_sample().returning(|| ControllerState {
            buttons: 0x8,
            ..ControllerState::default()
        });
        Arc::new(mock)
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
        let e = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout_error(&e));
    }

    #[test]
    fn test_new_channel_is_stopped() {
        let channel = StreamingChannel::new(loopback_settings(), sampler());

        assert_eq!(channel.state(), StreamState::Stopped);
        assert_eq!(channel.packets_sent(), 0);
    }

    #[test]
    fn test_start_binds_and_waits_for_handshake() {
        // Arrange
        let mut channel = StreamingChannel::new(loopback_settings(), sampler());

        // Act
        let port = channel.start().expect("start");

        // Assert
        assert_ne!(port, 0);
        assert_eq!(channel.state(), StreamState::Starting);
        channel.stop();
        assert_eq!(channel.state(), StreamState::Stopped);
    }

    #[test]
    fn test_handshake_starts_packet_flow() {
        // Arrange
        let mut channel = StreamingChannel::new(loopback_settings(), sampler());
        let port = channel.start().expect("start");
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        // Act
        peer.send_to(&[1], ("127.0.0.1", port)).unwrap();
        let mut buf = [0u8; 64];
        let (first_len, _) = peer.recv_from(&mut buf).unwrap();
        let first = ControllerPacket::decode(&buf[..first_len]).unwrap();
        let (second_len, _) = peer.recv_from(&mut buf).unwrap();
        let second = ControllerPacket::decode(&buf[..second_len]).unwrap();

        // Assert
        assert_eq!(first_len, 32);
        assert_eq!(first.state.buttons, 0x8);
        assert!(second.sequence > first.sequence, "sequence must increase");
        assert_eq!(channel.state(), StreamState::Running);
        channel.stop();
    }

    #[test]
    fn test_handshake_timeout_stops_worker() {
        // Arrange
        let settings = StreamingSettings {
            handshake_timeout: Duration::from_millis(30),
            ..loopback_settings()
        };
        let mut channel = StreamingChannel::new(settings, sampler());
        channel.start().expect("start");

        // Act
        let deadline = Instant::now() + Duration::from_secs(2);
        while channel.state() != StreamState::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        // Assert
        assert_eq!(channel.state(), StreamState::Stopped);
        assert_eq!(channel.packets_sent(), 0);
    }

    #[test]
    fn test_start_on_occupied_port_reports_bind_failure() {
        // Arrange
        let occupant = UdpSocket::bind("127.0.0.1:0").unwrap();
        let settings = StreamingSettings {
            port: occupant.local_addr().unwrap().port(),
            ..loopback_settings()
        };
        let mut channel = StreamingChannel::new(settings, sampler());

        // Act
        let result = channel.start();

        // Assert
        assert!(matches!(result, Err(StreamingError::BindFailed { .. })));
        assert_eq!(channel.state(), StreamState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut channel = StreamingChannel::new(loopback_settings(), sampler());
        channel.stop();
        channel.start().unwrap();
        channel.stop();
        channel.stop();
        assert_eq!(channel.state(), StreamState::Stopped);
    }

    fn fast_settings(max_send_failures: u32) -> StreamingSettings {
        StreamingSettings {
            period: Duration::from_micros(1),
            max_send_failures,
            ..loopback_settings()
        }
    }

    fn running_shared() -> Arc<Shared> {
        let shared = StreamingChannel::fresh_shared();
        shared.set_state(StreamState::Starting);
        shared
    }

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
    }

    #[test]
    fn test_consecutive_send_failures_stop_the_worker() {
        // Arrange: every send fails
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = MockPacketSink::new();
        let counter = Arc::clone(&calls);
        sink.expect_send_to().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(refused())
        });
        let shared = running_shared();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        // Act
        serve_peer(&sink, peer, &fast_settings(3), sampler().as_ref(), &shared);

        // Assert
        assert_eq!(calls.load(Ordering::SeqCst), 4, "gives up on the fourth failure");
        assert_eq!(StreamState::from_u8(shared.state.load(Ordering::SeqCst)), StreamState::Stopped);
        assert_eq!(shared.packets_sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_successful_send_resets_the_failure_count() {
        // Arrange: three failures then one success, repeated; the sink asks
        // the worker to stop after twelve sends
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = running_shared();
        let mut sink = MockPacketSink::new();
        let counter = Arc::clone(&calls);
        let stopper = Arc::clone(&shared);
        sink.expect_send_to().returning(move |packet, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 12 {
                stopper.stop.store(true, Ordering::SeqCst);
            }
            if n % 4 == 0 {
                Ok(packet.len())
            } else {
                Err(refused())
            }
        });
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        // Act
        serve_peer(&sink, peer, &fast_settings(3), sampler().as_ref(), &shared);

        // Assert
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(shared.packets_sent.load(Ordering::SeqCst), 3);
    }
}
