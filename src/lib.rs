#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)] // We control the usage of this trait

//! Duty-cycle governed LoRaWAN communication manager.
//!
//! The application hands uplink payloads to a [`CommunicationManager`] and
//! drains downlinks from it; a single [`LinkRunner`] brings the radio up, joins
//! the network and then moves frames between the queues and the
//! [`RadioTransport`] at a fixed cadence.

pub mod bounded_queue;
pub mod connection;
pub mod duty_cycle;
pub mod link_runner;
pub mod messages;
pub mod radio_transports;

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;
use log::{Level, log};

pub use bounded_queue::BoundedQueue;
pub use connection::{ConnectionState, RetryPolicy};
pub use duty_cycle::{DueWork, DutyCycleScheduler};
pub use link_runner::{ConnectError, LinkRunner, PollReport, TickReport, TransmitReport};
pub use messages::{Message, MessageError, PayloadHex, RxMessage, TxMessage, POLL_FRAME};
pub use radio_transports::{EchoTransport, FrameInfo, RadioTransport, SendOutcome};

use connection::ConnectionStatus;

//Link-layer limits of the radio module
pub const UPLINK_PAYLOAD_SIZE: usize = 64;
pub const DOWNLINK_PAYLOAD_SIZE: usize = 80;

//Queue depths, these only affect how much can be buffered while the radio is busy
pub const OUTBOUND_QUEUE_SIZE: usize = 4;
pub const INBOUND_QUEUE_SIZE: usize = 2;

pub const DEFAULT_UPLINK_PORT: u8 = 1;

const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TICK: Duration = Duration::from_secs(30);
const DEFAULT_BRING_UP_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_JOIN_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_JOIN_SETTLE_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_DOWNLINK_LISTEN_DELAY: Duration = Duration::from_secs(10);

type OutboundQueue = BoundedQueue<TxMessage, OUTBOUND_QUEUE_SIZE>;
type InboundQueue = BoundedQueue<RxMessage, INBOUND_QUEUE_SIZE>;

/// OTAA join credentials, as issued by the network server
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct JoinCredentials {
    pub app_key: &'static str,
    pub app_eui: &'static str,
}

impl JoinCredentials {
    pub const fn new(app_key: &'static str, app_eui: &'static str) -> Self {
        JoinCredentials { app_key, app_eui }
    }
}

/// How the runner asks the network for downlinks
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum DownlinkPoll {
    /// Only query the transport for frames it already holds
    Passive,
    /// Send a one-byte poll frame to open a Class A receive window, wait
    /// `listen_delay`, then query the transport
    PollFrame { listen_delay: Duration },
}

/// Configuration for the link timing and join behaviour
///
/// Fixed at construction; there is no runtime reconfiguration.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkConfiguration {
    pub credentials: JoinCredentials,
    /// Minimum time between two uplink attempts
    pub send_interval: Duration,
    /// Minimum time between two downlink polls
    pub poll_interval: Duration,
    /// Sleep between two scheduler evaluations
    pub tick: Duration,
    pub bring_up_retry: RetryPolicy,
    pub join_retry: RetryPolicy,
    /// Pause between a successful bring-up and the first join request
    pub join_settle_delay: Duration,
    pub downlink_poll: DownlinkPoll,
    /// Port used for application uplinks and poll frames
    pub uplink_port: u8,
}

impl LinkConfiguration {
    /// Default timing: uplink every 30 min, poll every minute, wake every 30 s,
    /// unbounded bring-up and join retries.
    pub const fn new(credentials: JoinCredentials) -> Self {
        LinkConfiguration {
            credentials,
            send_interval: DEFAULT_SEND_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tick: DEFAULT_TICK,
            bring_up_retry: RetryPolicy::unbounded(DEFAULT_BRING_UP_BACKOFF),
            join_retry: RetryPolicy::unbounded(DEFAULT_JOIN_BACKOFF),
            join_settle_delay: DEFAULT_JOIN_SETTLE_DELAY,
            downlink_poll: DownlinkPoll::PollFrame {
                listen_delay: DEFAULT_DOWNLINK_LISTEN_DELAY,
            },
            uplink_port: DEFAULT_UPLINK_PORT,
        }
    }
}

/// Counters maintained by the manager and its runner
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkStatistics {
    /// Uplinks the transport confirmed as sent
    pub frames_sent: u32,
    pub send_errors: u32,
    pub send_delays: u32,
    /// Failed uplinks pushed back onto the outbound queue
    pub uplinks_requeued: u32,
    /// Uplinks lost to a full outbound queue, on enqueue or on requeue
    pub uplinks_dropped: u32,
    /// Payloads too large to become an uplink
    pub uplinks_rejected: u32,
    pub downlinks_received: u32,
    /// Downlinks lost to a full inbound queue
    pub downlinks_dropped: u32,
    pub poll_frames_sent: u32,
    pub bring_up_attempts: u32,
    pub join_attempts: u32,
}

impl LinkStatistics {
    const EMPTY: LinkStatistics = LinkStatistics {
        frames_sent: 0,
        send_errors: 0,
        send_delays: 0,
        uplinks_requeued: 0,
        uplinks_dropped: 0,
        uplinks_rejected: 0,
        downlinks_received: 0,
        downlinks_dropped: 0,
        poll_frames_sent: 0,
        bring_up_attempts: 0,
        join_attempts: 0,
    };
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum SendError {
    /// The outbound queue is full; the payload was discarded
    QueueFull,
    /// The payload exceeds `UPLINK_PAYLOAD_SIZE`
    PayloadTooLarge,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::QueueFull => write!(f, "outbound queue is full"),
            SendError::PayloadTooLarge => write!(f, "payload exceeds {} bytes", UPLINK_PAYLOAD_SIZE),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SendError {}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum EnableError {
    /// A runner was already handed out for this manager
    AlreadyEnabled,
    /// The worker thread could not be spawned
    SpawnFailed,
}

impl fmt::Display for EnableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnableError::AlreadyEnabled => write!(f, "communication manager already enabled"),
            EnableError::SpawnFailed => write!(f, "failed to spawn link worker"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EnableError {}

/// Communication manager shared between the application and the link runner
///
/// Owns both message queues, the connection state and the link statistics.
/// All methods take `&self` and never block, so one instance can live in a
/// `static` (embedded) or behind a `&'static` reference (std) and be used from
/// the application while the runner works on it.
///
/// # Example
/// ```rust
/// use lorawan_link_lib::{CommunicationManager, ConnectionState, JoinCredentials, LinkConfiguration};
///
/// static MANAGER: CommunicationManager =
///     CommunicationManager::new(LinkConfiguration::new(JoinCredentials::new("06EB704DA820830B830E0DE331380D5E", "70B3D57ED0037C11")));
///
/// assert_eq!(MANAGER.status(), ConnectionState::Uninitialized);
/// assert!(MANAGER.send(b"{\"temperature\":21.5}"));
/// assert_eq!(MANAGER.pending_uplinks(), 1);
/// ```
pub struct CommunicationManager {
    config: LinkConfiguration,
    pub(crate) outbound: OutboundQueue,
    pub(crate) inbound: InboundQueue,
    pub(crate) status: ConnectionStatus,
    statistics: Mutex<CriticalSectionRawMutex, Cell<LinkStatistics>>,
    enabled: Mutex<CriticalSectionRawMutex, Cell<bool>>,
}

impl CommunicationManager {
    pub const fn new(config: LinkConfiguration) -> Self {
        CommunicationManager {
            config,
            outbound: BoundedQueue::new(),
            inbound: BoundedQueue::new(),
            status: ConnectionStatus::new(),
            statistics: Mutex::new(Cell::new(LinkStatistics::EMPTY)),
            enabled: Mutex::new(Cell::new(false)),
        }
    }

    pub fn configuration(&self) -> &LinkConfiguration {
        &self.config
    }

    /// Hands out the runner that drives `transport` for this manager
    ///
    /// The runner does nothing until [`LinkRunner::run`] is spawned. Only one
    /// runner exists per manager.
    pub fn enable<T: RadioTransport>(&self, transport: T) -> Result<LinkRunner<'_, T>, EnableError> {
        let already_enabled = self.enabled.lock(|enabled| enabled.replace(true));
        if already_enabled {
            return Err(EnableError::AlreadyEnabled);
        }
        log!(Level::Debug, "Communication manager enabled");
        Ok(LinkRunner::new(self, transport))
    }

    /// Starts the runner on a dedicated OS thread
    #[cfg(feature = "std")]
    pub fn enable_thread<T>(&'static self, transport: T) -> Result<std::thread::JoinHandle<()>, EnableError>
    where
        T: RadioTransport + Send + 'static,
    {
        let runner = self.enable(transport)?;
        std::thread::Builder::new()
            .name("lorawan-link".into())
            .spawn(move || {
                futures::executor::block_on(runner.run());
            })
            .map_err(|err| {
                log!(Level::Error, "Failed to spawn link thread: {}", err);
                self.enabled.lock(|enabled| enabled.set(false));
                EnableError::SpawnFailed
            })
    }

    /// Current link state; never blocks
    pub fn status(&self) -> ConnectionState {
        self.status.get()
    }

    /// Queues an uplink payload for transmission
    ///
    /// Returns true whenever the payload was representable, including when it
    /// was dropped because the outbound queue is full. Use [`Self::try_send`]
    /// to observe drops. Returns false only for payloads longer than
    /// `UPLINK_PAYLOAD_SIZE`.
    pub fn send(&self, payload: &[u8]) -> bool {
        match self.try_send(payload) {
            Ok(()) | Err(SendError::QueueFull) => true,
            Err(SendError::PayloadTooLarge) => false,
        }
    }

    /// Queues an uplink payload, reporting why it was not accepted
    pub fn try_send(&self, payload: &[u8]) -> Result<(), SendError> {
        let message = TxMessage::with_port(payload, self.config.uplink_port).map_err(|_| {
            self.record(|stats| stats.uplinks_rejected += 1);
            log!(Level::Warn, "Uplink of {} bytes exceeds {} byte limit, rejected", payload.len(), UPLINK_PAYLOAD_SIZE);
            SendError::PayloadTooLarge
        })?;

        if self.outbound.try_push(message) {
            log!(Level::Debug, "Uplink of {} bytes queued", payload.len());
            Ok(())
        } else {
            self.record(|stats| stats.uplinks_dropped += 1);
            log!(Level::Warn, "Outbound queue full, dropping uplink of {} bytes", payload.len());
            Err(SendError::QueueFull)
        }
    }

    /// Takes the oldest downlink and copies its payload into `buffer`
    ///
    /// Returns the full payload length, or `None` if no downlink is waiting. If
    /// the payload is longer than `buffer`, only `buffer.len()` bytes are copied
    /// and the returned length exceeds `buffer.len()`; the rest is discarded.
    pub fn receive(&self, buffer: &mut [u8]) -> Option<usize> {
        let message = self.inbound.try_pop()?;
        let copied = message.copy_payload_to(buffer);
        if copied < message.len() {
            log!(Level::Warn, "Receive buffer of {} bytes truncated a {} byte downlink", buffer.len(), message.len());
        }
        Some(message.len())
    }

    /// Takes the oldest downlink, including its port
    pub fn receive_message(&self) -> Option<RxMessage> {
        self.inbound.try_pop()
    }

    pub fn statistics(&self) -> LinkStatistics {
        self.statistics.lock(|stats| stats.get())
    }

    pub fn pending_uplinks(&self) -> usize {
        self.outbound.len()
    }

    pub fn pending_downlinks(&self) -> usize {
        self.inbound.len()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut LinkStatistics)) {
        self.statistics.lock(|stats| {
            let mut current = stats.get();
            update(&mut current);
            stats.set(current);
        });
    }
}

#[cfg(all(test, feature = "std"))]
pub(crate) fn test_configuration() -> LinkConfiguration {
    let mut config = LinkConfiguration::new(JoinCredentials::new("06EB704DA820830B830E0DE331380D5E", "70B3D57ED0037C11"));
    config.send_interval = Duration::from_secs(60);
    config.poll_interval = Duration::from_secs(60);
    config.bring_up_retry = RetryPolicy::unbounded(Duration::from_millis(0));
    config.join_retry = RetryPolicy::unbounded(Duration::from_millis(0));
    config.join_settle_delay = Duration::from_millis(0);
    config.downlink_poll = DownlinkPoll::Passive;
    config
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::radio_transports::SimulatedTransport;
    use embassy_time::Instant;
    use futures::executor::block_on;

    #[test]
    fn default_configuration_matches_device_timing() {
        let config = LinkConfiguration::new(JoinCredentials::new("key", "eui"));
        assert_eq!(config.send_interval, Duration::from_secs(1800));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.tick, Duration::from_secs(30));
        assert_eq!(config.bring_up_retry.max_attempts, None);
        assert_eq!(config.join_retry.max_attempts, None);
        assert_eq!(config.uplink_port, DEFAULT_UPLINK_PORT);
        assert!(matches!(config.downlink_poll, DownlinkPoll::PollFrame { .. }));
    }

    #[test]
    fn fifth_send_is_dropped_but_reported_as_success() {
        let manager = CommunicationManager::new(test_configuration());
        for i in 0..5u8 {
            assert!(manager.send(&[i]));
        }
        assert_eq!(manager.pending_uplinks(), OUTBOUND_QUEUE_SIZE);
        assert_eq!(manager.statistics().uplinks_dropped, 1);

        for i in 0..4u8 {
            assert_eq!(manager.outbound.try_pop().unwrap().payload(), &[i]);
        }
        assert!(manager.outbound.try_pop().is_none());
    }

    #[test]
    fn try_send_reports_full_queue() {
        let manager = CommunicationManager::new(test_configuration());
        for _ in 0..OUTBOUND_QUEUE_SIZE {
            assert_eq!(manager.try_send(b"data"), Ok(()));
        }
        assert_eq!(manager.try_send(b"data"), Err(SendError::QueueFull));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let manager = CommunicationManager::new(test_configuration());
        let payload = [0u8; UPLINK_PAYLOAD_SIZE + 1];
        assert!(!manager.send(&payload));
        assert_eq!(manager.try_send(&payload), Err(SendError::PayloadTooLarge));
        assert_eq!(manager.pending_uplinks(), 0);
        assert_eq!(manager.statistics().uplinks_rejected, 2);
        assert_eq!(manager.statistics().uplinks_dropped, 0);
    }

    #[test]
    fn capacity_invariant_holds_for_any_send_sequence() {
        let manager = CommunicationManager::new(test_configuration());
        for i in 0..50u8 {
            manager.send(&[i; 3]);
            assert!(manager.pending_uplinks() <= OUTBOUND_QUEUE_SIZE);
            if i % 7 == 0 {
                manager.outbound.try_pop();
            }
        }
        for i in 0..10u8 {
            manager.inbound.try_push(RxMessage::new(&[i]).unwrap());
            assert!(manager.pending_downlinks() <= INBOUND_QUEUE_SIZE);
        }
    }

    #[test]
    fn receive_on_empty_queue_returns_none() {
        let manager = CommunicationManager::new(test_configuration());
        let mut buffer = [0u8; 80];
        assert_eq!(manager.receive(&mut buffer), None);
        assert!(manager.receive_message().is_none());
    }

    #[test]
    fn receive_truncates_into_small_buffer() {
        let manager = CommunicationManager::new(test_configuration());
        manager.inbound.try_push(RxMessage::with_port(b"plate=AB123;until=1730", 2).unwrap());
        let mut buffer = [0u8; 8];
        assert_eq!(manager.receive(&mut buffer), Some(22));
        assert_eq!(&buffer, b"plate=AB");
        assert_eq!(manager.pending_downlinks(), 0);
    }

    #[test]
    fn receive_message_keeps_port() {
        let manager = CommunicationManager::new(test_configuration());
        manager.inbound.try_push(RxMessage::with_port(b"x", 9).unwrap());
        let message = manager.receive_message().unwrap();
        assert_eq!(message.port(), 9);
        assert_eq!(message.payload(), b"x");
    }

    #[test]
    fn enable_hands_out_a_single_runner() {
        let manager = CommunicationManager::new(test_configuration());
        let (first, _) = SimulatedTransport::new();
        let (second, _) = SimulatedTransport::new();
        let _runner = manager.enable(first).unwrap();
        match manager.enable(second) {
            Err(EnableError::AlreadyEnabled) => {}
            Err(other) => panic!("Expected AlreadyEnabled, got {:?}", other),
            Ok(_) => panic!("Expected AlreadyEnabled, got a runner"),
        }
    }

    #[test]
    fn requeue_on_failure_keeps_message_and_counts_no_send() {
        let manager = CommunicationManager::new(test_configuration());
        let (transport, handle) = SimulatedTransport::new();
        handle.script_send(&[SendOutcome::SendError]);
        let mut runner = manager.enable(transport).unwrap();
        block_on(runner.connect()).unwrap();
        runner.restart_schedule(Instant::from_secs(0));

        manager.send(b"reading");
        block_on(runner.tick(Instant::from_secs(60)));

        assert_eq!(manager.pending_uplinks(), 1);
        assert_eq!(manager.statistics().frames_sent, 0);
        assert_eq!(manager.outbound.try_pop().unwrap().payload(), b"reading");
    }

    #[test]
    fn echo_link_round_trip_on_worker_thread() {
        let mut config = test_configuration();
        config.send_interval = Duration::from_millis(20);
        config.poll_interval = Duration::from_millis(20);
        config.tick = Duration::from_millis(5);
        config.downlink_poll = DownlinkPoll::PollFrame {
            listen_delay: Duration::from_millis(1),
        };
        let manager: &'static CommunicationManager = Box::leak(Box::new(CommunicationManager::new(config)));
        let _worker = manager.enable_thread(EchoTransport::new()).unwrap();
        assert_eq!(manager.enable_thread(EchoTransport::new()).err(), Some(EnableError::AlreadyEnabled));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while manager.status() != ConnectionState::Connected {
            assert!(std::time::Instant::now() < deadline, "link never connected");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert!(manager.send(b"{\"distance\":42}"));
        let mut buffer = [0u8; DOWNLINK_PAYLOAD_SIZE];
        let length = loop {
            if let Some(length) = manager.receive(&mut buffer) {
                break length;
            }
            assert!(std::time::Instant::now() < deadline, "no downlink received");
            std::thread::sleep(std::time::Duration::from_millis(5));
        };

        assert_eq!(&buffer[..length], b"{\"distance\":42}");
        let stats = manager.statistics();
        assert!(stats.frames_sent >= 1);
        assert!(stats.downlinks_received >= 1);
    }
}
