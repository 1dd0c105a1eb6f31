//! # Link Runner
//!
//! The single worker of the communication manager. It owns the radio transport
//! and the duty cycle scheduler and is the only code that talks to the radio.
//!
//! ## Lifecycle
//!
//! 1. **Bring-up**: `begin()` until the transport is ready (state `Joining`)
//! 2. **Settle**: wait for the module to accept commands
//! 3. **Join**: OTAA join until accepted (state `Connected`)
//! 4. **Tick loop**: every tick ask the scheduler what is due and run at most one
//!    uplink attempt and one downlink poll
//!
//! Bring-up and join retry forever under the default policies, so the runner is
//! not responsive to queued work until the network accepted the join.
//!
//! ## Uplink Failures
//!
//! A frame that the transport rejects (`SendError`) or defers (`SendDelayed`) is
//! pushed back at the tail of the outbound queue and retried on a later send
//! interval. If the application filled the queue in the meantime, the frame is
//! dropped.

use core::fmt;

use embassy_time::{Instant, Timer};
use log::{Level, log};

use crate::connection::{ConnectionState, RetryPolicy};
use crate::duty_cycle::DutyCycleScheduler;
use crate::messages::{PayloadHex, RxMessage, POLL_FRAME};
use crate::radio_transports::{RadioTransport, SendOutcome};
use crate::{CommunicationManager, DownlinkPoll, DOWNLINK_PAYLOAD_SIZE};

/// Why the runner gave up connecting. Only produced by bounded retry policies.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum ConnectError {
    /// `begin()` failed on every allowed attempt
    BringUpFailed { attempts: u32 },
    /// The network rejected every allowed join attempt
    JoinRejected { attempts: u32 },
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::BringUpFailed { attempts } => write!(f, "radio bring-up failed after {} attempts", attempts),
            ConnectError::JoinRejected { attempts } => write!(f, "network join rejected after {} attempts", attempts),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConnectError {}

/// What an uplink attempt did with the head of the outbound queue
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum TransmitReport {
    /// Nothing was queued
    Idle,
    /// The frame went on air and was discarded
    Sent,
    /// The transport refused the frame; it is back at the tail of the queue
    Requeued(SendOutcome),
    /// The transport refused the frame and the queue had no room for it
    Dropped(SendOutcome),
}

/// What a downlink poll produced
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum PollReport {
    NoFrame,
    /// A frame was queued for the application
    Delivered,
    /// A frame arrived but the inbound queue was full
    Dropped,
}

/// Result of one scheduler evaluation; `None` means the attempt was not due
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TickReport {
    pub transmit: Option<TransmitReport>,
    pub poll: Option<PollReport>,
}

/// Worker driving the radio transport on behalf of a [`CommunicationManager`]
///
/// Obtained from [`CommunicationManager::enable`]. On embedded targets spawn
/// [`LinkRunner::run`] from an executor task:
///
/// ```rust,ignore
/// #[embassy_executor::task]
/// async fn link_task(runner: LinkRunner<'static, Lrwan1Modem>) -> ! {
///     runner.run().await
/// }
///
/// static MANAGER: CommunicationManager = CommunicationManager::new(LinkConfiguration::new(CREDENTIALS));
/// spawner.spawn(link_task(MANAGER.enable(modem).unwrap())).unwrap();
/// ```
pub struct LinkRunner<'a, T: RadioTransport> {
    manager: &'a CommunicationManager,
    transport: T,
    scheduler: DutyCycleScheduler,
}

impl<'a, T: RadioTransport> LinkRunner<'a, T> {
    pub(crate) fn new(manager: &'a CommunicationManager, transport: T) -> Self {
        let config = manager.configuration();
        LinkRunner {
            manager,
            transport,
            scheduler: DutyCycleScheduler::new(config.send_interval, config.poll_interval, Instant::from_ticks(0)),
        }
    }

    /// Connects and then serves the queues forever
    ///
    /// If a bounded retry policy gives up, the state is `Error` and the runner
    /// parks without touching the transport again.
    pub async fn run(mut self) -> ! {
        log!(Level::Info, "Link runner started");

        if let Err(err) = self.connect().await {
            log!(Level::Error, "Link unavailable: {}", err);
            loop {
                core::future::pending::<()>().await;
            }
        }

        self.restart_schedule(Instant::now());
        let tick = self.manager.configuration().tick;
        loop {
            self.tick(Instant::now()).await;
            Timer::after(tick).await;
        }
    }

    /// Brings the transport up and joins the network
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        let config = *self.manager.configuration();
        self.bring_up(config.bring_up_retry).await?;
        Timer::after(config.join_settle_delay).await;
        self.join(config.join_retry).await
    }

    async fn bring_up(&mut self, policy: RetryPolicy) -> Result<(), ConnectError> {
        log!(Level::Info, "Starting radio bring-up");
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            self.manager.record(|stats| stats.bring_up_attempts += 1);

            if self.transport.begin().await {
                self.manager.status.advance(ConnectionState::Joining);
                log!(Level::Info, "Radio up after {} attempt(s)", attempts);
                return Ok(());
            }

            if !policy.allows_retry(attempts) {
                self.manager.status.advance(ConnectionState::Error);
                return Err(ConnectError::BringUpFailed { attempts });
            }
            log!(Level::Warn, "Radio not ready, retrying in {} ms", policy.backoff.as_millis());
            Timer::after(policy.backoff).await;
        }
    }

    async fn join(&mut self, policy: RetryPolicy) -> Result<(), ConnectError> {
        let credentials = self.manager.configuration().credentials;
        log!(Level::Info, "Starting OTAA join, app EUI {}", credentials.app_eui);
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            self.manager.record(|stats| stats.join_attempts += 1);

            if self.transport.join(&credentials).await {
                self.manager.status.advance(ConnectionState::Connected);
                log!(Level::Info, "Join accepted after {} attempt(s), link up", attempts);
                return Ok(());
            }

            if !policy.allows_retry(attempts) {
                self.manager.status.advance(ConnectionState::Error);
                return Err(ConnectError::JoinRejected { attempts });
            }
            log!(Level::Warn, "Join failed, retrying in {} ms", policy.backoff.as_millis());
            Timer::after(policy.backoff).await;
        }
    }

    /// Restarts both duty cycle intervals at `now`
    pub fn restart_schedule(&mut self, now: Instant) {
        self.scheduler.restart(now);
    }

    /// Runs the attempts that are due at `now`
    ///
    /// Does nothing until the link is connected.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        if !self.manager.status().is_connected() {
            log!(Level::Debug, "Tick skipped, link not connected");
            return TickReport::default();
        }

        let due = self.scheduler.evaluate(now);
        let mut report = TickReport::default();
        if due.transmit {
            report.transmit = Some(self.transmit().await);
        }
        if due.poll {
            report.poll = Some(self.poll_downlink().await);
        }
        report
    }

    async fn transmit(&mut self) -> TransmitReport {
        let Some(message) = self.manager.outbound.try_pop() else {
            return TransmitReport::Idle;
        };

        let outcome = self.transport.send_frame(message.payload(), message.port()).await;
        match outcome {
            SendOutcome::Success => {
                self.manager.record(|stats| stats.frames_sent += 1);
                log!(Level::Info, "Frame sent, {} bytes on port {}", message.len(), message.port());
                TransmitReport::Sent
            }
            SendOutcome::SendError | SendOutcome::SendDelayed => {
                if outcome == SendOutcome::SendError {
                    self.manager.record(|stats| stats.send_errors += 1);
                    log!(Level::Warn, "Send frame failed");
                } else {
                    self.manager.record(|stats| stats.send_delays += 1);
                    log!(Level::Warn, "Radio busy or duty cycle exhausted");
                }

                match self.manager.outbound.try_push_or_return(message) {
                    Ok(()) => {
                        self.manager.record(|stats| stats.uplinks_requeued += 1);
                        TransmitReport::Requeued(outcome)
                    }
                    Err(dropped) => {
                        self.manager.record(|stats| stats.uplinks_dropped += 1);
                        log!(Level::Warn, "Outbound queue full, dropping failed frame of {} bytes", dropped.len());
                        TransmitReport::Dropped(outcome)
                    }
                }
            }
        }
    }

    async fn poll_downlink(&mut self) -> PollReport {
        let config = *self.manager.configuration();
        if let DownlinkPoll::PollFrame { listen_delay } = config.downlink_poll {
            match self.transport.send_frame(&POLL_FRAME, config.uplink_port).await {
                SendOutcome::Success => self.manager.record(|stats| stats.poll_frames_sent += 1),
                other => log!(Level::Debug, "Poll frame not sent: {}", outcome_name(other)),
            }
            Timer::after(listen_delay).await;
        }

        let mut buffer = [0u8; DOWNLINK_PAYLOAD_SIZE];
        let Some(info) = self.transport.receive_frame(&mut buffer).await else {
            return PollReport::NoFrame;
        };

        let length = info.length.min(buffer.len());
        let message = match RxMessage::with_port(&buffer[..length], info.port) {
            Ok(message) => message,
            Err(_) => return PollReport::NoFrame,
        };
        self.manager.record(|stats| stats.downlinks_received += 1);
        log!(Level::Info, "Frame received on port {}: {}", message.port(), PayloadHex(message.payload()));

        match self.manager.inbound.try_push_or_return(message) {
            Ok(()) => PollReport::Delivered,
            Err(dropped) => {
                self.manager.record(|stats| stats.downlinks_dropped += 1);
                log!(Level::Warn, "Inbound queue full, dropping frame of {} bytes", dropped.len());
                PollReport::Dropped
            }
        }
    }

    /// The transport driven by this runner
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn outcome_name(outcome: SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Success => "success",
        SendOutcome::SendError => "send error",
        SendOutcome::SendDelayed => "delayed",
    }
}
