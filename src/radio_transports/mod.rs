//! Radio transport abstraction
//!
//! The link manager never talks to radio hardware directly. Everything below the
//! join/send/receive primitives (modem commands, regional duty-cycle regulation,
//! MAC layer) belongs to a [`RadioTransport`] implementation:
//!
//! - `echo`: loopback transport that returns every uplink as the next downlink
//! - `simulator`: scriptable transport for host testing (std only)

pub mod echo;

#[cfg(feature = "std")]
pub mod simulator;

pub use echo::EchoTransport;

#[cfg(feature = "std")]
pub use simulator::{SimulatedTransport, SimulatorHandle};

use crate::JoinCredentials;

/// Result of handing an uplink frame to the transport
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum SendOutcome {
    /// The frame went on air
    Success,
    /// Hard failure, e.g. the modem rejected the frame
    SendError,
    /// Soft failure: the radio is busy or the regional duty cycle is exhausted
    SendDelayed,
}

/// Metadata of a received downlink frame
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FrameInfo {
    /// Number of payload bytes written into the receive buffer
    pub length: usize,
    /// LoRaWAN application port the frame arrived on
    pub port: u8,
}

/// Trait defining the interface for radio transport implementations
///
/// Implementations wrap a concrete LoRaWAN stack or modem. All methods are
/// driven exclusively by the link runner, one call at a time.
///
/// # Examples
/// ```rust,ignore
/// use lorawan_link_lib::{FrameInfo, JoinCredentials, RadioTransport, SendOutcome};
///
/// struct AtModem { /* uart, state */ }
///
/// impl RadioTransport for AtModem {
///     async fn begin(&mut self) -> bool { self.reset_and_configure_band().await }
///     async fn join(&mut self, credentials: &JoinCredentials) -> bool { self.join_otaa(credentials).await }
///     async fn send_frame(&mut self, payload: &[u8], port: u8) -> SendOutcome { self.send_unconfirmed(payload, port).await }
///     async fn receive_frame(&mut self, buffer: &mut [u8]) -> Option<FrameInfo> { self.read_downlink(buffer).await }
/// }
/// ```
pub trait RadioTransport {
    /// Brings the radio up. Idempotent; false means "not ready yet".
    async fn begin(&mut self) -> bool;

    /// Performs an OTAA join. False means the join was rejected or timed out.
    async fn join(&mut self, credentials: &JoinCredentials) -> bool;

    /// Transmits one unconfirmed uplink frame on `port`
    async fn send_frame(&mut self, payload: &[u8], port: u8) -> SendOutcome;

    /// Fetches a pending downlink into `buffer`, if any
    ///
    /// A returned `length` larger than `buffer.len()` is clamped by the caller.
    async fn receive_frame(&mut self, buffer: &mut [u8]) -> Option<FrameInfo>;
}
