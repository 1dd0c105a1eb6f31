//! # Link Message Module
//!
//! Fixed-capacity payload container used by both link queues.
//!
//! ## Architecture
//!
//! A [`Message`] owns a byte buffer of compile-time capacity `N`, the number of
//! valid bytes in it and the LoRaWAN port the payload travels on. Messages are
//! created by copying caller bytes and are never modified afterwards; they are
//! moved into a queue on enqueue and moved out again on dequeue.
//!
//! - `TxMessage`: uplink payloads (device to network), 64 bytes
//! - `RxMessage`: downlink payloads (network to device), 80 bytes
//!
//! ## Poll Frames
//!
//! A Class A device only listens right after it transmitted. To ask the network
//! for pending downlinks the link sends the one-byte [`POLL_FRAME`]; loopback
//! transports recognise it with [`is_poll_frame`] and do not echo it.

use core::fmt;

use crate::{DEFAULT_UPLINK_PORT, DOWNLINK_PAYLOAD_SIZE, UPLINK_PAYLOAD_SIZE};

/// Payload of the uplink sent to solicit a Class A receive window
pub const POLL_FRAME: [u8; 1] = [0xFF];

/// Returns true if `payload` is exactly the downlink poll frame
pub fn is_poll_frame(payload: &[u8]) -> bool {
    payload == POLL_FRAME
}

/// Error type for message construction
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum MessageError {
    /// The payload does not fit into the message buffer
    PayloadTooLarge {
        /// Length of the rejected payload
        length: usize,
        /// Capacity of the message buffer
        capacity: usize,
    },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::PayloadTooLarge { length, capacity } => {
                write!(f, "payload of {} bytes exceeds message capacity of {} bytes", length, capacity)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MessageError {}

/// Immutable, fixed-capacity link payload
///
/// # Example
/// ```rust
/// use lorawan_link_lib::TxMessage;
///
/// let message = TxMessage::new(b"{\"t\":21.5}").unwrap();
/// assert_eq!(message.payload(), b"{\"t\":21.5}");
/// assert_eq!(message.port(), 1);
/// ```
#[derive(Clone)]
pub struct Message<const N: usize> {
    data: [u8; N],
    length: usize,
    port: u8,
}

/// Uplink message, as accepted by `CommunicationManager::send`
pub type TxMessage = Message<UPLINK_PAYLOAD_SIZE>;

/// Downlink message, as delivered by `CommunicationManager::receive_message`
pub type RxMessage = Message<DOWNLINK_PAYLOAD_SIZE>;

impl<const N: usize> Message<N> {
    /// Copies `payload` into a new message on the default uplink port
    pub fn new(payload: &[u8]) -> Result<Self, MessageError> {
        Self::with_port(payload, DEFAULT_UPLINK_PORT)
    }

    /// Copies `payload` into a new message bound to `port`
    ///
    /// # Errors
    /// `MessageError::PayloadTooLarge` if `payload` is longer than `N`.
    pub fn with_port(payload: &[u8], port: u8) -> Result<Self, MessageError> {
        if payload.len() > N {
            return Err(MessageError::PayloadTooLarge {
                length: payload.len(),
                capacity: N,
            });
        }
        let mut data = [0u8; N];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Message {
            data,
            length: payload.len(),
            port,
        })
    }

    /// Buffer capacity in bytes
    pub const fn capacity() -> usize {
        N
    }

    /// The valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// LoRaWAN application port of this payload
    pub fn port(&self) -> u8 {
        self.port
    }

    /// Copies as much of the payload as fits into `buffer`
    ///
    /// Returns the number of bytes copied, which is less than [`Message::len`]
    /// when `buffer` is too small.
    pub fn copy_payload_to(&self, buffer: &mut [u8]) -> usize {
        let copied = self.length.min(buffer.len());
        buffer[..copied].copy_from_slice(&self.data[..copied]);
        copied
    }
}

impl<const N: usize> PartialEq for Message<N> {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.payload() == other.payload()
    }
}

impl<const N: usize> Eq for Message<N> {}

#[cfg(feature = "std")]
impl<const N: usize> fmt::Debug for Message<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("port", &self.port)
            .field("length", &self.length)
            .field("payload", &PayloadHex(self.payload()))
            .finish()
    }
}

/// Formats a payload as space separated hex bytes for log output
pub struct PayloadHex<'a>(pub &'a [u8]);

impl fmt::Display for PayloadHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PayloadHex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
