//! # Echo Transport - Loopback Transport for Testing
//!
//! Minimal transport that answers every uplink with an identical downlink on
//! the same port. Bring-up and join always succeed immediately. Poll frames are
//! accepted but not echoed, so a poll after an uplink returns that uplink.
//!
//! Useful for smoke testing the link runner and the application loop without a
//! radio module. Only the most recent uplink is kept; an uplink that is not
//! polled before the next one is overwritten.

use log::{Level, log};

use super::{FrameInfo, RadioTransport, SendOutcome};
use crate::messages::is_poll_frame;
use crate::{JoinCredentials, TxMessage};

/// Loopback radio transport
#[derive(Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct EchoTransport {
    pending: Option<TxMessage>,
}

impl EchoTransport {
    pub const fn new() -> Self {
        EchoTransport { pending: None }
    }
}

impl RadioTransport for EchoTransport {
    async fn begin(&mut self) -> bool {
        log!(Level::Info, "Echo transport up");
        true
    }

    async fn join(&mut self, credentials: &JoinCredentials) -> bool {
        log!(Level::Info, "Echo transport accepting join for app EUI {}", credentials.app_eui);
        true
    }

    async fn send_frame(&mut self, payload: &[u8], port: u8) -> SendOutcome {
        if is_poll_frame(payload) {
            return SendOutcome::Success;
        }
        match TxMessage::with_port(payload, port) {
            Ok(message) => {
                if self.pending.replace(message).is_some() {
                    log!(Level::Warn, "Echo transport overwrote an unpolled uplink");
                }
                SendOutcome::Success
            }
            Err(_) => SendOutcome::SendError,
        }
    }

    async fn receive_frame(&mut self, buffer: &mut [u8]) -> Option<FrameInfo> {
        let message = self.pending.take()?;
        let length = message.copy_payload_to(buffer);
        Some(FrameInfo {
            length,
            port: message.port(),
        })
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use futures::executor::block_on;

    const CREDENTIALS: JoinCredentials = JoinCredentials::new("00112233445566778899AABBCCDDEEFF", "0011223344556677");

    #[test]
    fn echoes_last_uplink_once() {
        let mut transport = EchoTransport::new();
        let mut buffer = [0u8; 80];
        block_on(async {
            assert!(transport.begin().await);
            assert!(transport.join(&CREDENTIALS).await);
            assert_eq!(transport.receive_frame(&mut buffer).await, None);

            assert_eq!(transport.send_frame(b"hello", 3).await, SendOutcome::Success);
            let info = transport.receive_frame(&mut buffer).await.unwrap();
            assert_eq!(info, FrameInfo { length: 5, port: 3 });
            assert_eq!(&buffer[..5], b"hello");

            assert_eq!(transport.receive_frame(&mut buffer).await, None);
        });
    }

    #[test]
    fn poll_frame_is_not_echoed() {
        let mut transport = EchoTransport::new();
        let mut buffer = [0u8; 80];
        block_on(async {
            assert_eq!(transport.send_frame(b"data", 1).await, SendOutcome::Success);
            assert_eq!(transport.send_frame(&crate::POLL_FRAME, 1).await, SendOutcome::Success);
            let info = transport.receive_frame(&mut buffer).await.unwrap();
            assert_eq!(&buffer[..info.length], b"data");
        });
    }

    #[test]
    fn oversized_uplink_is_a_send_error() {
        let mut transport = EchoTransport::new();
        let payload = [1u8; 100];
        assert_eq!(block_on(transport.send_frame(&payload, 1)), SendOutcome::SendError);
    }
}
