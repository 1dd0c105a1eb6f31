//! # Messages Module
//!
//! Payload containers carried by the link queues.
//!
//! - `Message<N>`: immutable payload of at most `N` bytes plus its LoRaWAN port
//! - `TxMessage` / `RxMessage`: the uplink (64 byte) and downlink (80 byte) sizes
//! - `PayloadHex`: hex formatter used when payloads are logged

pub mod link_message;

pub use link_message::{is_poll_frame, Message, MessageError, PayloadHex, RxMessage, TxMessage, POLL_FRAME};
