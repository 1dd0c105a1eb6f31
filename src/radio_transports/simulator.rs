//! # Simulated Transport - Scriptable Radio for Host Testing
//!
//! A transport whose answers are scripted ahead of time and whose calls are
//! recorded for later inspection. The transport itself is handed to the link
//! runner; the paired [`SimulatorHandle`] stays with the test (or the host
//! application) and can script further answers while the runner is active.
//!
//! ## Scripting
//!
//! - `begin` / `join` answers are consumed in order; once a script runs out the
//!   call succeeds
//! - `send_frame` outcomes are consumed in order; once exhausted every frame
//!   succeeds
//! - downlinks are queued and handed out one per `receive_frame` call

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{Level, log};

use super::{FrameInfo, RadioTransport, SendOutcome};
use crate::messages::PayloadHex;
use crate::JoinCredentials;

/// One recorded `send_frame` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedUplink {
    pub payload: Vec<u8>,
    pub port: u8,
    pub outcome: SendOutcome,
}

#[derive(Default, Debug)]
struct SimulatorState {
    begin_results: VecDeque<bool>,
    join_results: VecDeque<bool>,
    send_outcomes: VecDeque<SendOutcome>,
    downlinks: VecDeque<(Vec<u8>, u8)>,
    begin_calls: u32,
    join_calls: u32,
    receive_calls: u32,
    joined_app_eui: Option<String>,
    uplinks: Vec<RecordedUplink>,
}

/// Test-side handle for scripting and inspecting a [`SimulatedTransport`]
#[derive(Clone, Debug)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimulatorState>>,
}

/// Scriptable radio transport
#[derive(Debug)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimulatorState>>,
}

fn lock(state: &Mutex<SimulatorState>) -> MutexGuard<'_, SimulatorState> {
    // A panicking test thread must not hide the recorded calls from the others.
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimulatedTransport {
    /// Creates a transport and the handle that scripts it
    pub fn new() -> (Self, SimulatorHandle) {
        let state = Arc::new(Mutex::new(SimulatorState::default()));
        (SimulatedTransport { state: state.clone() }, SimulatorHandle { state })
    }
}

impl SimulatorHandle {
    /// Queues answers for upcoming `begin` calls
    pub fn script_begin(&self, results: &[bool]) {
        lock(&self.state).begin_results.extend(results.iter().copied());
    }

    /// Queues answers for upcoming `join` calls
    pub fn script_join(&self, results: &[bool]) {
        lock(&self.state).join_results.extend(results.iter().copied());
    }

    /// Queues outcomes for upcoming `send_frame` calls
    pub fn script_send(&self, outcomes: &[SendOutcome]) {
        lock(&self.state).send_outcomes.extend(outcomes.iter().copied());
    }

    /// Queues a downlink returned by a later `receive_frame` call
    pub fn push_downlink(&self, payload: &[u8], port: u8) {
        lock(&self.state).downlinks.push_back((payload.to_vec(), port));
    }

    pub fn begin_calls(&self) -> u32 {
        lock(&self.state).begin_calls
    }

    pub fn join_calls(&self) -> u32 {
        lock(&self.state).join_calls
    }

    pub fn receive_calls(&self) -> u32 {
        lock(&self.state).receive_calls
    }

    /// App EUI passed to the last successful join
    pub fn joined_app_eui(&self) -> Option<String> {
        lock(&self.state).joined_app_eui.clone()
    }

    /// Every `send_frame` call so far, in call order
    pub fn uplinks(&self) -> Vec<RecordedUplink> {
        lock(&self.state).uplinks.clone()
    }

    /// Payloads of the uplinks that went on air, in call order
    pub fn delivered_payloads(&self) -> Vec<Vec<u8>> {
        lock(&self.state)
            .uplinks
            .iter()
            .filter(|uplink| uplink.outcome == SendOutcome::Success)
            .map(|uplink| uplink.payload.clone())
            .collect()
    }

    pub fn pending_downlinks(&self) -> usize {
        lock(&self.state).downlinks.len()
    }
}

impl RadioTransport for SimulatedTransport {
    async fn begin(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.begin_calls += 1;
        state.begin_results.pop_front().unwrap_or(true)
    }

    async fn join(&mut self, credentials: &JoinCredentials) -> bool {
        let mut state = lock(&self.state);
        state.join_calls += 1;
        let accepted = state.join_results.pop_front().unwrap_or(true);
        if accepted {
            state.joined_app_eui = Some(credentials.app_eui.to_string());
        }
        accepted
    }

    async fn send_frame(&mut self, payload: &[u8], port: u8) -> SendOutcome {
        let mut state = lock(&self.state);
        let outcome = state.send_outcomes.pop_front().unwrap_or(SendOutcome::Success);
        log!(Level::Trace, "Simulated uplink on port {}: {} -> {:?}", port, PayloadHex(payload), outcome);
        state.uplinks.push(RecordedUplink {
            payload: payload.to_vec(),
            port,
            outcome,
        });
        outcome
    }

    async fn receive_frame(&mut self, buffer: &mut [u8]) -> Option<FrameInfo> {
        let mut state = lock(&self.state);
        state.receive_calls += 1;
        let (payload, port) = state.downlinks.pop_front()?;
        let length = payload.len().min(buffer.len());
        buffer[..length].copy_from_slice(&payload[..length]);
        Some(FrameInfo { length, port })
    }
}
