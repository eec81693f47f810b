//! Receiving side of ISO-TP.
//!
//! ```text
//!            SF: deliver
//!           +--------+
//!           v        |
//!         Idle ------+
//!           |  ^
//!        FF |  | last CF: deliver
//!           v  | error / N_Cr expired: discard
//!   AwaitingConsecutive --+
//!           ^             | CF in sequence
//!           +-------------+
//! ```

use super::pdu::{FlowControl, Pdu, SeparationTime};
use crate::error::{IsoTpError, Result};
use log::{debug, trace};
use std::time::{Duration, Instant};

/// Receive-side settings, advertised to the sender in our Flow Control.
#[derive(Debug, Clone)]
pub struct RxParams {
    pub block_size: u8,
    pub separation_time: SeparationTime,
    pub max_len: usize,
    pub n_cr: Duration,
    pub flow_control: bool,
}

/// What the session has to do after feeding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxAction {
    /// Send this Flow Control frame back to the sender.
    FlowControl(FlowControl),
    /// A payload is complete.
    Complete(Vec<u8>),
}

#[derive(Debug)]
struct Transfer {
    length: usize,
    buffer: Vec<u8>,
    next_sequence: u8,
    block_received: u8,
    deadline: Instant,
}

#[derive(Debug)]
enum RxState {
    Idle,
    AwaitingConsecutive(Transfer),
}

/// Rebuilds payloads from the frames of one rx address.
#[derive(Debug)]
pub struct Reassembler {
    params: RxParams,
    state: RxState,
}

impl Reassembler {
    pub fn new(params: RxParams) -> Self {
        Self {
            params,
            state: RxState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, RxState::Idle)
    }

    /// When the in-progress transfer expires, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            RxState::Idle => None,
            RxState::AwaitingConsecutive(transfer) => Some(transfer.deadline),
        }
    }

    /// Discards any partial payload.
    pub fn reset(&mut self) {
        if let RxState::AwaitingConsecutive(transfer) = &self.state {
            debug!(
                "discarding partial transfer ({}/{} bytes)",
                transfer.buffer.len(),
                transfer.length
            );
        }
        self.state = RxState::Idle;
    }

    /// Fails with [`IsoTpError::ReassemblyTimeout`] once N_Cr has expired.
    pub fn check_timeout(&mut self, now: Instant) -> Result<()> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.reset();
                Err(IsoTpError::ReassemblyTimeout)
            }
            _ => Ok(()),
        }
    }

    /// Maps a frame that failed to decode onto the receive state.
    ///
    /// While a transfer is in progress the frame is a protocol violation and
    /// the transfer is dropped; otherwise the decode error is returned as is.
    pub fn on_malformed(&mut self, error: IsoTpError) -> IsoTpError {
        if self.is_idle() {
            return error;
        }
        self.reset();
        IsoTpError::ProtocolViolation(format!("bad frame during reassembly: {}", error))
    }

    /// Advances the receive state by one frame.
    ///
    /// Once N_Cr has expired the partial transfer is dropped. A Consecutive
    /// Frame belonged to it and fails with [`IsoTpError::ReassemblyTimeout`];
    /// any other frame is handled from Idle. Callers wanting the timeout for
    /// those frames call [`check_timeout`](Self::check_timeout) first.
    pub fn on_pdu(&mut self, pdu: Pdu<'_>, now: Instant) -> Result<Option<RxAction>> {
        if matches!(pdu, Pdu::Consecutive { .. }) {
            self.check_timeout(now)?;
        } else if self.check_timeout(now).is_err() {
            debug!("transfer expired before {} frame", pdu.kind());
        }

        // Leaving the state Idle discards the transfer on every error path.
        match std::mem::replace(&mut self.state, RxState::Idle) {
            RxState::Idle => self.on_idle(pdu, now),
            RxState::AwaitingConsecutive(transfer) => self.on_consecutive(transfer, pdu, now),
        }
    }

    fn on_idle(&mut self, pdu: Pdu<'_>, now: Instant) -> Result<Option<RxAction>> {
        match pdu {
            Pdu::Single { data } => Ok(Some(RxAction::Complete(data.to_vec()))),
            Pdu::First { length, data } => {
                if length > self.params.max_len {
                    return Err(IsoTpError::RxBufferOverflow {
                        declared: length,
                        limit: self.params.max_len,
                    });
                }

                let mut buffer = Vec::with_capacity(length);
                buffer.extend_from_slice(&data[..data.len().min(length)]);
                debug!("first frame: expecting {} bytes", length);
                self.state = RxState::AwaitingConsecutive(Transfer {
                    length,
                    buffer,
                    next_sequence: 1,
                    block_received: 0,
                    deadline: now + self.params.n_cr,
                });
                Ok(self.flow_control())
            }
            Pdu::Consecutive { sequence, .. } => {
                debug!("ignoring consecutive frame {} while idle", sequence);
                Ok(None)
            }
            Pdu::FlowControl(fc) => {
                trace!("ignoring flow control {:?} while idle", fc);
                Ok(None)
            }
        }
    }

    fn on_consecutive(
        &mut self,
        mut transfer: Transfer,
        pdu: Pdu<'_>,
        now: Instant,
    ) -> Result<Option<RxAction>> {
        let (sequence, data) = match pdu {
            Pdu::Consecutive { sequence, data } => (sequence, data),
            other => {
                return Err(IsoTpError::ProtocolViolation(format!(
                    "{} frame while awaiting consecutive frame {}",
                    other.kind(),
                    transfer.next_sequence
                )))
            }
        };

        if sequence != transfer.next_sequence {
            return Err(IsoTpError::SequenceError {
                expected: transfer.next_sequence,
                received: sequence,
            });
        }

        let take = data.len().min(transfer.length - transfer.buffer.len());
        transfer.buffer.extend_from_slice(&data[..take]);
        transfer.next_sequence = (transfer.next_sequence + 1) & 0x0F;

        if transfer.buffer.len() >= transfer.length {
            debug!("transfer of {} bytes complete", transfer.length);
            return Ok(Some(RxAction::Complete(transfer.buffer)));
        }

        transfer.deadline = now + self.params.n_cr;
        let mut action = None;
        if self.params.block_size > 0 {
            transfer.block_received += 1;
            if transfer.block_received == self.params.block_size {
                transfer.block_received = 0;
                action = self.flow_control();
            }
        }
        self.state = RxState::AwaitingConsecutive(transfer);
        Ok(action)
    }

    fn flow_control(&self) -> Option<RxAction> {
        self.params.flow_control.then(|| {
            RxAction::FlowControl(FlowControl::continue_to_send(
                self.params.block_size,
                self.params.separation_time,
            ))
        })
    }
}
