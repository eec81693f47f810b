//! Sending side of ISO-TP.
//!
//! [`Segmenter`] decides which frame goes out next. It does no I/O and keeps
//! no clock; the session drives it, sleeps for the separation time it reports
//! and feeds it the Flow Control frames it receives.

use super::pdu::{FlowControl, FlowStatus, Pdu, SeparationTime, MAX_TRANSFER_LEN};
use crate::error::{IsoTpError, Result};
use log::debug;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Start,
    AwaitingFlowControl,
    Sending,
    Done,
}

/// Splits one payload into ISO-TP frames.
#[derive(Debug)]
pub struct Segmenter<'a> {
    payload: &'a [u8],
    capacity: usize,
    offset: usize,
    sequence: u8,
    block_size: u8,
    block_remaining: u8,
    separation_time: Duration,
    wait_frames: u16,
    max_wait_frames: Option<u16>,
    state: TxState,
}

impl<'a> Segmenter<'a> {
    /// `capacity` is the number of bytes available for PCI plus data in one
    /// frame, after any addressing byte.
    pub fn new(payload: &'a [u8], capacity: usize) -> Result<Self> {
        if payload.len() > MAX_TRANSFER_LEN {
            return Err(IsoTpError::PayloadTooLarge(payload.len()));
        }
        if capacity < 3 {
            return Err(IsoTpError::InvalidConfig(format!(
                "frame capacity {} too small for segmentation",
                capacity
            )));
        }
        Ok(Self {
            payload,
            capacity,
            offset: 0,
            sequence: 1,
            block_size: 0,
            block_remaining: 0,
            separation_time: Duration::ZERO,
            wait_frames: 0,
            max_wait_frames: None,
            state: TxState::Start,
        })
    }

    /// Abort with [`IsoTpError::FlowControlTimeout`] after more than `limit`
    /// consecutive `Wait` frames (N_WFTmax).
    pub fn with_max_wait_frames(mut self, limit: u16) -> Self {
        self.max_wait_frames = Some(limit);
        self
    }

    pub fn is_single_frame(&self) -> bool {
        self.payload.len() <= (self.capacity - 1).min(0x0F)
    }

    /// The Single or First Frame opening the transfer.
    pub fn start(&mut self) -> Pdu<'a> {
        debug_assert_eq!(self.state, TxState::Start);
        if self.is_single_frame() {
            self.state = TxState::Done;
            return Pdu::Single {
                data: self.payload,
            };
        }

        self.offset = self.capacity - 2;
        self.sequence = 1;
        self.state = TxState::AwaitingFlowControl;
        Pdu::First {
            length: self.payload.len(),
            data: &self.payload[..self.offset],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == TxState::Done
    }

    pub fn awaiting_flow_control(&self) -> bool {
        self.state == TxState::AwaitingFlowControl
    }

    /// Minimum delay between two Consecutive Frames.
    pub fn separation_time(&self) -> Duration {
        self.separation_time
    }

    /// Applies a Flow Control frame received from the peer.
    ///
    /// Flow Control arriving while none is expected is ignored.
    pub fn on_flow_control(&mut self, fc: FlowControl) -> Result<()> {
        if self.state != TxState::AwaitingFlowControl {
            debug!("ignoring unexpected flow control {:?}", fc);
            return Ok(());
        }

        match fc.status {
            FlowStatus::ContinueToSend => {
                self.block_size = fc.block_size;
                self.block_remaining = fc.block_size;
                self.separation_time = fc.separation_time.duration();
                self.wait_frames = 0;
                self.state = TxState::Sending;
                Ok(())
            }
            FlowStatus::Wait => {
                self.wait_frames = self.wait_frames.saturating_add(1);
                match self.max_wait_frames {
                    Some(limit) if self.wait_frames > limit => {
                        self.state = TxState::Done;
                        Err(IsoTpError::FlowControlTimeout)
                    }
                    _ => Ok(()),
                }
            }
            FlowStatus::Overflow => {
                self.state = TxState::Done;
                Err(IsoTpError::PeerOverflow)
            }
        }
    }

    /// Streams the rest of the payload without waiting for the peer.
    pub fn skip_flow_control(&mut self, separation_time: SeparationTime) {
        if self.state == TxState::AwaitingFlowControl {
            self.on_flow_control(FlowControl::continue_to_send(0, separation_time))
                .ok();
        }
    }

    /// Next Consecutive Frame, or `None` while waiting for Flow Control or
    /// once the payload is exhausted.
    pub fn next_consecutive(&mut self) -> Option<Pdu<'a>> {
        if self.state != TxState::Sending {
            return None;
        }

        let end = (self.offset + self.capacity - 1).min(self.payload.len());
        let pdu = Pdu::Consecutive {
            sequence: self.sequence,
            data: &self.payload[self.offset..end],
        };
        self.offset = end;
        self.sequence = (self.sequence + 1) & 0x0F;

        if self.offset >= self.payload.len() {
            self.state = TxState::Done;
        } else if self.block_size > 0 {
            self.block_remaining -= 1;
            if self.block_remaining == 0 {
                self.state = TxState::AwaitingFlowControl;
            }
        }
        Some(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cts(block_size: u8) -> FlowControl {
        FlowControl::continue_to_send(block_size, SeparationTime::ZERO)
    }

    #[test]
    fn single_and_first_frame_boundary() {
        let payload = [0xAB; 8];

        let mut tx = Segmenter::new(&payload[..7], 8).unwrap();
        assert!(matches!(tx.start(), Pdu::Single { data } if data.len() == 7));
        assert!(tx.is_complete());

        let mut tx = Segmenter::new(&payload, 8).unwrap();
        assert_eq!(
            tx.start(),
            Pdu::First {
                length: 8,
                data: &payload[..6]
            }
        );
        assert!(tx.awaiting_flow_control());
        tx.on_flow_control(cts(0)).unwrap();
        assert!(matches!(
            tx.next_consecutive(),
            Some(Pdu::Consecutive { sequence: 1, data }) if data.len() == 2
        ));
        assert!(tx.is_complete());
    }

    #[test]
    fn nothing_is_sent_before_continue_to_send() {
        let payload = [0u8; 30];
        let mut tx = Segmenter::new(&payload, 8).unwrap();
        tx.start();
        assert_eq!(tx.next_consecutive(), None);

        tx.on_flow_control(FlowControl::wait()).unwrap();
        assert_eq!(tx.next_consecutive(), None);

        tx.on_flow_control(cts(0)).unwrap();
        assert!(tx.next_consecutive().is_some());
    }

    #[test]
    fn sequence_numbers_wrap_after_fifteen() {
        // 6 bytes in the first frame + 20 consecutive frames of 7 bytes
        let payload: Vec<u8> = (0..6 + 20 * 7).map(|i| i as u8).collect();
        let mut tx = Segmenter::new(&payload, 8).unwrap();
        tx.start();
        tx.on_flow_control(cts(0)).unwrap();

        let mut sequences = Vec::new();
        while let Some(Pdu::Consecutive { sequence, .. }) = tx.next_consecutive() {
            sequences.push(sequence);
        }
        assert_eq!(
            sequences,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 0, 1, 2, 3, 4]
        );
        assert!(tx.is_complete());
    }

    #[test]
    fn pauses_after_each_block() {
        let payload = [0x55; 6 + 5 * 7];
        let mut tx = Segmenter::new(&payload, 8).unwrap();
        tx.start();

        tx.on_flow_control(cts(2)).unwrap();
        assert!(tx.next_consecutive().is_some());
        assert!(tx.next_consecutive().is_some());
        assert!(tx.awaiting_flow_control());
        assert_eq!(tx.next_consecutive(), None);

        tx.on_flow_control(cts(2)).unwrap();
        assert!(tx.next_consecutive().is_some());
        assert!(tx.next_consecutive().is_some());
        assert!(tx.awaiting_flow_control());

        tx.on_flow_control(cts(2)).unwrap();
        assert!(tx.next_consecutive().is_some());
        assert!(tx.is_complete());
    }

    #[test]
    fn overflow_and_wait_limit_abort() {
        let payload = [0u8; 20];
        let mut tx = Segmenter::new(&payload, 8).unwrap();
        tx.start();
        assert_eq!(
            tx.on_flow_control(FlowControl::overflow()),
            Err(IsoTpError::PeerOverflow)
        );

        let mut tx = Segmenter::new(&payload, 8)
            .unwrap()
            .with_max_wait_frames(2);
        tx.start();
        tx.on_flow_control(FlowControl::wait()).unwrap();
        tx.on_flow_control(FlowControl::wait()).unwrap();
        assert_eq!(
            tx.on_flow_control(FlowControl::wait()),
            Err(IsoTpError::FlowControlTimeout)
        );
    }

    #[test]
    fn separation_time_comes_from_flow_control() {
        let payload = [0u8; 20];
        let mut tx = Segmenter::new(&payload, 8).unwrap();
        tx.start();
        tx.on_flow_control(FlowControl::continue_to_send(
            0,
            SeparationTime::from_raw(0xF3),
        ))
        .unwrap();
        assert_eq!(tx.separation_time(), Duration::from_micros(300));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let payload = vec![0u8; MAX_TRANSFER_LEN + 1];
        assert_eq!(
            Segmenter::new(&payload, 8).unwrap_err(),
            IsoTpError::PayloadTooLarge(4096)
        );
    }
}
