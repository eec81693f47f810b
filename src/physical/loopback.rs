use super::PhysicalLayer;
use crate::error::{LinkError, LinkResult};
use crate::types::{Frame, CAN_MAX_DLEN};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// One end of an in-process point-to-point link.
///
/// Frames sent on one end of a [`LoopbackLink::pair`] arrive on the other,
/// in order. Both ends can be moved to different threads.
pub struct LoopbackLink {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    is_open: bool,
}

impl LoopbackLink {
    /// Creates two connected ends with classic CAN capacity.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(CAN_MAX_DLEN)
    }

    /// Creates two connected ends carrying at most `capacity` bytes per frame.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        let a = Self {
            tx: a_tx,
            rx: a_rx,
            capacity,
            is_open: false,
        };
        let b = Self {
            tx: b_tx,
            rx: b_rx,
            capacity,
            is_open: false,
        };
        (a, b)
    }
}

impl PhysicalLayer for LoopbackLink {
    fn open(&mut self) -> LinkResult<()> {
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) -> LinkResult<()> {
        self.is_open = false;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> LinkResult<()> {
        if !self.is_open {
            return Err(LinkError::NotOpen);
        }
        if frame.data.len() > self.capacity {
            return Err(LinkError::FrameTooLarge {
                len: frame.data.len(),
                capacity: self.capacity,
            });
        }
        self.tx
            .send(frame.clone())
            .map_err(|_| LinkError::Disconnected)
    }

    fn receive_frame(&mut self, timeout: Duration) -> LinkResult<Frame> {
        if !self.is_open {
            return Err(LinkError::NotOpen);
        }
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => LinkError::Timeout,
            RecvTimeoutError::Disconnected => LinkError::Disconnected,
        })
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
