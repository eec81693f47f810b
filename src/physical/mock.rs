use super::PhysicalLayer;
use crate::error::{LinkError, LinkResult};
use crate::types::{Frame, CAN_MAX_DLEN};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock frame handler: called for every sent frame, returns the frames the
/// simulated peer answers with.
pub type MockFrameHandler = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

/// Shared record of every frame the mock accepted.
pub type SentFrames = Arc<Mutex<Vec<Frame>>>;

/// Mock physical layer for testing
pub struct MockPhysical {
    frame_handler: Option<MockFrameHandler>,
    rx_queue: VecDeque<Frame>,
    sent: SentFrames,
    fail_sends: bool,
    is_open: bool,
}

impl MockPhysical {
    /// Creates a new mock physical layer with a custom frame handler
    pub fn new(frame_handler: Option<MockFrameHandler>) -> Self {
        Self {
            frame_handler,
            rx_queue: VecDeque::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_sends: false,
            is_open: false,
        }
    }

    /// Creates a mock whose peer never answers
    pub fn new_silent() -> Self {
        Self::new(None)
    }

    /// Creates a new mock physical layer that simulates errors
    pub fn new_error() -> Self {
        let mut mock = Self::new(None);
        mock.fail_sends = true;
        mock
    }

    /// Sets a new frame handler
    pub fn set_frame_handler(&mut self, handler: Option<MockFrameHandler>) {
        self.frame_handler = handler;
    }

    /// Queues a frame for the next `receive_frame` call.
    pub fn inject(&mut self, frame: Frame) {
        self.rx_queue.push_back(frame);
    }

    /// Handle to the log of sent frames, usable after the mock is moved.
    pub fn sent_frames(&self) -> SentFrames {
        Arc::clone(&self.sent)
    }
}

impl PhysicalLayer for MockPhysical {
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
        if self.fail_sends {
            return Err(LinkError::Io("simulated bus failure".into()));
        }
        if frame.data.len() > CAN_MAX_DLEN {
            return Err(LinkError::FrameTooLarge {
                len: frame.data.len(),
                capacity: CAN_MAX_DLEN,
            });
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(frame.clone());
        }
        if let Some(handler) = self.frame_handler.as_mut() {
            self.rx_queue.extend(handler(frame));
        }
        Ok(())
    }

    fn receive_frame(&mut self, timeout: Duration) -> LinkResult<Frame> {
        if !self.is_open {
            return Err(LinkError::NotOpen);
        }

        match self.rx_queue.pop_front() {
            Some(frame) => Ok(frame),
            None => {
                std::thread::sleep(timeout);
                Err(LinkError::Timeout)
            }
        }
    }
}
