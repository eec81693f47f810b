//! Link layer seen from the transport.
//!
//! The transport only needs a way to put one frame on the bus and to take one
//! frame off it. Everything below that is the job of the link driver:
//! - Bit timing, bitrate and channel selection
//! - Arbitration and error frames
//! - Bus-off recovery
//! - Serialising frames from several sessions sharing one bus
//!
//! # Examples
//!
//! ```rust
//! use libisotp::physical::{loopback::LoopbackLink, PhysicalLayer};
//! use libisotp::types::{Frame, FrameFlags};
//! use std::time::Duration;
//!
//! let (mut a, mut b) = LoopbackLink::pair();
//! a.open().unwrap();
//! b.open().unwrap();
//!
//! a.send_frame(&Frame::new(0x7E0, vec![0x01, 0x3E], FrameFlags::empty())).unwrap();
//! let frame = b.receive_frame(Duration::from_millis(10)).unwrap();
//! assert_eq!(frame.data, vec![0x01, 0x3E]);
//! ```

pub mod loopback;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use crate::error::LinkResult;
use crate::types::{Frame, CAN_MAX_DLEN};
use std::time::Duration;

/// Frame-level primitive the transport layer runs on.
pub trait PhysicalLayer: Send {
    fn open(&mut self) -> LinkResult<()>;
    fn close(&mut self) -> LinkResult<()>;

    /// Hands one frame to the link. Returns once the link has accepted it.
    fn send_frame(&mut self, frame: &Frame) -> LinkResult<()>;

    /// Waits up to `timeout` for the next frame.
    ///
    /// Returns [`LinkError::Timeout`](crate::error::LinkError::Timeout) when
    /// nothing arrived in time.
    fn receive_frame(&mut self, timeout: Duration) -> LinkResult<Frame>;

    /// Maximum number of data bytes per frame.
    fn capacity(&self) -> usize {
        CAN_MAX_DLEN
    }
}
