//! ISO 15765-2 transport layer.
//!
//! - [`pdu`]: frame codec for Single, First, Consecutive and Flow Control frames
//! - [`segmenter`]: splits outbound payloads and follows the peer's Flow Control
//! - [`reassembler`]: rebuilds inbound payloads and paces the peer
//! - [`isotp`]: the session tying both to one tx/rx address pair on a link

pub mod isotp;
pub mod pdu;
pub mod reassembler;
pub mod segmenter;

use crate::error::Result;

/// Transport layer trait that must be implemented by ISO-TP
pub trait TransportLayer: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn send(&mut self, data: &[u8]) -> Result<()>;
    fn receive(&mut self) -> Result<Vec<u8>>;
    fn set_timeout(&mut self, timeout_ms: u32) -> Result<()>;
}
