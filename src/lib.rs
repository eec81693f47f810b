//! ISO 15765-2 (ISO-TP) over frame-oriented links.
//!
//! ```rust
//! use libisotp::isotp::{IsoTp, IsoTpConfig};
//! use libisotp::physical::loopback::LoopbackLink;
//! use libisotp::transport::TransportLayer;
//! use std::thread;
//!
//! let (tester_link, ecu_link) = LoopbackLink::pair();
//!
//! let ecu = thread::spawn(move || {
//!     let config = IsoTpConfig { tx_id: 0x7E8, rx_id: 0x7E0, ..Default::default() };
//!     let mut ecu = IsoTp::with_physical(config, ecu_link);
//!     ecu.open().unwrap();
//!     ecu.receive().unwrap()
//! });
//!
//! let mut tester = IsoTp::with_physical(IsoTpConfig::default(), tester_link);
//! tester.open().unwrap();
//! tester.send(&[0x32, 0x11, 0xAA, 0x33, 0x44, 0x88, 0x44, 0x88]).unwrap();
//!
//! assert_eq!(ecu.join().unwrap(), vec![0x32, 0x11, 0xAA, 0x33, 0x44, 0x88, 0x44, 0x88]);
//! ```

// OSI Layer modules
pub mod physical; // Link primitives, loopback and mock links
pub mod transport; // ISO-TP implementation

// Re-exports for convenience
pub use transport::isotp;

// Common types and traits
pub mod error;
pub mod types;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
