//! ISO-TP frame codec.
//!
//! Every ISO-TP frame starts with a Protocol Control Information (PCI) byte
//! whose high nibble selects the frame type:
//!
//! | type | PCI bytes | payload |
//! |------|-----------|---------|
//! | Single      | `0x0L`                | L bytes |
//! | First       | `0x1H LL` (12 bit length) | `capacity - 2` bytes |
//! | Consecutive | `0x2S` (sequence)     | up to `capacity - 1` bytes |
//! | FlowControl | `0x3F BS ST`          | none |

use crate::error::{IsoTpError, Result};
use std::time::Duration;

const SF_PCI: u8 = 0x00; // Single Frame
const FF_PCI: u8 = 0x10; // First Frame
const CF_PCI: u8 = 0x20; // Consecutive Frame
const FC_PCI: u8 = 0x30; // Flow Control

/// Largest payload a 12-bit First Frame length can announce.
pub const MAX_TRANSFER_LEN: usize = 0x0FFF;

/// Flow status carried in the low nibble of a Flow Control PCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend = 0x0,
    Wait = 0x1,
    Overflow = 0x2,
}

impl FlowStatus {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(FlowStatus::ContinueToSend),
            0x1 => Some(FlowStatus::Wait),
            0x2 => Some(FlowStatus::Overflow),
            _ => None,
        }
    }
}

/// STmin as transmitted on the wire.
///
/// `0x00..=0x7F` are milliseconds, `0xF1..=0xF9` are 100..=900 µs. Reserved
/// values are read as the longest legal separation, 127 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparationTime(u8);

impl SeparationTime {
    pub const ZERO: SeparationTime = SeparationTime(0);

    pub const fn from_raw(raw: u8) -> Self {
        SeparationTime(raw)
    }

    /// Milliseconds above 127 are clamped.
    pub fn from_millis(ms: u8) -> Self {
        SeparationTime(ms.min(0x7F))
    }

    /// Picks the closest encodable value not shorter than `duration`.
    pub fn from_duration(duration: Duration) -> Self {
        let micros = duration.as_micros();
        if micros == 0 {
            SeparationTime::ZERO
        } else if micros <= 900 {
            let hundreds = micros.div_ceil(100) as u8;
            SeparationTime(0xF0 + hundreds)
        } else {
            let ms = micros.div_ceil(1000).min(0x7F) as u8;
            SeparationTime(ms)
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub fn duration(self) -> Duration {
        match self.0 {
            ms @ 0x00..=0x7F => Duration::from_millis(ms as u64),
            us @ 0xF1..=0xF9 => Duration::from_micros((us - 0xF0) as u64 * 100),
            _ => Duration::from_millis(0x7F),
        }
    }
}

/// Flow Control parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub status: FlowStatus,
    /// Consecutive Frames allowed before the next Flow Control, 0 = unlimited
    pub block_size: u8,
    pub separation_time: SeparationTime,
}

impl FlowControl {
    pub fn continue_to_send(block_size: u8, separation_time: SeparationTime) -> Self {
        Self {
            status: FlowStatus::ContinueToSend,
            block_size,
            separation_time,
        }
    }

    pub fn wait() -> Self {
        Self {
            status: FlowStatus::Wait,
            block_size: 0,
            separation_time: SeparationTime::ZERO,
        }
    }

    pub fn overflow() -> Self {
        Self {
            status: FlowStatus::Overflow,
            block_size: 0,
            separation_time: SeparationTime::ZERO,
        }
    }
}

/// One decoded ISO-TP frame, borrowing its payload from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu<'a> {
    Single { data: &'a [u8] },
    First { length: usize, data: &'a [u8] },
    Consecutive { sequence: u8, data: &'a [u8] },
    FlowControl(FlowControl),
}

impl<'a> Pdu<'a> {
    /// Decodes the bytes following any addressing byte.
    ///
    /// Trailing bytes beyond a Single Frame's declared length are padding and
    /// are ignored. Consecutive Frames keep trailing bytes; the receiver caps
    /// them against the announced length.
    pub fn decode(bytes: &'a [u8]) -> Result<Self> {
        let pci = *bytes
            .first()
            .ok_or_else(|| IsoTpError::MalformedFrame("empty frame".into()))?;

        match pci & 0xF0 {
            SF_PCI => {
                let length = (pci & 0x0F) as usize;
                if length > bytes.len() - 1 {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "single frame declares {} bytes but carries {}",
                        length,
                        bytes.len() - 1
                    )));
                }
                Ok(Pdu::Single {
                    data: &bytes[1..=length],
                })
            }
            FF_PCI => {
                if bytes.len() < 2 {
                    return Err(IsoTpError::MalformedFrame(
                        "first frame without length byte".into(),
                    ));
                }
                let length = ((pci as usize & 0x0F) << 8) | bytes[1] as usize;
                let data = &bytes[2..];
                if length <= data.len() {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "first frame declares {} bytes but already carries {}",
                        length,
                        data.len()
                    )));
                }
                Ok(Pdu::First { length, data })
            }
            CF_PCI => Ok(Pdu::Consecutive {
                sequence: pci & 0x0F,
                data: &bytes[1..],
            }),
            FC_PCI => {
                if bytes.len() < 3 {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "flow control needs 3 bytes, got {}",
                        bytes.len()
                    )));
                }
                let status = FlowStatus::from_nibble(pci & 0x0F).ok_or_else(|| {
                    IsoTpError::MalformedFrame(format!("unknown flow status 0x{:X}", pci & 0x0F))
                })?;
                Ok(Pdu::FlowControl(FlowControl {
                    status,
                    block_size: bytes[1],
                    separation_time: SeparationTime::from_raw(bytes[2]),
                }))
            }
            _ => Err(IsoTpError::UnsupportedFrameType(pci >> 4)),
        }
    }

    /// Encodes into at most `capacity` bytes (PCI included, no padding).
    pub fn encode(&self, capacity: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(capacity);
        match *self {
            Pdu::Single { data } => {
                if data.len() > capacity.saturating_sub(1) || data.len() > 0x0F {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "{} bytes do not fit a single frame of capacity {}",
                        data.len(),
                        capacity
                    )));
                }
                out.push(SF_PCI | data.len() as u8);
                out.extend_from_slice(data);
            }
            Pdu::First { length, data } => {
                if length > MAX_TRANSFER_LEN {
                    return Err(IsoTpError::PayloadTooLarge(length));
                }
                if data.len() > capacity.saturating_sub(2) || length <= data.len() {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "first frame chunk of {} bytes invalid for length {} and capacity {}",
                        data.len(),
                        length,
                        capacity
                    )));
                }
                out.push(FF_PCI | ((length >> 8) as u8 & 0x0F));
                out.push(length as u8);
                out.extend_from_slice(data);
            }
            Pdu::Consecutive { sequence, data } => {
                if data.len() > capacity.saturating_sub(1) {
                    return Err(IsoTpError::MalformedFrame(format!(
                        "{} bytes do not fit a consecutive frame of capacity {}",
                        data.len(),
                        capacity
                    )));
                }
                out.push(CF_PCI | (sequence & 0x0F));
                out.extend_from_slice(data);
            }
            Pdu::FlowControl(fc) => {
                out.push(FC_PCI | fc.status as u8);
                out.push(fc.block_size);
                out.push(fc.separation_time.raw());
            }
        }
        Ok(out)
    }

    /// Short frame type name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Pdu::Single { .. } => "SF",
            Pdu::First { .. } => "FF",
            Pdu::Consecutive { .. } => "CF",
            Pdu::FlowControl(_) => "FC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_first_and_consecutive_frames() {
        let payload = [0x32, 0x11, 0xAA, 0x33, 0x44, 0x88, 0x44, 0x88];

        let ff = Pdu::First {
            length: payload.len(),
            data: &payload[..6],
        };
        assert_eq!(
            ff.encode(8).unwrap(),
            vec![0x10, 0x08, 0x32, 0x11, 0xAA, 0x33, 0x44, 0x88]
        );

        let cf = Pdu::Consecutive {
            sequence: 1,
            data: &payload[6..],
        };
        assert_eq!(cf.encode(8).unwrap(), vec![0x21, 0x44, 0x88]);
    }

    #[test]
    fn decodes_every_frame_type() {
        assert_eq!(
            Pdu::decode(&[0x03, 0x22, 0xF1, 0x90, 0xAA, 0xAA]).unwrap(),
            Pdu::Single {
                data: &[0x22, 0xF1, 0x90]
            }
        );
        assert_eq!(
            Pdu::decode(&[0x1F, 0xFF, 1, 2, 3, 4, 5, 6]).unwrap(),
            Pdu::First {
                length: 4095,
                data: &[1, 2, 3, 4, 5, 6]
            }
        );
        assert_eq!(
            Pdu::decode(&[0x2F, 9]).unwrap(),
            Pdu::Consecutive {
                sequence: 15,
                data: &[9]
            }
        );
        assert_eq!(
            Pdu::decode(&[0x31, 0x04, 0xF5]).unwrap(),
            Pdu::FlowControl(FlowControl {
                status: FlowStatus::Wait,
                block_size: 4,
                separation_time: SeparationTime::from_raw(0xF5),
            })
        );
    }

    #[test]
    fn rejects_structurally_invalid_frames() {
        assert!(matches!(
            Pdu::decode(&[]),
            Err(IsoTpError::MalformedFrame(_))
        ));
        // Declares 5 bytes, carries 2
        assert!(matches!(
            Pdu::decode(&[0x05, 1, 2]),
            Err(IsoTpError::MalformedFrame(_))
        ));
        // Length fits in the first frame itself
        assert!(matches!(
            Pdu::decode(&[0x10, 0x03, 1, 2, 3, 4, 5, 6]),
            Err(IsoTpError::MalformedFrame(_))
        ));
        assert!(matches!(
            Pdu::decode(&[0x33, 0, 0]),
            Err(IsoTpError::MalformedFrame(_))
        ));
        assert!(matches!(
            Pdu::decode(&[0x30, 0]),
            Err(IsoTpError::MalformedFrame(_))
        ));
        assert_eq!(
            Pdu::decode(&[0x7F, 0x22, 0x31]),
            Err(IsoTpError::UnsupportedFrameType(0x7))
        );
    }

    #[test]
    fn single_frame_must_fit_capacity() {
        let data = [0u8; 8];
        assert!(Pdu::Single { data: &data[..7] }.encode(8).is_ok());
        assert!(Pdu::Single { data: &data }.encode(8).is_err());
        assert_eq!(Pdu::Single { data: &[] }.encode(8).unwrap(), vec![0x00]);
    }

    #[test]
    fn separation_time_encoding() {
        assert_eq!(
            SeparationTime::from_raw(0x7F).duration(),
            Duration::from_millis(127)
        );
        assert_eq!(
            SeparationTime::from_raw(0xF1).duration(),
            Duration::from_micros(100)
        );
        assert_eq!(
            SeparationTime::from_raw(0xF9).duration(),
            Duration::from_micros(900)
        );
        // Reserved
        assert_eq!(
            SeparationTime::from_raw(0x80).duration(),
            Duration::from_millis(127)
        );
        assert_eq!(
            SeparationTime::from_raw(0xFA).duration(),
            Duration::from_millis(127)
        );

        assert_eq!(SeparationTime::from_millis(200).raw(), 0x7F);
        assert_eq!(
            SeparationTime::from_duration(Duration::from_micros(250)).raw(),
            0xF3
        );
        assert_eq!(
            SeparationTime::from_duration(Duration::from_micros(1500)).raw(),
            2
        );
        assert_eq!(SeparationTime::from_duration(Duration::ZERO).raw(), 0);
    }
}
