use bitflags::bitflags;
use std::fmt;

/// CAN ID type
pub type CanId = u32;

/// Generic frame data type
pub type FrameData = Vec<u8>;

/// Data bytes carried by a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;

/// Highest 11-bit identifier
pub const CAN_SFF_MASK: CanId = 0x7FF;

/// Highest 29-bit identifier
pub const CAN_EFF_MASK: CanId = 0x1FFF_FFFF;

bitflags! {
    /// Link-level frame attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        const EXTENDED_ID = 1 << 0; // 29-bit identifier
    }
}

/// A single link frame: an identifier plus up to `capacity` data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: CanId,
    pub data: FrameData,
    pub flags: FrameFlags,
}

impl Frame {
    pub fn new(id: CanId, data: FrameData, flags: FrameFlags) -> Self {
        Self { id, data, flags }
    }

    pub fn is_extended(&self) -> bool {
        self.flags.contains(FrameFlags::EXTENDED_ID)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            id: 0,
            data: Vec::new(),
            flags: FrameFlags::empty(),
        }
    }
}

/// candump style: `18DA0FFE   [8]  10 08 32 11 AA 33 44 88`
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended() {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:>8X}", self.id)?;
        }
        write!(f, "   [{}] ", self.data.len())?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Configuration trait that must be implemented by all protocol configurations
pub trait Config: Send + Sync {
    fn validate(&self) -> crate::error::Result<()>;
}
