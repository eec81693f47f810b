use thiserror::Error;

/// Errors raised by the link a session runs on.
///
/// The transport layer never tries to recover from these; they are passed
/// through unchanged inside [`IsoTpError::Link`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link is not open")]
    NotOpen,

    #[error("no frame received before the timeout")]
    Timeout,

    #[error("link peer disconnected")]
    Disconnected,

    #[error("frame of {len} bytes exceeds link capacity of {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },

    #[error("link I/O error: {0}")]
    Io(String),
}

/// ISO-TP transport errors.
///
/// Every protocol error aborts only the transfer in progress and leaves the
/// affected state machine idle. Retrying is up to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsoTpError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unsupported frame type 0x{0:X}")]
    UnsupportedFrameType(u8),

    #[error("sequence error: expected {expected}, received {received}")]
    SequenceError { expected: u8, received: u8 },

    #[error("no flow control received in time")]
    FlowControlTimeout,

    #[error("no consecutive frame received in time")]
    ReassemblyTimeout,

    #[error("peer reported buffer overflow")]
    PeerOverflow,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("payload of {0} bytes exceeds the 4095 byte transfer limit")]
    PayloadTooLarge(usize),

    #[error("peer announced {declared} bytes, receive limit is {limit}")]
    RxBufferOverflow { declared: usize, limit: usize },

    #[error("transfer aborted")]
    Aborted,

    #[error("no transfer started before the timeout")]
    Timeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session not initialized")]
    NotInitialized,

    #[error(transparent)]
    Link(#[from] LinkError),
}

pub type Result<T> = std::result::Result<T, IsoTpError>;

/// Result type of link primitives.
pub type LinkResult<T> = std::result::Result<T, LinkError>;
