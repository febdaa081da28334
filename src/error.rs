use thiserror::Error as ThisError;

/// Failure reported by a cluster handle for a single read/write/command.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Device rejected request with status 0x{status:02X}: {message}")]
    Rejected { status: u8, message: String },

    #[error("Attribute not returned by device: {0}")]
    MissingAttribute(String),

    #[error("Cluster channel closed")]
    ChannelClosed,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Malformed Tuya datapoint frame.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes, need at least {1}")]
    TooShort(usize, usize),

    #[error("Declared payload length {declared} does not match {actual} remaining bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid payload size {size} for {data_type} datapoint")]
    InvalidPayloadSize { data_type: &'static str, size: usize },

    #[error("Value does not match datapoint type {0}")]
    TypeMismatch(&'static str),

    #[error("Empty payload cannot be encoded")]
    EmptyPayload,

    #[error("Payload of {0} bytes exceeds frame limit")]
    PayloadTooLarge(usize),

    #[error("Datapoint id 0 is reserved")]
    ReservedDatapoint,
}

/// A value parser could not interpret a raw value.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Expected {expected}, got {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: String,
    },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("{0}")]
    Custom(String),
}

/// The hub rejected a capability update.
#[derive(ThisError, Debug, Clone, PartialEq)]
#[error("Capability update for {capability} failed: {message}")]
pub struct SinkError {
    pub capability: String,
    pub message: String,
}

#[derive(ThisError, Debug)]
pub enum LayerError {
    #[error("Invalid binding for {capability}: {reason}")]
    Validation { capability: String, reason: String },

    #[error("Capability not bound: {0}")]
    NotFound(String),

    #[error("Declared cluster 0x{0:04X} missing from endpoint")]
    MissingCluster(u16),

    #[error("Unknown cluster name: {0}")]
    UnknownCluster(String),

    #[error("Session {0} was deleted")]
    SessionDeleted(uuid::Uuid),

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Capability {0} has no set path")]
    NotWritable(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LayerError>;
