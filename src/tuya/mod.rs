//! Tuya datapoint sub-protocol over the manufacturer-specific cluster.
//!
//! Cheap Tuya Zigbee devices (TS0601 and friends) expose almost nothing
//! through standard ZCL attributes. Instead every application value is a
//! small numbered "datapoint" sent in a self-describing frame through the
//! `0xEF00` cluster's `dataReport` / `dataRequest` commands.

pub mod codec;
pub mod dispatch;
pub mod time_sync;

pub use codec::{DataType, DatapointFrame, DatapointValue, decode, decode_all, encode};
pub use dispatch::{DatapointDispatchTable, DatapointHandler, DispatchOutcome};

/// Command used to send datapoint frames to the device.
pub const DATA_REQUEST_COMMAND: &str = "dataRequest";
/// Payload key carrying the encoded frame.
pub const FRAME_ARGUMENT: &str = "frame";
/// Command asking the device to report a datapoint's current value.
pub const DATA_QUERY_COMMAND: &str = "dataQuery";
/// Payload key carrying the queried datapoint id.
pub const DATAPOINT_ARGUMENT: &str = "dp";
