//! Zigbee capability bridge library.
//!
//! Binds hub capabilities to Zigbee ZCL clusters and Tuya datapoints:
//! reporting negotiation, report routing, polling, IAS Zone enrollment and
//! the Tuya datapoint codec, all scoped to one [`session::DeviceSession`]
//! per paired endpoint.

pub mod capability;
pub mod config;
pub mod error;
pub mod error_sink;
pub mod ias;
pub mod input;
pub mod reporting;
pub mod session;
pub mod tuya;
pub mod zcl;
