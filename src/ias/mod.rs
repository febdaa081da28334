//! IAS Zone security cluster support (alarm, motion, contact, water, smoke).

pub mod zone;

pub use zone::{EnrollmentState, ZoneEnrollment, ZoneStatus};
