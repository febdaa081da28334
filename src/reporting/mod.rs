//! How attribute values get from the device to capabilities: negotiated
//! reporting, routing of inbound reports, and polling as fallback.

pub mod negotiator;
pub mod polling;
pub mod router;

pub use negotiator::{NegotiationSummary, negotiate};
pub use polling::{PollTarget, PollingScheduler, poll_once};
pub use router::{RoutedReport, route};
