//! Routes decoded datapoints to capability handlers by datapoint id.

use std::collections::HashMap;

use super::codec::{DataType, DatapointValue};
use crate::capability::{CapabilityValue, SetParser, ValueParser};
use crate::error::ParseError;

/// Handler for one datapoint id.
#[derive(Debug, Clone)]
pub struct DatapointHandler {
    pub capability_id: String,
    pub data_type: DataType,
    pub parser: ValueParser,
    /// Present when the capability can be written back through this datapoint.
    pub set_parser: Option<SetParser>,
}

impl DatapointHandler {
    pub fn new(capability_id: impl Into<String>, data_type: DataType, parser: ValueParser) -> Self {
        Self {
            capability_id: capability_id.into(),
            data_type,
            parser,
            set_parser: None,
        }
    }

    pub fn writable(mut self, set_parser: SetParser) -> Self {
        self.set_parser = Some(set_parser);
        self
    }
}

/// Result of dispatching one datapoint.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No handler registered; the datapoint is dropped.
    Unmapped,
    /// Handler ran but produced no update.
    NoUpdate { capability_id: String },
    Update {
        capability_id: String,
        value: CapabilityValue,
    },
    ParseFailed {
        capability_id: String,
        error: ParseError,
    },
}

#[derive(Debug, Default)]
pub struct DatapointDispatchTable {
    handlers: HashMap<u8, DatapointHandler>,
}

impl DatapointDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the handler for `datapoint_id`.
    pub fn register(&mut self, datapoint_id: u8, handler: DatapointHandler) {
        if let Some(previous) = self.handlers.insert(datapoint_id, handler) {
            log::debug!(
                "[Tuya] DP{} handler for {} replaced",
                datapoint_id,
                previous.capability_id
            );
        }
    }

    /// Handler and datapoint id backing a capability, if any.
    pub fn find_capability(&self, capability_id: &str) -> Option<(u8, &DatapointHandler)> {
        self.handlers
            .iter()
            .find(|(_, h)| h.capability_id == capability_id)
            .map(|(dp, h)| (*dp, h))
    }

    pub fn dispatch(&self, datapoint_id: u8, value: &DatapointValue) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&datapoint_id) else {
            log::debug!(
                "[Tuya] DP{} unmapped, dropping {:?}",
                datapoint_id,
                value
            );
            return DispatchOutcome::Unmapped;
        };

        let capability_id = handler.capability_id.clone();
        match handler.parser.parse(&value.to_attribute()) {
            Ok(Some(value)) => DispatchOutcome::Update {
                capability_id,
                value,
            },
            Ok(None) => DispatchOutcome::NoUpdate { capability_id },
            Err(error) => DispatchOutcome::ParseFailed {
                capability_id,
                error,
            },
        }
    }

    /// Mapped datapoint ids, ascending.
    pub fn datapoint_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
