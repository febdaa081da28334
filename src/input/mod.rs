//! Inputs from outside the layer: driver manifests and simulated devices.

pub mod manifest;
pub mod simulation;
