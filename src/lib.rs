#![allow(clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod probe;
pub mod retry;
pub mod runtime;
pub mod telemetry;

pub use config::{GateConfig, ProbeDefaults, ProbeManifest};
pub use gate::{Gate, GateFailure, GateMode, GateReport, GateState, GateStatus};
pub use probe::{
    execute, NetworkProber, ProbeKind, ProbeOutcome, ProbeResult, ProbeSpec, ProbeTarget, Prober,
};
