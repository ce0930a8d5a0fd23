//! Core library for the measure_sync application.
//!
//! Runs parameter sweeps on a vibrotactile stimulator while an EEG board
//! streams to disk, annotating the stream with a marker before every
//! stimulator ON/OFF command so each recording can be cut into epochs later.
//!
//! The binary only parses arguments and wires real devices into
//! [`orchestrator::ExperimentOrchestrator`]; everything else lives here.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod orchestrator;
pub mod recording;
pub mod stimulator;
pub mod sweep;
pub mod watcher;

pub use error::{SyncError, SyncResult};
