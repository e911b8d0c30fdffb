//! beespeed - latency, jitter and throughput measurement against BenchBee
//! WebSocket speed-test servers.
//!
//! The measurement engine lives in [`speedtest`]: a sequential echo probe for
//! latency and a pool of parallel transfer connections per throughput phase.
//! [`discovery`] finds the server endpoints for the engine.

pub mod config;
pub mod discovery;
pub mod error;
pub mod speedtest;

pub use config::{LocalBind, TestConfiguration};
pub use error::{Error, Result};
pub use speedtest::{
    run_latency_probe, run_transfer_phase, IntermediateSample, LatencyResult, PhaseResult,
    ServerEndpoints, Speedtest, TestResult, WorkerKind,
};
