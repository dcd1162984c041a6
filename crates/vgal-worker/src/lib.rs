//! Video analysis worker.
//!
//! This crate provides:
//! - The result merger (pure tag/category/insight merge)
//! - The orchestrator driving one video from `uploaded` to a terminal state
//! - The re-check driver that re-invokes the orchestrator on a delay
//! - The stale-video watchdog
//! - The job executor wiring ingest, re-checks and the watchdog together

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod logging;
pub mod merger;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod watchdog;

pub use config::WorkerConfig;
pub use driver::{DriverConfig, RecheckDriver, RecheckHandler, RecheckOutcome};
pub use error::{OrchestratorError, OrchestratorResult};
pub use executor::JobExecutor;
pub use logging::VideoLogger;
pub use merger::{MergeVerdict, MergedAnalysis};
pub use orchestrator::Orchestrator;
pub use watchdog::StaleVideoWatchdog;
