//! Alphadesk Pipeline
//!
//! The daily orchestrator, its input provider seams, and logging setup.

pub mod logging;
pub mod orchestrator;
pub mod providers;

pub use logging::{init_logging, init_logging_from_env, LogFormat};
pub use orchestrator::PipelineOrchestrator;
pub use providers::{RiskBundle, RiskProvider, SignalBundle, SignalProvider};
