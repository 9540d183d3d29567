//! Alphadesk Monitor
//!
//! Feature drift measurement (PSI) for pipeline health.

pub mod drift;

pub use drift::{psi, DriftMonitor, FeatureColumn, FeatureTable};
