//! bayropt-core: Core library for bayropt
//!
//! This crate provides the evaluation cache and objective-function adapter used
//! to tune the parameters of an expensive map-matching pipeline with a
//! Bayesian optimizer.
//!
//! # Architecture
//!
//! ```text
//! optimizer point → ObjectiveFunction (bounds, cast, round, merge defaults)
//!                        ↓ full ParamSet
//!                  SampleDatabase ── hit ──→ stored payload
//!                        ↓ miss
//!                  SampleGenerator (pipeline run, blocking)
//!                        ↓ Sample
//!                  PerformanceMeasure → scalar back to the optimizer
//! ```
//!
//! # Modules
//!
//! - `params`: Parameter values and parameter sets
//! - `canonical`: Seed-free canonical hashing of parameter sets
//! - `sample`: Recorded evaluation outcomes
//! - `generator`: Pipeline-backed and synthetic sample generators
//! - `database`: Persistent, deduplicating sample cache
//! - `measure`: Performance measures over samples
//! - `objective`: Optimizer-facing objective function
//! - `config`: Experiment files
//! - `logging`: Structured logging setup
//! - `error`: Error taxonomy with remediation guidance
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod config;
pub mod database;
pub mod error;
pub mod generator;
pub mod logging;
pub mod measure;
pub mod objective;
pub mod params;
pub mod sample;

pub use canonical::{ParamHash, canonical_hash};
pub use database::{CacheRecord, IntegrityReport, SampleDatabase};
pub use error::{Error, Result, StorageError};
pub use generator::SampleGenerator;
pub use measure::PerformanceMeasure;
pub use objective::{ObjectiveFunction, OptimizerPoint, ParamSpec};
pub use params::{ParamSet, ParamValue};
pub use sample::{MapMatcherSample, Sample, SampleOrigin};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
