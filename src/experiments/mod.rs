//! A/B experimentation core: deterministic traffic splitting, live event
//! counters, two-proportion significance testing, lifecycle management and
//! human-readable insights.

pub mod assignment;
pub mod config;
pub mod insights;
pub mod lifecycle;
pub mod metrics;
pub mod stats;
pub mod store;

pub use assignment::assign_variant;
pub use config::{
    Arm, Experiment, ExperimentError, ExperimentStatus, ExperimentsConfig, NewExperiment,
    PrimaryGoal,
};
pub use insights::{generate_insights, TestInsights};
pub use lifecycle::{ExperimentReport, ExperimentService};
pub use metrics::{EventKind, MetricsAccumulator, TestResults, VariantResults, Winner};
pub use store::{ExperimentFilter, ExperimentRepository, ExperimentStore, MemoryExperimentStore};
