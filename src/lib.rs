pub mod experiments;

pub use experiments::{
    Arm, EventKind, Experiment, ExperimentError, ExperimentService, ExperimentStatus,
    ExperimentsConfig, NewExperiment, TestResults, VariantResults, Winner,
};
