use splitlab::ExperimentService;
use std::sync::Arc;

pub mod experiments;
pub mod health;
pub mod metrics;

pub struct AppState {
    pub service: Arc<ExperimentService>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: Arc<ExperimentService>) -> Self {
        AppState {
            service,
            start_time: std::time::Instant::now(),
        }
    }
}

pub use experiments::{
    archive_experiment, assign_arm, complete_experiment, create_experiment, get_active_for_embed,
    get_experiment, get_experiment_insights, get_experiment_results, list_experiments,
    pause_experiment, record_event, start_experiment,
};
pub use health::health;
pub use metrics::metrics_handler;
