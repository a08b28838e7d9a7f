//! Experiment lifecycle and the service facade the API layer talks to.
//!
//! Status moves `draft -> running <-> paused -> completed`; `archived` is
//! reachable from every other state. Transitions report illegal moves as
//! `Ok(false)` and leave the record untouched. `Err` is reserved for the
//! repository failing.
//!
//! Transitions on one experiment are serialized through a per-id mutex;
//! different experiments never contend.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::assignment::assign_variant;
use super::config::{
    Arm, Experiment, ExperimentError, ExperimentStatus, ExperimentsConfig, NewExperiment,
};
use super::insights::{generate_insights, TestInsights};
use super::metrics::{EventKind, MetricsAccumulator, TestResults, VariantResults};
use super::stats;
use super::store::{
    ExperimentFilter, ExperimentRepository, ExperimentStore, MemoryExperimentStore,
};

const REPORT_ALPHA: f64 = 0.05;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Live results plus read-readiness diagnostics.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentReport {
    pub results: TestResults,
    pub sample_ratio_mismatch: bool,
    pub required_impressions_per_arm: Option<u64>,
    pub progress_pct: Option<f64>,
}

pub struct ExperimentService {
    repo: Arc<dyn ExperimentRepository>,
    metrics: MetricsAccumulator,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: ExperimentsConfig,
}

impl ExperimentService {
    pub fn new(repo: Arc<dyn ExperimentRepository>, config: ExperimentsConfig) -> Self {
        Self {
            repo,
            metrics: MetricsAccumulator::new(),
            locks: DashMap::new(),
            config,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryExperimentStore::new()),
            ExperimentsConfig::default(),
        )
    }

    /// Uses the file store when `config.data_dir` is set, memory otherwise.
    pub fn from_config(config: ExperimentsConfig) -> Result<Self, ExperimentError> {
        let repo: Arc<dyn ExperimentRepository> = match config.data_dir {
            Some(ref dir) => Arc::new(ExperimentStore::new(dir)?),
            None => {
                tracing::info!("no data dir configured, experiments are kept in memory");
                Arc::new(MemoryExperimentStore::new())
            }
        };
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &ExperimentsConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    // ── Records ─────────────────────────────────────────────────────

    pub fn create(&self, params: NewExperiment) -> Result<Experiment, ExperimentError> {
        let experiment = params.into_experiment(uuid::Uuid::new_v4().to_string(), now_ms());
        experiment.validate()?;
        self.repo.put(&experiment)?;
        tracing::info!(
            experiment_id = %experiment.id,
            embed_id = %experiment.embed_id,
            traffic_split = experiment.traffic_split,
            "created experiment"
        );
        Ok(experiment)
    }

    pub fn get(&self, id: &str) -> Result<Option<Experiment>, ExperimentError> {
        self.repo.get(id)
    }

    /// Matching experiments, oldest first.
    pub fn list(
        &self,
        filter: Option<&ExperimentFilter>,
    ) -> Result<Vec<Experiment>, ExperimentError> {
        let mut experiments = self.repo.list(filter)?;
        experiments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(experiments)
    }

    /// The running experiment for `embed_id`, earliest created if several.
    pub fn active_for_embed(&self, embed_id: &str) -> Result<Option<Experiment>, ExperimentError> {
        let filter = ExperimentFilter {
            embed_id: Some(embed_id.to_string()),
            status: Some(ExperimentStatus::Running),
            ..Default::default()
        };
        Ok(self.list(Some(&filter))?.into_iter().next())
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// `draft | paused -> running`. Stamps `start_date` on first start.
    pub fn start(&self, id: &str) -> Result<bool, ExperimentError> {
        self.transition(id, ExperimentStatus::Running, |exp, now| {
            if !matches!(
                exp.status,
                ExperimentStatus::Draft | ExperimentStatus::Paused
            ) {
                return false;
            }
            if exp.start_date.is_none() {
                exp.start_date = Some(now);
            }
            true
        })
    }

    /// `running -> paused`.
    pub fn pause(&self, id: &str) -> Result<bool, ExperimentError> {
        self.transition(id, ExperimentStatus::Paused, |exp, _| {
            exp.status == ExperimentStatus::Running
        })
    }

    /// `running | paused -> completed`, materializing the final results.
    pub fn complete(&self, id: &str) -> Result<bool, ExperimentError> {
        self.transition(id, ExperimentStatus::Completed, |exp, now| {
            if !matches!(
                exp.status,
                ExperimentStatus::Running | ExperimentStatus::Paused
            ) {
                return false;
            }
            let (control, variant) = self.metrics.arms(&exp.id).unwrap_or_default();
            exp.results = Some(TestResults::from_arms(control, variant));
            exp.end_date = Some(now);
            true
        })
    }

    /// Any state except `archived` -> `archived`.
    pub fn archive(&self, id: &str) -> Result<bool, ExperimentError> {
        self.transition(id, ExperimentStatus::Archived, |exp, now| {
            if exp.status == ExperimentStatus::Archived {
                return false;
            }
            if exp.end_date.is_none() {
                exp.end_date = Some(now);
            }
            true
        })
    }

    /// Applies `apply` to a copy of the record under the experiment's lock
    /// and stores it only if `apply` accepted the move.
    fn transition<F>(
        &self,
        id: &str,
        target: ExperimentStatus,
        apply: F,
    ) -> Result<bool, ExperimentError>
    where
        F: FnOnce(&mut Experiment, i64) -> bool,
    {
        if self.repo.get(id)?.is_none() {
            tracing::debug!(experiment_id = id, to = %target, "transition on unknown experiment");
            return Ok(false);
        }

        let lock = Arc::clone(self.locks.entry(id.to_string()).or_default().value());
        let _guard = lock.lock();

        let Some(current) = self.repo.get(id)? else {
            return Ok(false);
        };
        let mut next = current.clone();
        let now = now_ms();
        if !apply(&mut next, now) {
            tracing::debug!(
                experiment_id = id,
                from = %current.status,
                to = %target,
                "rejected experiment transition"
            );
            return Ok(false);
        }
        next.status = target;
        next.updated_at = now;
        self.repo.put(&next)?;

        tracing::info!(
            experiment_id = id,
            from = %current.status,
            to = %target,
            "experiment transitioned"
        );
        Ok(true)
    }

    // ── Traffic ─────────────────────────────────────────────────────

    /// Arm `user_id` should see. Unknown or inactive experiments serve control.
    pub fn assign(&self, test_id: &str, user_id: &str) -> Result<Arm, ExperimentError> {
        let arm = match self.repo.get(test_id)? {
            Some(experiment) => assign_variant(&experiment, user_id),
            None => Arm::Control,
        };
        tracing::debug!(experiment_id = test_id, arm = %arm, "assigned arm");
        Ok(arm)
    }

    /// Counts one event against a running experiment.
    ///
    /// Unknown ids are `NotFound` and experiments in any other status are
    /// `InvalidStatus`, so counters only ever exist for real experiments and
    /// only hold traffic seen while running.
    pub fn record(
        &self,
        test_id: &str,
        arm: Arm,
        kind: EventKind,
    ) -> Result<VariantResults, ExperimentError> {
        let Some(experiment) = self.repo.get(test_id)? else {
            return Err(ExperimentError::NotFound(test_id.to_string()));
        };
        if !experiment.is_running() {
            tracing::debug!(
                experiment_id = test_id,
                status = %experiment.status,
                event = ?kind,
                "dropped event for experiment that is not running"
            );
            return Err(ExperimentError::InvalidStatus(experiment.status.to_string()));
        }
        Ok(self.metrics.record(test_id, arm, kind))
    }

    pub fn record_impression(
        &self,
        test_id: &str,
        arm: Arm,
    ) -> Result<VariantResults, ExperimentError> {
        self.record(test_id, arm, EventKind::Impression)
    }

    pub fn record_click(&self, test_id: &str, arm: Arm) -> Result<VariantResults, ExperimentError> {
        self.record(test_id, arm, EventKind::Click)
    }

    pub fn record_conversion(
        &self,
        test_id: &str,
        arm: Arm,
    ) -> Result<VariantResults, ExperimentError> {
        self.record(test_id, arm, EventKind::Conversion)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Live results; `None` until an event is recorded for `test_id`.
    pub fn results(&self, test_id: &str) -> Option<TestResults> {
        self.metrics.results(test_id)
    }

    /// Results frozen at completion win over live counters.
    fn stored_or_live(&self, experiment: &Experiment) -> Option<TestResults> {
        experiment
            .results
            .clone()
            .or_else(|| self.metrics.results(&experiment.id))
    }

    pub fn report(&self, test_id: &str) -> Result<Option<ExperimentReport>, ExperimentError> {
        let Some(experiment) = self.repo.get(test_id)? else {
            return Ok(None);
        };
        let Some(results) = self.stored_or_live(&experiment) else {
            return Ok(None);
        };

        let variant_fraction = f64::from(experiment.traffic_split) / 100.0;
        let sample_ratio_mismatch = stats::check_sample_ratio_mismatch(
            results.control.impressions,
            results.variant.impressions,
            variant_fraction,
        );
        let required = stats::required_sample_size(
            results.control.conversion_rate,
            self.config.min_detectable_effect,
            REPORT_ALPHA,
            self.config.stat_power,
            variant_fraction,
        );
        let progress_pct = required.filter(|r| *r > 0).map(|r| {
            let current = results.control.impressions.min(results.variant.impressions);
            (current as f64 / r as f64 * 100.0).min(100.0)
        });

        Ok(Some(ExperimentReport {
            results,
            sample_ratio_mismatch,
            required_impressions_per_arm: required,
            progress_pct,
        }))
    }

    /// Guidance for `test_id`; empty lists when it is unknown or has no data.
    pub fn insights(&self, test_id: &str) -> Result<TestInsights, ExperimentError> {
        let experiment = self.repo.get(test_id)?;
        let results = experiment
            .as_ref()
            .and_then(|exp| self.stored_or_live(exp));
        Ok(generate_insights(experiment.as_ref(), results.as_ref()))
    }
}
