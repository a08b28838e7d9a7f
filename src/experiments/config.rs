use std::env;
use std::fmt;
use std::path::PathBuf;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::metrics::TestResults;

pub const DEFAULT_TRAFFIC_SPLIT: u8 = 50;
pub const DEFAULT_MIN_DETECTABLE_EFFECT: f64 = 0.2;
pub const DEFAULT_STAT_POWER: f64 = 0.8;

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub embed_id: String,
    pub creator_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ExperimentStatus,
    /// Percentage of eligible users routed to the variant arm.
    pub traffic_split: u8,
    pub primary_goal: PrimaryGoal,
    pub control_version_id: Option<String>,
    pub variant_version_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    /// Materialized when the experiment completes.
    pub results: Option<TestResults>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Archived,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ExperimentError> {
        match value.to_ascii_lowercase().as_str() {
            "draft" => Ok(ExperimentStatus::Draft),
            "running" => Ok(ExperimentStatus::Running),
            "paused" => Ok(ExperimentStatus::Paused),
            "completed" => Ok(ExperimentStatus::Completed),
            "archived" => Ok(ExperimentStatus::Archived),
            _ => Err(ExperimentError::InvalidConfig(format!(
                "invalid status: {value}"
            ))),
        }
    }

    pub const ALL: [ExperimentStatus; 5] = [
        ExperimentStatus::Draft,
        ExperimentStatus::Running,
        ExperimentStatus::Paused,
        ExperimentStatus::Completed,
        ExperimentStatus::Archived,
    ];
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryGoal {
    Clicks,
    #[default]
    Conversions,
    Views,
    Engagement,
}

/// One of the two experiment groups.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Arm {
    Control,
    Variant,
}

impl Arm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::Control => "control",
            Arm::Variant => "variant",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation parameters accepted from the API layer.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewExperiment {
    pub name: String,
    pub embed_id: String,
    pub creator_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub traffic_split: Option<u8>,
    #[serde(default)]
    pub primary_goal: Option<PrimaryGoal>,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub control_version_id: Option<String>,
    #[serde(default)]
    pub variant_version_id: Option<String>,
}

impl NewExperiment {
    pub(crate) fn into_experiment(self, id: String, now_ms: i64) -> Experiment {
        let end_date = self
            .duration_days
            .map(|days| now_ms + i64::from(days) * MS_PER_DAY);
        Experiment {
            id,
            embed_id: self.embed_id,
            creator_id: self.creator_id,
            name: self.name,
            description: self.description,
            status: ExperimentStatus::Draft,
            traffic_split: self.traffic_split.unwrap_or(DEFAULT_TRAFFIC_SPLIT),
            primary_goal: self.primary_goal.unwrap_or_default(),
            control_version_id: self.control_version_id,
            variant_version_id: self.variant_version_id,
            created_at: now_ms,
            updated_at: now_ms,
            start_date: None,
            end_date,
            results: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(String),
    #[error("invalid status transition: experiment is {0}")]
    InvalidStatus(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExperimentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExperimentError::NotFound(_) => StatusCode::NOT_FOUND,
            ExperimentError::InvalidStatus(_) => StatusCode::CONFLICT,
            ExperimentError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            ExperimentError::Io(_) | ExperimentError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExperimentError::NotFound(_) => "experiment_not_found",
            ExperimentError::InvalidStatus(_) => "invalid_status",
            ExperimentError::InvalidConfig(_) => "invalid_config",
            ExperimentError::Io(_) => "io_error",
            ExperimentError::Json(_) => "json_error",
        }
    }
}

#[cfg(feature = "axum-support")]
impl axum::response::IntoResponse for ExperimentError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl Experiment {
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.name.trim().is_empty() {
            return Err(ExperimentError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        if self.embed_id.trim().is_empty() {
            return Err(ExperimentError::InvalidConfig(
                "embedId must not be empty".to_string(),
            ));
        }
        if self.creator_id.trim().is_empty() {
            return Err(ExperimentError::InvalidConfig(
                "creatorId must not be empty".to_string(),
            ));
        }
        if self.traffic_split > 100 {
            return Err(ExperimentError::InvalidConfig(format!(
                "trafficSplit must be in [0, 100], got {}",
                self.traffic_split
            )));
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

/// Runtime settings for the experimentation core.
#[derive(Clone, Debug)]
pub struct ExperimentsConfig {
    /// When set, experiments persist under `<data_dir>/.experiments`.
    pub data_dir: Option<PathBuf>,
    /// Relative lift the sample-size estimate is powered to detect.
    pub min_detectable_effect: f64,
    pub stat_power: f64,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        ExperimentsConfig {
            data_dir: None,
            min_detectable_effect: DEFAULT_MIN_DETECTABLE_EFFECT,
            stat_power: DEFAULT_STAT_POWER,
        }
    }
}

impl ExperimentsConfig {
    pub fn from_env() -> Self {
        ExperimentsConfig {
            data_dir: env::var("SPLITLAB_DATA_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            min_detectable_effect: env::var("SPLITLAB_MIN_DETECTABLE_EFFECT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| *v > 0.0)
                .unwrap_or(DEFAULT_MIN_DETECTABLE_EFFECT),
            stat_power: env::var("SPLITLAB_STAT_POWER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| *v > 0.0 && *v < 1.0)
                .unwrap_or(DEFAULT_STAT_POWER),
        }
    }
}
