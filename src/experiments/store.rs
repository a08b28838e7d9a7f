use std::path::{Path, PathBuf};

use dashmap::DashMap;

use super::config::{Experiment, ExperimentError, ExperimentStatus};

#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    pub embed_id: Option<String>,
    pub creator_id: Option<String>,
    pub status: Option<ExperimentStatus>,
}

impl ExperimentFilter {
    pub fn matches(&self, experiment: &Experiment) -> bool {
        if let Some(ref embed) = self.embed_id {
            if &experiment.embed_id != embed {
                return false;
            }
        }
        if let Some(ref creator) = self.creator_id {
            if &experiment.creator_id != creator {
                return false;
            }
        }
        if let Some(status) = self.status {
            if experiment.status != status {
                return false;
            }
        }
        true
    }
}

/// Storage for experiment records, keyed by id.
///
/// Implementations only store; status rules live in the service.
pub trait ExperimentRepository: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Experiment>, ExperimentError>;
    /// Inserts or replaces the record with `experiment.id`.
    fn put(&self, experiment: &Experiment) -> Result<(), ExperimentError>;
    fn list(&self, filter: Option<&ExperimentFilter>) -> Result<Vec<Experiment>, ExperimentError>;
}

fn filtered(
    experiments: &DashMap<String, Experiment>,
    filter: Option<&ExperimentFilter>,
) -> Vec<Experiment> {
    experiments
        .iter()
        .filter(|entry| filter.map_or(true, |f| f.matches(entry.value())))
        .map(|entry| entry.value().clone())
        .collect()
}

/// Process-local store with no persistence.
#[derive(Default)]
pub struct MemoryExperimentStore {
    experiments: DashMap<String, Experiment>,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentRepository for MemoryExperimentStore {
    fn get(&self, id: &str) -> Result<Option<Experiment>, ExperimentError> {
        Ok(self.experiments.get(id).map(|e| e.clone()))
    }

    fn put(&self, experiment: &Experiment) -> Result<(), ExperimentError> {
        self.experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    fn list(&self, filter: Option<&ExperimentFilter>) -> Result<Vec<Experiment>, ExperimentError> {
        Ok(filtered(&self.experiments, filter))
    }
}

/// One JSON file per experiment under `<data_dir>/.experiments`, cached in
/// memory. Writes go to a `.json.tmp` sibling first and are renamed into
/// place, so a crash never leaves a torn record.
pub struct ExperimentStore {
    experiments: DashMap<String, Experiment>,
    dir: PathBuf,
}

impl ExperimentStore {
    pub fn new(data_dir: &Path) -> Result<Self, ExperimentError> {
        let dir = data_dir.join(".experiments");
        std::fs::create_dir_all(&dir)?;
        let store = Self {
            experiments: DashMap::new(),
            dir,
        };
        store.load_all()?;
        tracing::info!(
            dir = %store.dir.display(),
            count = store.experiments.len(),
            "loaded experiment store"
        );
        Ok(store)
    }

    fn load_all(&self) -> Result<(), ExperimentError> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            // "<id>.json.tmp" has extension "tmp", so interrupted writes are skipped
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let data = std::fs::read_to_string(&path)?;
                let experiment: Experiment = serde_json::from_str(&data)?;
                self.experiments.insert(experiment.id.clone(), experiment);
            }
        }
        Ok(())
    }

    fn atomic_write(&self, experiment: &Experiment) -> Result<(), ExperimentError> {
        let tmp_path = self.dir.join(format!("{}.json.tmp", experiment.id));
        let final_path = self.dir.join(format!("{}.json", experiment.id));
        let data = serde_json::to_string_pretty(experiment)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

impl ExperimentRepository for ExperimentStore {
    fn get(&self, id: &str) -> Result<Option<Experiment>, ExperimentError> {
        Ok(self.experiments.get(id).map(|e| e.clone()))
    }

    fn put(&self, experiment: &Experiment) -> Result<(), ExperimentError> {
        if experiment.id.is_empty()
            || experiment
                .id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(ExperimentError::InvalidConfig(format!(
                "experiment id is not a safe file name: {:?}",
                experiment.id
            )));
        }
        self.atomic_write(experiment)?;
        self.experiments
            .insert(experiment.id.clone(), experiment.clone());
        Ok(())
    }

    fn list(&self, filter: Option<&ExperimentFilter>) -> Result<Vec<Experiment>, ExperimentError> {
        Ok(filtered(&self.experiments, filter))
    }
}
