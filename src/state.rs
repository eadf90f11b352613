use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::analysis::standards::{DEFAULT_PACK, StandardPack, resolve_pack};
use crate::config::{FilterConfig, ProcessingConfig};
use crate::data::filter::filtered_view;
use crate::data::loader::load_file;
use crate::data::model::{Dataset, Table};
use crate::project::Project;

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Loaded datasets plus the settings applied to them, independent of any
/// front end.
#[derive(Debug, Clone)]
pub struct Session {
    pub datasets: Vec<Dataset>,

    /// Index into `datasets`; meaningless while `datasets` is empty.
    pub active: usize,

    pub processing_config: ProcessingConfig,
    pub filter_config: FilterConfig,

    /// Built-in pack id or path to a pack document.
    pub standard_pack: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            active: 0,
            processing_config: ProcessingConfig::default(),
            filter_config: FilterConfig::default(),
            standard_pack: DEFAULT_PACK.to_string(),
        }
    }
}

impl Session {
    /// Import a file under the session's processing config and make it active.
    pub fn add_file(&mut self, path: &Path) -> Result<&Dataset> {
        let dataset = load_file(path, &self.processing_config)?;
        Ok(self.add_dataset(dataset))
    }

    /// Add an already imported dataset and make it active.
    pub fn add_dataset(&mut self, dataset: Dataset) -> &Dataset {
        self.datasets.push(dataset);
        self.active = self.datasets.len() - 1;
        &self.datasets[self.active]
    }

    /// Drop a dataset. The selection stays on the same dataset; removing the
    /// active one selects its predecessor, or the new first dataset.
    pub fn remove(&mut self, index: usize) -> Option<Dataset> {
        if index >= self.datasets.len() {
            return None;
        }
        let removed = self.datasets.remove(index);
        if self.active > index || (self.active == index && index > 0) {
            self.active -= 1;
        }
        Some(removed)
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        if index >= self.datasets.len() {
            bail!("dataset index {index} out of range ({} loaded)", self.datasets.len());
        }
        self.active = index;
        Ok(())
    }

    pub fn active_dataset(&self) -> Option<&Dataset> {
        self.datasets.get(self.active)
    }

    /// Apply a new processing config to every dataset. Each dataset is
    /// replaced by value; on failure the session is left unchanged.
    pub fn reprocess_all(&mut self, config: ProcessingConfig) -> Result<()> {
        let rebuilt = self
            .datasets
            .iter()
            .map(|d| d.reprocess(config.clone()).with_context(|| format!("reprocessing {}", d.name)))
            .collect::<Result<Vec<_>>>()?;
        self.datasets = rebuilt;
        self.processing_config = config;
        log::info!("Reprocessed {} datasets", self.datasets.len());
        Ok(())
    }

    /// Filtered view of the active dataset's analysis table.
    pub fn filtered_active(&self) -> Result<Option<Table>> {
        match self.active_dataset() {
            Some(dataset) => Ok(Some(filtered_view(dataset.analysis_table(), &self.filter_config)?)),
            None => Ok(None),
        }
    }

    pub fn standard_pack(&self) -> Result<StandardPack> {
        resolve_pack(&self.standard_pack)
    }

    /// Project document for this session. Datasets imported from memory
    /// (no source path) are not recorded.
    pub fn to_project(&self) -> Project {
        let mut datasets = Vec::new();
        let mut active_dataset_index = 0;
        for (i, dataset) in self.datasets.iter().enumerate() {
            if let Some(path) = &dataset.metadata.path {
                if i == self.active {
                    active_dataset_index = datasets.len();
                }
                datasets.push(path.clone());
            }
        }
        Project {
            datasets,
            processing_config: self.processing_config.clone(),
            filter_config: self.filter_config.clone(),
            active_standard_pack: self.standard_pack.clone(),
            active_dataset_index,
        }
    }

    /// Re-import every dataset a project lists.
    pub fn from_project(project: &Project) -> Result<Self> {
        let mut session = Session {
            processing_config: project.processing_config.clone(),
            filter_config: project.filter_config.clone(),
            standard_pack: project.active_standard_pack.clone(),
            ..Default::default()
        };
        for path in &project.datasets {
            session.add_file(path)?;
        }
        if !session.datasets.is_empty() {
            session.active = project.active_dataset_index.min(session.datasets.len() - 1);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::import_csv_str;

    const LOG: &str = "Timestamp,CO2,PM2.5\n1700000000,500,3\n1700000060,520,4\n1700000120,540,5\n";

    fn dataset(name: &str) -> Dataset {
        import_csv_str(name, LOG, &ProcessingConfig::default()).unwrap()
    }

    #[test]
    fn adding_makes_dataset_active() {
        let mut session = Session::default();
        session.add_dataset(dataset("a"));
        session.add_dataset(dataset("b"));
        assert_eq!(session.active_dataset().unwrap().name, "b");
        session.set_active(0).unwrap();
        assert_eq!(session.active_dataset().unwrap().name, "a");
        assert!(session.set_active(2).is_err());
    }

    #[test]
    fn removal_keeps_active_selection() {
        let mut session = Session::default();
        for name in ["a", "b", "c"] {
            session.add_dataset(dataset(name));
        }
        session.set_active(2).unwrap();
        assert_eq!(session.remove(0).unwrap().name, "a");
        assert_eq!(session.active_dataset().unwrap().name, "c");
        session.remove(1);
        assert_eq!(session.active_dataset().unwrap().name, "b");
        session.remove(0);
        assert!(session.active_dataset().is_none());
        assert!(session.remove(0).is_none());
    }

    #[test]
    fn removing_active_selects_predecessor() {
        let mut session = Session::default();
        for name in ["a", "b", "c", "d"] {
            session.add_dataset(dataset(name));
        }
        session.set_active(2).unwrap();
        assert_eq!(session.remove(2).unwrap().name, "c");
        assert_eq!(session.active_dataset().unwrap().name, "b");

        session.set_active(0).unwrap();
        assert_eq!(session.remove(0).unwrap().name, "a");
        assert_eq!(session.active_dataset().unwrap().name, "b");
    }

    #[test]
    fn reprocess_replaces_every_dataset() {
        let mut session = Session::default();
        session.add_dataset(dataset("a"));
        session.add_dataset(dataset("b"));
        let cfg = ProcessingConfig {
            resample_interval: Some("2min".into()),
            use_resampled: true,
            ..Default::default()
        };
        session.reprocess_all(cfg.clone()).unwrap();
        assert_eq!(session.processing_config, cfg);
        assert!(session.datasets.iter().all(|d| d.resampled.is_some() && d.config == cfg));
    }

    #[test]
    fn bad_reprocess_leaves_session_untouched() {
        let mut session = Session::default();
        session.add_dataset(dataset("a"));
        let cfg = ProcessingConfig {
            resample_interval: Some("soon".into()),
            ..Default::default()
        };
        assert!(session.reprocess_all(cfg).is_err());
        assert_eq!(session.processing_config, ProcessingConfig::default());
        assert!(session.datasets[0].resampled.is_none());
    }

    #[test]
    fn filtered_view_of_active_dataset() {
        let mut session = Session::default();
        assert!(session.filtered_active().unwrap().is_none());
        session.add_dataset(dataset("a"));
        session.filter_config.sma_window = Some("2".into());
        let filtered = session.filtered_active().unwrap().unwrap();
        assert_eq!(
            filtered.column("co2").unwrap().values,
            vec![Some(500.0), Some(510.0), Some(530.0)]
        );
    }

    #[test]
    fn project_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::default();
        for name in ["one", "two"] {
            let path = dir.path().join(format!("{name}.csv"));
            std::fs::write(&path, LOG).unwrap();
            session.add_file(&path).unwrap();
        }
        session.add_dataset(dataset("in_memory"));
        session.set_active(1).unwrap();
        session.standard_pack = "eu_eea".into();

        let project = session.to_project();
        assert_eq!(project.datasets.len(), 2);
        assert_eq!(project.active_dataset_index, 1);

        let restored = Session::from_project(&project).unwrap();
        assert_eq!(restored.datasets.len(), 2);
        assert_eq!(restored.active_dataset().unwrap().name, "two");
        assert_eq!(restored.standard_pack().unwrap().name, session.standard_pack().unwrap().name);
    }
}
