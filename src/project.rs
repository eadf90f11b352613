use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::standards::DEFAULT_PACK;
use crate::config::{FilterConfig, ProcessingConfig};

// ---------------------------------------------------------------------------
// Project file
// ---------------------------------------------------------------------------

/// Everything needed to rebuild a session: source files plus settings.
/// Missing fields load as their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub datasets: Vec<PathBuf>,
    pub processing_config: ProcessingConfig,
    pub filter_config: FilterConfig,
    /// Built-in pack id or path to a pack document.
    pub active_standard_pack: String,
    pub active_dataset_index: usize,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            processing_config: ProcessingConfig::default(),
            filter_config: FilterConfig::default(),
            active_standard_pack: DEFAULT_PACK.to_string(),
            active_dataset_index: 0,
        }
    }
}

pub fn save_project(project: &Project, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(project).context("Failed to serialise project")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write project {}", path.display()))?;
    log::info!("Saved project with {} datasets to {}", project.datasets.len(), path.display());
    Ok(())
}

pub fn load_project(path: &Path) -> Result<Project> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read project {}", path.display()))?;
    let project: Project =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse project {}", path.display()))?;
    log::info!("Loaded project with {} datasets from {}", project.datasets.len(), path.display());
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DedupKeep, GapMode};

    #[test]
    fn missing_fields_take_defaults() {
        let project: Project = serde_json::from_str(r#"{ "datasets": ["a.csv"] }"#).unwrap();
        assert_eq!(project.datasets, vec![PathBuf::from("a.csv")]);
        assert_eq!(project.active_standard_pack, "us_epa_legacy");
        assert_eq!(project.active_dataset_index, 0);
        assert_eq!(project.processing_config, ProcessingConfig::default());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut project = Project {
            datasets: vec![PathBuf::from("one.csv"), PathBuf::from("two.csv")],
            active_standard_pack: "uk_defra_daqi".into(),
            active_dataset_index: 1,
            ..Default::default()
        };
        project.processing_config.dedup_keep = DedupKeep::Last;
        project.processing_config.resample_interval = Some("5min".into());
        project.filter_config.sma_window = Some("30min".into());
        project.filter_config.ema_nan_mode = GapMode::Reset;

        save_project(&project, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"datasets\""));
        assert_eq!(load_project(&path).unwrap(), project);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_project(&path).is_err());
    }
}
