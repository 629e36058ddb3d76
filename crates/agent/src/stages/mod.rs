//! The three pipeline stages: cleaning, feature engineering, training.
//!
//! Each stage owns its context type, its tool set, and its prompts. The
//! shared `StageLoop` drives all of them; stages only differ in what
//! their tools do and how a report is finalized.

use std::path::{Path, PathBuf};

pub mod cleaning;
pub mod engineering;
pub mod training;

/// Settings every stage loop needs, extracted from the app config.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub model: String,
    pub temperature: f32,
    pub max_iterations: u32,
    pub data_dir: PathBuf,
}

pub(crate) fn cleaning_report_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cleaning_report.json")
}

pub(crate) fn engineering_report_path(data_dir: &Path) -> PathBuf {
    data_dir.join("engineering_report.json")
}

pub(crate) fn training_report_path(data_dir: &Path) -> PathBuf {
    data_dir.join("training_report.json")
}
