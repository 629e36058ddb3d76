//! Stage report types, the immutable handoff artifacts between stages.
//!
//! Each stage finalizes exactly one report, written as JSON to a well-known
//! path; the next stage (or the orchestrator) reads it back. Stages never
//! share their working context, only these reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Dataset shape as (rows, columns).
pub type Shape = (usize, usize);

/// The kind of supervised learning problem, inferred once per pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Classification,
    Regression,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskType::Classification => write!(f, "classification"),
            TaskType::Regression => write!(f, "regression"),
        }
    }
}

/// Report produced by the cleaning stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningReport {
    pub original_shape: Shape,
    pub cleaned_shape: Shape,
    pub summary: String,
    pub output_file: String,
    #[serde(default)]
    pub auto_finalized: bool,
}

/// One feature-creation action, retained for the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub feature: String,
    pub expression: String,
    pub reasoning: String,
}

/// Report produced by the feature-engineering stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineeringReport {
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub target_column: String,
    pub task_type: TaskType,
    pub features_created: usize,
    pub feature_creation_details: Vec<FeatureRecord>,
    pub final_features: Vec<String>,
    pub summary: String,
    pub output_file: String,
    #[serde(default)]
    pub auto_finalized: bool,
}

/// One training-script execution, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingIteration {
    pub description: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Report produced by the training stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub input_file: String,
    pub target_column: String,
    pub task_type: TaskType,
    pub best_metrics: serde_json::Value,
    pub iterations: Vec<TrainingIteration>,
    pub total_iterations: usize,
    pub summary: String,
    #[serde(default)]
    pub auto_finalized: bool,
}

/// The combined pipeline report assembled by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub generated_at: DateTime<Utc>,
    pub cleaning: CleaningReport,
    pub engineering: EngineeringReport,
    pub training: TrainingReport,
}

impl FinalReport {
    pub fn new(
        cleaning: CleaningReport,
        engineering: EngineeringReport,
        training: TrainingReport,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            cleaning,
            engineering,
            training,
        }
    }

    /// Render the report as a markdown document.
    pub fn to_markdown(&self) -> String {
        let mut md = Vec::new();
        md.push("# Final Pipeline Report".to_string());
        md.push(format!(
            "Generated at {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        ));
        md.push(String::new());

        md.push("## 1. Data Cleaning".to_string());
        md.push(format!(
            "**Original shape:** {:?}\n**Cleaned shape:** {:?}\n\n**Summary of actions:**\n{}\n\n**Output file:** `{}`",
            self.cleaning.original_shape,
            self.cleaning.cleaned_shape,
            self.cleaning.summary,
            self.cleaning.output_file,
        ));
        md.push(String::new());

        md.push("## 2. Feature Engineering".to_string());
        let features_block = if self.engineering.feature_creation_details.is_empty() {
            "No interaction features created.".to_string()
        } else {
            self.engineering
                .feature_creation_details
                .iter()
                .map(|f| format!("- `{}` from `{}`", f.feature, f.expression))
                .collect::<Vec<_>>()
                .join("\n")
        };
        md.push(format!(
            "**Input shape:** {:?}\n**Output shape:** {:?}\n\n**Target column:** `{}`\n**Task type:** {}\n\n**Features created:** {}\n{}\n\n**Final feature set:**\n{}\n\n**Summary:**\n{}\n\n**Output file:** `{}`",
            self.engineering.input_shape,
            self.engineering.output_shape,
            self.engineering.target_column,
            self.engineering.task_type,
            self.engineering.features_created,
            features_block,
            self.engineering.final_features.join(", "),
            self.engineering.summary,
            self.engineering.output_file,
        ));
        md.push(String::new());

        md.push("## 3. Model Training".to_string());
        let best = if self.training.best_metrics.is_null() {
            "No metrics recorded.".to_string()
        } else {
            serde_json::to_string_pretty(&self.training.best_metrics)
                .unwrap_or_else(|_| "No metrics recorded.".to_string())
        };
        md.push(format!(
            "**Total iterations:** {}\n\n**Best metrics:**\n{}\n\n**Summary:**\n{}",
            self.training.total_iterations, best, self.training.summary,
        ));
        md.push(String::new());

        md.push("---".to_string());
        md.push("Report generation complete.".to_string());
        md.join("\n")
    }

    /// A short console summary of the three stages.
    pub fn summary_text(&self) -> String {
        format!(
            "Data Cleaning:\n  From {:?} to {:?}\n\nFeature Engineering:\n  Target column: {}\n  Output shape: {:?}\n  Features created: {}\n\nModel Training:\n  Iterations: {}\n  Best metrics: {}",
            self.cleaning.original_shape,
            self.cleaning.cleaned_shape,
            self.engineering.target_column,
            self.engineering.output_shape,
            self.engineering.features_created,
            self.training.total_iterations,
            serde_json::to_string(&self.training.best_metrics).unwrap_or_default(),
        )
    }
}

/// Write a report as pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a report back from its well-known path.
pub fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> FinalReport {
        FinalReport::new(
            CleaningReport {
                original_shape: (100, 6),
                cleaned_shape: (100, 5),
                summary: "Dropped an id column and imputed ages.".into(),
                output_file: "data/clean_data.csv".into(),
                auto_finalized: false,
            },
            EngineeringReport {
                input_shape: (100, 5),
                output_shape: (100, 7),
                target_column: "price".into(),
                task_type: TaskType::Regression,
                features_created: 1,
                feature_creation_details: vec![FeatureRecord {
                    feature: "area_per_room".into(),
                    expression: "area / rooms".into(),
                    reasoning: "Density matters for price.".into(),
                }],
                final_features: vec!["area".into(), "rooms".into(), "price".into()],
                summary: "Created one interaction feature.".into(),
                output_file: "data/engineered_data.csv".into(),
                auto_finalized: false,
            },
            TrainingReport {
                input_file: "data/engineered_data.csv".into(),
                target_column: "price".into(),
                task_type: TaskType::Regression,
                best_metrics: serde_json::json!({"rmse": 12.5, "r2": 0.83}),
                iterations: vec![TrainingIteration {
                    description: "Baseline model".into(),
                    exit_code: 0,
                    stdout: "RMSE: 12.5".into(),
                    stderr: String::new(),
                }],
                total_iterations: 1,
                summary: "Baseline was good enough.".into(),
                auto_finalized: false,
            },
        )
    }

    #[test]
    fn markdown_contains_all_sections() {
        let md = sample_report().to_markdown();
        assert!(md.contains("## 1. Data Cleaning"));
        assert!(md.contains("## 2. Feature Engineering"));
        assert!(md.contains("## 3. Model Training"));
        assert!(md.contains("area_per_room"));
        assert!(md.contains("rmse"));
    }

    #[test]
    fn summary_text_mentions_target() {
        let summary = sample_report().summary_text();
        assert!(summary.contains("price"));
        assert!(summary.contains("Iterations: 1"));
    }

    #[test]
    fn report_json_roundtrip() {
        let dir = std::env::temp_dir().join(format!("tabforge-report-{}", std::process::id()));
        let path = dir.join("cleaning_report.json");
        let report = sample_report().cleaning;
        save_json(&report, &path).unwrap();
        let back: CleaningReport = load_json(&path).unwrap();
        assert_eq!(back.original_shape, (100, 6));
        assert_eq!(back.cleaned_shape, (100, 5));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn task_type_serializes_lowercase() {
        let json = serde_json::to_string(&TaskType::Classification).unwrap();
        assert_eq!(json, "\"classification\"");
        let back: TaskType = serde_json::from_str("\"regression\"").unwrap();
        assert_eq!(back, TaskType::Regression);
    }

    #[test]
    fn auto_finalized_defaults_to_false() {
        let json = r#"{
            "original_shape": [10, 2],
            "cleaned_shape": [10, 2],
            "summary": "s",
            "output_file": "f.csv"
        }"#;
        let report: CleaningReport = serde_json::from_str(json).unwrap();
        assert!(!report.auto_finalized);
    }
}
