//! The sequential pipeline orchestrator.
//!
//! Runs cleaning, feature engineering, and training in order, handing
//! each stage the previous stage's report. The pipeline is fail-fast: a
//! stage that terminates without a report aborts the run. At the end the
//! three reports are folded into a combined report written both as
//! markdown and as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tabforge_config::AppConfig;
use tabforge_core::error::{Error, PipelineError};
use tabforge_core::provider::Provider;
use tabforge_core::report::{self, FinalReport};
use tracing::info;

use crate::audit::AuditLog;
use crate::sandbox::ScriptRunner;
use crate::stages::{cleaning, engineering, training, StageSettings};

/// Where the combined report lands, relative to the data directory.
pub fn final_report_md_path(data_dir: &Path) -> PathBuf {
    data_dir.join("final_report.md")
}

pub fn final_report_json_path(data_dir: &Path) -> PathBuf {
    data_dir.join("final_report.json")
}

/// Drives one full pipeline run over a single input dataset.
pub struct Pipeline {
    provider: Arc<dyn Provider>,
    settings: StageSettings,
    sandbox_interpreter: String,
    sandbox_timeout: Duration,
    audit: AuditLog,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn Provider>, config: &AppConfig, audit: AuditLog) -> Self {
        Self {
            provider,
            settings: StageSettings {
                model: config.model.clone(),
                temperature: config.temperature,
                max_iterations: config.pipeline.max_iterations,
                data_dir: config.pipeline.data_dir.clone(),
            },
            sandbox_interpreter: config.sandbox.interpreter.clone(),
            sandbox_timeout: Duration::from_secs(config.sandbox.timeout_secs),
            audit,
        }
    }

    /// Replace the data directory (used by tests and the CLI override).
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.settings.data_dir = dir;
        self
    }

    /// Run all three stages against `input_path` and write the combined
    /// report. Returns the assembled report on success.
    pub async fn run(&self, input_path: &Path) -> Result<FinalReport, Error> {
        if !input_path.exists() {
            return Err(Error::Pipeline(PipelineError::StageEntry {
                stage: "cleaning".into(),
                reason: format!("Input file not found: {}", input_path.display()),
            }));
        }
        std::fs::create_dir_all(&self.settings.data_dir)?;

        self.audit.record(
            "pipeline",
            "start",
            &format!("Starting pipeline for {}", input_path.display()),
            None,
        );

        info!(input = %input_path.display(), "Stage 1/3: data cleaning");
        let cleaning_report = cleaning::run(
            self.provider.clone(),
            &self.settings,
            input_path,
            self.audit.clone(),
        )
        .await?;

        info!(
            input = %cleaning_report.output_file,
            "Stage 2/3: feature engineering"
        );
        let engineering_report = engineering::run(
            self.provider.clone(),
            &self.settings,
            &cleaning_report,
            self.audit.clone(),
        )
        .await?;

        info!(
            input = %engineering_report.output_file,
            target = %engineering_report.target_column,
            "Stage 3/3: model training"
        );
        let runner = ScriptRunner::new(self.sandbox_interpreter.clone(), self.sandbox_timeout);
        let training_report = training::run(
            self.provider.clone(),
            &self.settings,
            &engineering_report,
            runner,
            self.audit.clone(),
        )
        .await?;

        let final_report = FinalReport::new(cleaning_report, engineering_report, training_report);
        let md_path = final_report_md_path(&self.settings.data_dir);
        std::fs::write(&md_path, final_report.to_markdown())?;
        report::save_json(&final_report, &final_report_json_path(&self.settings.data_dir))?;

        self.audit.record(
            "pipeline",
            "finish",
            &format!("Final report written to {}", md_path.display()),
            None,
        );
        info!(report = %md_path.display(), "Pipeline complete");
        Ok(final_report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use tabforge_core::error::ProviderError;
    use tabforge_core::message::MessageToolCall;
    use tabforge_core::provider::ProviderResponse;

    fn call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.data_dir = dir.to_path_buf();
        // Tests exercise the sandbox with shell scripts.
        config.sandbox.interpreter = "sh".into();
        config.sandbox.timeout_secs = 10;
        config
    }

    fn write_input(dir: &Path) -> PathBuf {
        let mut csv = String::from("area,rooms,price\n");
        for i in 0..20 {
            csv.push_str(&format!("{},{},{}\n", 50 + i * 5, 1 + i % 4, 60000 + i * 4000));
        }
        let path = dir.join("input.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    /// A full scripted run: each stage finalizes explicitly.
    fn scripted_happy_path(
        dir: &Path,
        input: &Path,
    ) -> Vec<Result<ProviderResponse, ProviderError>> {
        let clean_out = dir.join("clean_data.csv").display().to_string();
        let eng_out = dir.join("engineered_data.csv").display().to_string();
        vec![
            // Cleaning stage.
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "inspect_metadata",
                serde_json::json!({"dataset_path": input.display().to_string()}),
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "finalize_cleaning",
                serde_json::json!({
                    "output_path": clean_out,
                    "summary": "No issues found."
                }),
            )])),
            // Target inference.
            Ok(ScriptedProvider::json_turn(serde_json::json!({
                "target_column": "price",
                "task_type": "regression"
            }))),
            // Engineering stage.
            Ok(ScriptedProvider::tool_turn(vec![call(
                "e1",
                "finalize_engineering",
                serde_json::json!({
                    "output_path": eng_out,
                    "summary": "Dataset used as-is."
                }),
            )])),
            // Training stage.
            Ok(ScriptedProvider::tool_turn(vec![call(
                "t1",
                "execute_python_code",
                serde_json::json!({
                    "code": "echo 'RMSE: 900.0'",
                    "description": "Baseline"
                }),
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "t2",
                "finalize_training",
                serde_json::json!({
                    "final_summary": "Baseline sufficed.",
                    "best_metrics": {"rmse": 900.0}
                }),
            )])),
        ]
    }

    #[tokio::test]
    async fn full_pipeline_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        let provider = ScriptedProvider::new(scripted_happy_path(dir.path(), &input));

        let pipeline = Pipeline::new(
            Arc::new(provider),
            &config(dir.path()),
            AuditLog::disabled(),
        );
        let report = pipeline.run(&input).await.unwrap();

        assert_eq!(report.cleaning.original_shape, (20, 3));
        assert_eq!(report.engineering.target_column, "price");
        assert_eq!(report.training.best_metrics["rmse"], 900.0);

        // Stage reports chain: engineering reads what cleaning wrote.
        assert_eq!(
            report.engineering.input_shape,
            report.cleaning.cleaned_shape
        );
        assert_eq!(report.training.input_file, report.engineering.output_file);

        for artifact in [
            "clean_data.csv",
            "engineered_data.csv",
            "cleaning_report.json",
            "engineering_report.json",
            "training_report.json",
            "final_report.md",
            "final_report.json",
        ] {
            assert!(
                dir.path().join(artifact).exists(),
                "missing artifact {artifact}"
            );
        }

        let md = std::fs::read_to_string(dir.path().join("final_report.md")).unwrap();
        assert!(md.contains("## 1. Data Cleaning"));
        assert!(md.contains("## 3. Model Training"));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![]);
        let pipeline = Pipeline::new(
            Arc::new(provider),
            &config(dir.path()),
            AuditLog::disabled(),
        );

        let err = pipeline.run(Path::new("/nonexistent/input.csv")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::StageEntry { .. })
        ));
    }

    #[tokio::test]
    async fn stage_without_report_aborts_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path());
        // The cleaning agent stops without ever loading the dataset, so
        // even auto-finalization cannot produce a report.
        let provider = ScriptedProvider::new(vec![Ok(ScriptedProvider::text_turn(
            "I cannot help with that.",
        ))]);

        let pipeline = Pipeline::new(
            Arc::new(provider),
            &config(dir.path()),
            AuditLog::disabled(),
        );
        let err = pipeline.run(&input).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::MissingReport { .. })
        ));
        // Nothing downstream ran.
        assert!(!dir.path().join("engineering_report.json").exists());
        assert!(!dir.path().join("final_report.md").exists());
    }
}
