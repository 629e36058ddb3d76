//! The model training stage.
//!
//! The agent writes complete training scripts that the sandbox runs as
//! subprocesses. Script failures come back as error tool-results so the
//! agent can read the traceback and iterate. This is the one stage where
//! every assistant turn must carry a tool call; a turn of plain prose
//! draws a corrective note instead of ending the loop.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use tabforge_core::error::{Error, PipelineError, ToolError};
use tabforge_core::message::{Conversation, Message};
use tabforge_core::provider::Provider;
use tabforge_core::report::{self, EngineeringReport, TrainingIteration, TrainingReport};
use tabforge_core::tool::{Tool, ToolRegistry};
use tracing::info;

use crate::audit::AuditLog;
use crate::loop_runner::{Finalization, StageLoop};
use crate::sandbox::{ScriptOutcome, ScriptRunner};
use crate::stages::{training_report_path, StageSettings};

/// Working state for the training agent.
pub struct TrainingContext {
    pub runner: ScriptRunner,
    pub engineering: EngineeringReport,
    pub iterations: Vec<TrainingIteration>,
    pub report_path: PathBuf,
    pub report: Option<TrainingReport>,
}

fn str_arg(arguments: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    arguments[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}'")))
}

struct ExecutePythonCode;

#[async_trait]
impl Tool<TrainingContext> for ExecutePythonCode {
    fn name(&self) -> &str {
        "execute_python_code"
    }
    fn description(&self) -> &str {
        "Execute a complete, standalone Python script in a sandbox and return its output. \
         The script must load the dataset itself and print the metrics it computes."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The full Python script to run"
                },
                "description": {
                    "type": "string",
                    "description": "What this script attempts, in one sentence"
                }
            },
            "required": ["code", "description"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut TrainingContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let code = str_arg(&arguments, "code")?;
        let description = str_arg(&arguments, "description")?;

        let outcome = ctx.runner.run(&code).await.map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Could not start the script: {e}"),
            }
        })?;

        match outcome {
            ScriptOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                ctx.iterations.push(TrainingIteration {
                    description,
                    exit_code,
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                });
                if exit_code == 0 {
                    Ok(format!("{stdout}\n{stderr}"))
                } else {
                    Err(ToolError::ScriptFailed { exit_code, stderr })
                }
            }
            ScriptOutcome::TimedOut { limit_secs } => {
                ctx.iterations.push(TrainingIteration {
                    description,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("Killed after exceeding the {limit_secs}s time limit"),
                });
                Err(ToolError::ScriptTimeout {
                    timeout_secs: limit_secs,
                })
            }
        }
    }
}

struct FinalizeTraining;

#[async_trait]
impl Tool<TrainingContext> for FinalizeTraining {
    fn name(&self) -> &str {
        "finalize_training"
    }
    fn description(&self) -> &str {
        "Record the best model and its metrics and end the training stage. Call this once a \
         satisfactory model has been trained and evaluated."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "final_summary": {
                    "type": "string",
                    "description": "What was tried, what worked, and what the final model is"
                },
                "best_metrics": {
                    "type": "object",
                    "description": "The evaluation metrics of the best model"
                }
            },
            "required": ["final_summary", "best_metrics"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut TrainingContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let summary = str_arg(&arguments, "final_summary")?;
        let best_metrics = arguments
            .get("best_metrics")
            .cloned()
            .filter(|v| v.is_object())
            .ok_or_else(|| {
                ToolError::InvalidArguments("Missing 'best_metrics' object".into())
            })?;

        let report = TrainingReport {
            input_file: ctx.engineering.output_file.clone(),
            target_column: ctx.engineering.target_column.clone(),
            task_type: ctx.engineering.task_type,
            best_metrics,
            total_iterations: ctx.iterations.len(),
            iterations: ctx.iterations.clone(),
            summary,
            auto_finalized: false,
        };
        report::save_json(&report, &ctx.report_path).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Could not write report: {e}"),
            }
        })?;
        let report_path = ctx.report_path.display().to_string();
        let total = report.total_iterations;
        ctx.report = Some(report);

        Ok(format!(
            "Training completed after {total} script runs. Report saved to {report_path}"
        ))
    }
}

pub fn registry() -> ToolRegistry<TrainingContext> {
    let mut r = ToolRegistry::new();
    r.register(Box::new(ExecutePythonCode));
    r.register(Box::new(FinalizeTraining));
    r
}

fn system_prompt() -> String {
    "You are an expert ML engineer. You train models by writing complete Python scripts \
     that run in an isolated sandbox.\n\
     \n\
     Rules:\n\
     1. Every script must be complete and standalone: import everything, load the CSV, \
        split, train, evaluate, and print the metrics. No state carries over between runs.\n\
     2. Use xgboost: XGBClassifier for classification, XGBRegressor for regression.\n\
     3. Split with train_test_split(test_size=0.2, random_state=42).\n\
     4. For classification report Accuracy, Precision, Recall and F1. For regression \
        report RMSE, MAE and R2.\n\
     5. Iterate: read errors and metrics, adjust hyperparameters, and try again when a \
        run suggests room for improvement.\n\
     6. When the model is good enough, call finalize_training with the best metrics.\n\
     \n\
     Respond only with tool calls."
        .into()
}

fn user_prompt(engineering: &EngineeringReport) -> String {
    format!(
        "Train a {} model.\n\
         \n\
         Dataset: {}\n\
         Target column: {}\n\
         Feature columns: {}\n\
         \n\
         Start by training a baseline model and printing its metrics, then improve on it. \
         Call finalize_training when you are satisfied.",
        engineering.task_type,
        engineering.output_file,
        engineering.target_column,
        engineering
            .final_features
            .iter()
            .filter(|f| **f != engineering.target_column)
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Run the training stage to completion and return its report.
pub async fn run(
    provider: Arc<dyn Provider>,
    settings: &StageSettings,
    engineering: &EngineeringReport,
    runner: ScriptRunner,
    audit: AuditLog,
) -> Result<TrainingReport, Error> {
    let mut ctx = TrainingContext {
        runner,
        engineering: engineering.clone(),
        iterations: Vec::new(),
        report_path: training_report_path(&settings.data_dir),
        report: None,
    };
    let report_path = ctx.report_path.clone();

    let stage = StageLoop::new(
        provider,
        settings.model.clone(),
        settings.temperature,
        registry(),
        "training",
        "finalize_training",
        Box::new(|_ctx: &TrainingContext| {
            serde_json::json!({
                "final_summary": "Training ended without an explicit finalize_training call. \
                                  Recording the iterations that ran.",
                "best_metrics": { "note": "No metrics were reported." },
            })
        }),
        audit.clone(),
    )
    .with_max_iterations(settings.max_iterations)
    .with_required_tool_call(true);

    let mut conversation = Conversation::new();
    conversation.push(Message::system(system_prompt()));
    conversation.push(Message::user(user_prompt(engineering)));

    audit.record("training", "start", "Starting model training", None);
    let run = stage.run(&mut ctx, &mut conversation).await;
    info!(
        iterations = run.iterations,
        scripts = ctx.iterations.len(),
        finalization = ?run.finalization,
        "Training stage finished"
    );

    if run.finalization == Finalization::Auto {
        if let Some(report) = ctx.report.as_mut() {
            report.auto_finalized = true;
            report::save_json(report, &report_path)?;
        }
    }

    let report = ctx.report.ok_or_else(|| {
        Error::Pipeline(PipelineError::MissingReport {
            stage: "training".into(),
            path: report_path.display().to_string(),
        })
    })?;
    audit.record("training", "finish", "Model training completed", None);
    Ok(report)
}
