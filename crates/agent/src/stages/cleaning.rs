//! The data cleaning stage.
//!
//! The agent inspects the raw CSV, fixes quality issues column by column
//! (imputation, dtype conversion, dropping useless columns), and
//! finalizes by writing the cleaned CSV plus a cleaning report.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabforge_core::error::{Error, PipelineError, ToolError};
use tabforge_core::message::{Conversation, Message};
use tabforge_core::provider::Provider;
use tabforge_core::report::{self, CleaningReport, Shape};
use tabforge_core::tool::{Tool, ToolRegistry};
use tabforge_dataset::frame::{DType, DataFrame, ImputeStrategy};
use tabforge_dataset::{read_csv, write_csv};
use tracing::info;

use crate::audit::AuditLog;
use crate::loop_runner::{Finalization, StageLoop};
use crate::stages::{cleaning_report_path, StageSettings};

/// Working state for the cleaning agent.
pub struct CleaningContext {
    /// The frame under repair; loaded by `inspect_metadata`.
    pub frame: Option<DataFrame>,
    pub original_shape: Option<Shape>,
    pub report_path: PathBuf,
    /// Where the cleaned CSV goes unless the model picks another path.
    pub default_output: PathBuf,
    pub report: Option<CleaningReport>,
}

impl CleaningContext {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            frame: None,
            original_shape: None,
            report_path: cleaning_report_path(data_dir),
            default_output: data_dir.join("clean_data.csv"),
            report: None,
        }
    }

    fn frame_mut(&mut self) -> Result<&mut DataFrame, ToolError> {
        self.frame.as_mut().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: String::new(),
            reason: "Dataset not loaded. Call inspect_metadata first.".into(),
        })
    }

    fn frame_ref(&self) -> Result<&DataFrame, ToolError> {
        self.frame.as_ref().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: String::new(),
            reason: "Dataset not loaded. Call inspect_metadata first.".into(),
        })
    }
}

fn str_arg(arguments: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    arguments[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}'")))
}

struct InspectMetadata;

#[async_trait]
impl Tool<CleaningContext> for InspectMetadata {
    fn name(&self) -> &str {
        "inspect_metadata"
    }
    fn description(&self) -> &str {
        "Inspect the dataset metadata: shape, column names, data types, and null counts. \
         Use this first to understand the dataset structure."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "dataset_path": {
                    "type": "string",
                    "description": "Path to the CSV file to inspect"
                }
            },
            "required": ["dataset_path"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let path = str_arg(&arguments, "dataset_path")?;
        let frame = read_csv(Path::new(&path)).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })?;

        let (rows, cols) = frame.shape();
        // First load anchors the original shape for the report.
        if ctx.original_shape.is_none() {
            ctx.original_shape = Some((rows, cols));
        }

        let dtypes: serde_json::Map<String, serde_json::Value> = frame
            .names()
            .iter()
            .map(|n| {
                let d = frame.dtype(n).map(|d| d.to_string()).unwrap_or_default();
                (n.clone(), serde_json::Value::String(d))
            })
            .collect();
        let null_counts: serde_json::Map<String, serde_json::Value> = frame
            .null_counts()
            .into_iter()
            .map(|(n, c)| (n, serde_json::json!(c)))
            .collect();
        let null_percentages: serde_json::Map<String, serde_json::Value> = frame
            .null_counts()
            .into_iter()
            .map(|(n, c)| {
                let pct = (c as f64 * 10000.0 / rows.max(1) as f64).round() / 100.0;
                (n, serde_json::json!(pct))
            })
            .collect();

        let info = serde_json::json!({
            "shape": format!("{rows} rows x {cols} columns"),
            "columns": frame.names(),
            "dtypes": dtypes,
            "null_counts": null_counts,
            "null_percentages": null_percentages,
        });

        ctx.frame = Some(frame);
        serde_json::to_string_pretty(&info).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}

struct GetColumnStats;

#[async_trait]
impl Tool<CleaningContext> for GetColumnStats {
    fn name(&self) -> &str {
        "get_column_stats"
    }
    fn description(&self) -> &str {
        "Get detailed statistics for a specific column: nulls, uniques, numeric summary or \
         top values. Use this to understand individual columns better."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "column_name": {
                    "type": "string",
                    "description": "Name of the column to analyze"
                }
            },
            "required": ["column_name"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let column = str_arg(&arguments, "column_name")?;
        let frame = ctx.frame_ref()?;
        let stats = frame
            .column_stats(&column)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;
        serde_json::to_string_pretty(&stats).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}

struct ImputeMissing;

#[async_trait]
impl Tool<CleaningContext> for ImputeMissing {
    fn name(&self) -> &str {
        "impute_missing"
    }
    fn description(&self) -> &str {
        "Fill missing values in a column using the given strategy. Choose the strategy based \
         on data type and distribution: mean/median for numeric, mode for categorical, \
         constant for a fixed value."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "column_name": {
                    "type": "string",
                    "description": "Name of the column to impute"
                },
                "strategy": {
                    "type": "string",
                    "enum": ["mean", "median", "mode", "constant"],
                    "description": "Imputation strategy"
                },
                "fill_value": {
                    "type": "string",
                    "description": "Value to use when strategy is \"constant\""
                }
            },
            "required": ["column_name", "strategy"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let column = str_arg(&arguments, "column_name")?;
        let strategy_name = str_arg(&arguments, "strategy")?;
        let fill_value = arguments["fill_value"].as_str();
        let strategy = ImputeStrategy::parse(&strategy_name, fill_value)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let frame = ctx.frame_mut()?;
        let missing_before = frame
            .null_count(&column)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "impute_missing".into(),
                reason: e.to_string(),
            })?;
        if missing_before == 0 {
            return Ok(format!("No missing values in column \"{column}\""));
        }

        let filled = frame
            .impute(&column, strategy)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "impute_missing".into(),
                reason: e.to_string(),
            })?;
        Ok(format!(
            "Imputed {filled} missing values in \"{column}\" using {strategy_name} strategy"
        ))
    }
}

struct DropColumn;

#[async_trait]
impl Tool<CleaningContext> for DropColumn {
    fn name(&self) -> &str {
        "drop_column"
    }
    fn description(&self) -> &str {
        "Remove a column from the dataset. Use this for columns that will not help modeling \
         (IDs, duplicates, mostly-null columns)."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "column_name": {
                    "type": "string",
                    "description": "Name of the column to drop"
                },
                "reason": {
                    "type": "string",
                    "description": "Reason for dropping the column"
                }
            },
            "required": ["column_name", "reason"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let column = str_arg(&arguments, "column_name")?;
        let reason = str_arg(&arguments, "reason")?;
        ctx.frame_mut()?
            .drop_column(&column)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "drop_column".into(),
                reason: e.to_string(),
            })?;
        Ok(format!("Dropped column \"{column}\". Reason: {reason}"))
    }
}

struct ConvertDtype;

#[async_trait]
impl Tool<CleaningContext> for ConvertDtype {
    fn name(&self) -> &str {
        "convert_dtype"
    }
    fn description(&self) -> &str {
        "Convert a column to a different data type. Cells that cannot be converted become null."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "column_name": {
                    "type": "string",
                    "description": "Name of the column to convert"
                },
                "target_dtype": {
                    "type": "string",
                    "enum": ["int", "float", "string", "datetime", "category"],
                    "description": "Target data type"
                }
            },
            "required": ["column_name", "target_dtype"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let column = str_arg(&arguments, "column_name")?;
        let dtype_name = str_arg(&arguments, "target_dtype")?;
        let target = match dtype_name.as_str() {
            "int" => DType::Int,
            "float" => DType::Float,
            "string" => DType::Str,
            "datetime" => DType::Datetime,
            "category" => DType::Category,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unknown target_dtype '{other}'"
                )))
            }
        };
        ctx.frame_mut()?
            .convert(&column, target)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "convert_dtype".into(),
                reason: e.to_string(),
            })?;
        Ok(format!("Converted column \"{column}\" to {dtype_name}"))
    }
}

struct FinalizeCleaning;

#[async_trait]
impl Tool<CleaningContext> for FinalizeCleaning {
    fn name(&self) -> &str {
        "finalize_cleaning"
    }
    fn description(&self) -> &str {
        "Save the cleaned dataset and write the cleaning report. Call this when you are \
         satisfied with the data quality."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "output_path": {
                    "type": "string",
                    "description": "Path where the cleaned CSV is saved"
                },
                "summary": {
                    "type": "string",
                    "description": "A comprehensive summary of all cleaning actions and reasoning"
                }
            },
            "required": ["output_path", "summary"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut CleaningContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let output_path = str_arg(&arguments, "output_path")?;
        let summary = str_arg(&arguments, "summary")?;

        let original_shape = ctx.original_shape.ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "finalize_cleaning".into(),
            reason: "Dataset was never inspected; nothing to finalize.".into(),
        })?;
        let frame = ctx.frame_ref()?;

        write_csv(frame, Path::new(&output_path)).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "finalize_cleaning".into(),
            reason: format!("Could not save cleaned dataset: {e}"),
        })?;

        let report = CleaningReport {
            original_shape,
            cleaned_shape: frame.shape(),
            summary,
            output_file: output_path.clone(),
            auto_finalized: false,
        };
        report::save_json(&report, &ctx.report_path).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "finalize_cleaning".into(),
            reason: format!("Could not write cleaning report: {e}"),
        })?;
        let report_path = ctx.report_path.display().to_string();
        ctx.report = Some(report);

        Ok(format!(
            "Cleaning completed. Saved to {output_path}. Report saved to {report_path}"
        ))
    }
}

pub fn registry() -> ToolRegistry<CleaningContext> {
    let mut r = ToolRegistry::new();
    r.register(Box::new(InspectMetadata));
    r.register(Box::new(GetColumnStats));
    r.register(Box::new(ImputeMissing));
    r.register(Box::new(DropColumn));
    r.register(Box::new(ConvertDtype));
    r.register(Box::new(FinalizeCleaning));
    r
}

fn system_prompt() -> String {
    "You are an expert data auditor and cleaner. Your mission is to ensure data quality.\n\
     \n\
     Your responsibilities:\n\
     1. Inspect the dataset thoroughly using the available tools\n\
     2. Identify and fix data quality issues:\n\
        - Missing values (decide the best imputation strategy per column)\n\
        - Wrong data types (convert as needed)\n\
        - Useless columns (IDs, near-unique strings, mostly-null columns)\n\
     3. Make decisions based on the data, not hardcoded rules\n\
     4. Document every action and its reasoning\n\
     \n\
     Process:\n\
     1. Start with inspect_metadata to understand the dataset\n\
     2. Use get_column_stats for columns that need investigation\n\
     3. Apply cleaning operations (impute, drop, convert) as needed\n\
     4. When satisfied, call finalize_cleaning with a comprehensive summary\n\
     \n\
     Be thorough but efficient."
        .into()
}

fn user_prompt(input_path: &Path, output_path: &Path) -> String {
    format!(
        "Please clean the dataset located at: {}\n\
         \n\
         Analyze the data carefully and apply appropriate cleaning operations. \
         Save the output to: {}\n\
         \n\
         Remember:\n\
         - Examine all columns and their characteristics\n\
         - Make intelligent decisions about handling missing values\n\
         - Remove columns that will not help in modeling\n\
         - Ensure data types are correct\n\
         - Provide clear reasoning for every action",
        input_path.display(),
        output_path.display(),
    )
}

/// Run the cleaning stage to completion and return its report.
pub async fn run(
    provider: Arc<dyn Provider>,
    settings: &StageSettings,
    input_path: &Path,
    audit: AuditLog,
) -> Result<CleaningReport, Error> {
    let mut ctx = CleaningContext::new(&settings.data_dir);
    let default_output = ctx.default_output.clone();
    let report_path = ctx.report_path.clone();

    let stage = StageLoop::new(
        provider,
        settings.model.clone(),
        settings.temperature,
        registry(),
        "cleaning",
        "finalize_cleaning",
        Box::new(move |_ctx: &CleaningContext| {
            serde_json::json!({
                "output_path": default_output.display().to_string(),
                "summary": "Cleaning ended without an explicit finalize call. \
                            Saving the dataset in its current state.",
            })
        }),
        audit.clone(),
    )
    .with_max_iterations(settings.max_iterations);

    let mut conversation = Conversation::new();
    conversation.push(Message::system(system_prompt()));
    conversation.push(Message::user(user_prompt(input_path, &ctx.default_output)));

    audit.record("cleaning", "start", "Starting data cleaning", None);
    let run = stage.run(&mut ctx, &mut conversation).await;
    info!(iterations = run.iterations, finalization = ?run.finalization, "Cleaning stage finished");

    if run.finalization == Finalization::Auto {
        if let Some(report) = ctx.report.as_mut() {
            report.auto_finalized = true;
            report::save_json(report, &report_path)?;
        }
    }

    let report = ctx.report.ok_or_else(|| {
        Error::Pipeline(PipelineError::MissingReport {
            stage: "cleaning".into(),
            path: report_path.display().to_string(),
        })
    })?;
    audit.record("cleaning", "finish", "Cleaning completed", None);
    Ok(report)
}
