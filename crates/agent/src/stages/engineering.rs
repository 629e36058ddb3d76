//! The feature engineering stage.
//!
//! Before the loop starts, the target column and task type are inferred
//! once with a structured-output completion; the target is moved to the
//! last position and stays there. The agent then creates interaction
//! features, encodes categoricals, ranks features against the target,
//! and finalizes by writing the engineered CSV plus a report.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabforge_core::error::{Error, PipelineError, ProviderError, ToolError};
use tabforge_core::message::{Conversation, Message};
use tabforge_core::provider::{Provider, ProviderRequest, ResponseSchema};
use tabforge_core::report::{
    self, CleaningReport, EngineeringReport, FeatureRecord, Shape, TaskType,
};
use tabforge_core::tool::{Tool, ToolRegistry};
use tabforge_dataset::frame::DataFrame;
use tabforge_dataset::{expr, read_csv, write_csv};
use tracing::info;

use crate::audit::AuditLog;
use crate::loop_runner::{Finalization, StageLoop};
use crate::stages::{engineering_report_path, StageSettings};

/// The inferred prediction target.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub column: String,
    pub task_type: TaskType,
}

/// Working state for the feature engineering agent.
pub struct EngineeringContext {
    pub frame: DataFrame,
    pub input_shape: Shape,
    pub target: TargetInfo,
    pub features_log: Vec<FeatureRecord>,
    pub report_path: PathBuf,
    pub default_output: PathBuf,
    pub report: Option<EngineeringReport>,
}

fn str_arg(arguments: &serde_json::Value, key: &str) -> Result<String, ToolError> {
    arguments[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}'")))
}

fn exec_err(tool: &str, reason: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: reason.to_string(),
    }
}

struct CreateInteraction;

#[async_trait]
impl Tool<EngineeringContext> for CreateInteraction {
    fn name(&self) -> &str {
        "create_interaction"
    }
    fn description(&self) -> &str {
        "Create a new feature from an arithmetic expression over existing numeric columns, \
         e.g. 'area / rooms' or '(height * width) + 1'. Supports +, -, *, /, parentheses, \
         and numeric constants."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "new_column_name": {
                    "type": "string",
                    "description": "Name for the new feature column"
                },
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression over existing column names"
                },
                "reasoning": {
                    "type": "string",
                    "description": "Why this feature should help prediction"
                }
            },
            "required": ["new_column_name", "expression", "reasoning"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut EngineeringContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let name = str_arg(&arguments, "new_column_name")?;
        let expression = str_arg(&arguments, "expression")?;
        let reasoning = str_arg(&arguments, "reasoning")?;

        let values = expr::evaluate(&ctx.frame, &expression).map_err(|e| {
            exec_err(
                self.name(),
                format!("{e}. Check your expression syntax and column names."),
            )
        })?;
        let nulls = values.iter().filter(|v| v.is_none()).count();
        ctx.frame
            .add_float_column(&name, values)
            .map_err(|e| exec_err(self.name(), e))?;
        // Keep the target last.
        ctx.frame
            .move_to_end(&ctx.target.column)
            .map_err(|e| exec_err(self.name(), e))?;

        ctx.features_log.push(FeatureRecord {
            feature: name.clone(),
            expression: expression.clone(),
            reasoning,
        });

        let rows = ctx.frame.n_rows().max(1);
        let mean = ctx.frame.mean(&name).map_err(|e| exec_err(self.name(), e))?;
        let std = ctx.frame.std(&name).map_err(|e| exec_err(self.name(), e))?;
        let stats = serde_json::json!({
            "created": name,
            "expression": expression,
            "null_count": nulls,
            "null_percentage": format!("{:.2}%", nulls as f64 * 100.0 / rows as f64),
            "mean": mean,
            "std": std,
        });
        serde_json::to_string_pretty(&stats).map_err(|e| exec_err(self.name(), e))
    }
}

struct EncodeCategorical;

#[async_trait]
impl Tool<EngineeringContext> for EncodeCategorical {
    fn name(&self) -> &str {
        "encode_categorical"
    }
    fn description(&self) -> &str {
        "Encode a categorical column. Use one-hot encoding for low cardinality and label \
         encoding for higher cardinality."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "column_name": {
                    "type": "string",
                    "description": "Name of the column to encode"
                },
                "encoding_type": {
                    "type": "string",
                    "enum": ["onehot", "label"],
                    "description": "Encoding to apply"
                }
            },
            "required": ["column_name", "encoding_type"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut EngineeringContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let column = str_arg(&arguments, "column_name")?;
        let encoding = str_arg(&arguments, "encoding_type")?;
        if column == ctx.target.column {
            return Err(exec_err(
                self.name(),
                "Refusing to encode the target column.",
            ));
        }
        let original_shape = ctx.frame.shape();

        let result = match encoding.as_str() {
            "onehot" => {
                let created = ctx
                    .frame
                    .one_hot_encode(&column)
                    .map_err(|e| exec_err(self.name(), e))?;
                ctx.frame
                    .move_to_end(&ctx.target.column)
                    .map_err(|e| exec_err(self.name(), e))?;
                serde_json::json!({
                    "encoding_type": "one-hot",
                    "original_column": column,
                    "columns_created": created.len(),
                    "new_columns": created,
                    "original_shape": original_shape,
                    "new_shape": ctx.frame.shape(),
                })
            }
            "label" => {
                let levels = ctx
                    .frame
                    .label_encode(&column)
                    .map_err(|e| exec_err(self.name(), e))?;
                serde_json::json!({
                    "encoding_type": "label",
                    "column": column,
                    "encoded_values": format!("0 to {}", levels.saturating_sub(1)),
                    "levels": levels,
                })
            }
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Unknown encoding_type '{other}'"
                )))
            }
        };
        serde_json::to_string_pretty(&result).map_err(|e| exec_err(self.name(), e))
    }
}

struct CorrelationAnalysis;

#[async_trait]
impl Tool<EngineeringContext> for CorrelationAnalysis {
    fn name(&self) -> &str {
        "correlation_analysis"
    }
    fn description(&self) -> &str {
        "Rank the numeric features by the strength of their correlation with the target. \
         Encode categorical features first if none are numeric."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(
        &self,
        ctx: &mut EngineeringContext,
        _arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let ranking = ctx
            .frame
            .correlation_ranking(&ctx.target.column)
            .map_err(|e| exec_err(self.name(), e))?;

        let scores: Vec<f64> = ranking.iter().map(|(_, s)| *s).collect();
        let top: serde_json::Map<String, serde_json::Value> = ranking
            .iter()
            .take(10)
            .map(|(n, s)| (n.clone(), serde_json::json!(s)))
            .collect();
        let bottom: serde_json::Map<String, serde_json::Value> = ranking
            .iter()
            .rev()
            .take(5)
            .map(|(n, s)| (n.clone(), serde_json::json!(s)))
            .collect();

        let result = serde_json::json!({
            "task_type": ctx.target.task_type,
            "target_column": ctx.target.column,
            "total_features_analyzed": ranking.len(),
            "top_10_features": top,
            "bottom_5_features": bottom,
            "mean_score": scores.iter().sum::<f64>() / scores.len().max(1) as f64,
            "max_score": scores.first().copied().unwrap_or(0.0),
            "min_score": scores.last().copied().unwrap_or(0.0),
        });
        serde_json::to_string_pretty(&result).map_err(|e| exec_err(self.name(), e))
    }
}

struct SelectTopFeatures;

#[async_trait]
impl Tool<EngineeringContext> for SelectTopFeatures {
    fn name(&self) -> &str {
        "select_top_features"
    }
    fn description(&self) -> &str {
        "Keep only the k features most correlated with the target (plus the target itself)."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "k": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "How many features to keep"
                }
            },
            "required": ["k"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut EngineeringContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let k = arguments["k"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'k'".into()))?
            as usize;
        if k == 0 {
            return Err(ToolError::InvalidArguments("'k' must be at least 1".into()));
        }

        let ranking = ctx
            .frame
            .correlation_ranking(&ctx.target.column)
            .map_err(|e| exec_err(self.name(), e))?;
        if ranking.len() <= k {
            return Ok(format!(
                "Already have {} numeric features, which is <= {k}. No selection needed.",
                ranking.len()
            ));
        }

        let selected: Vec<String> = ranking.iter().take(k).map(|(n, _)| n.clone()).collect();
        let dropped: Vec<String> = ranking.iter().skip(k).map(|(n, _)| n.clone()).collect();

        let mut keep = selected.clone();
        keep.push(ctx.target.column.clone());
        ctx.frame
            .select_columns(&keep)
            .map_err(|e| exec_err(self.name(), e))?;

        let scores: serde_json::Map<String, serde_json::Value> = ranking
            .iter()
            .take(k)
            .map(|(n, s)| (n.clone(), serde_json::json!(s)))
            .collect();
        let result = serde_json::json!({
            "k": k,
            "selected_features": selected,
            "dropped_features": dropped.iter().take(10).collect::<Vec<_>>(),
            "dropped_count": dropped.len(),
            "new_shape": ctx.frame.shape(),
            "feature_scores": scores,
        });
        serde_json::to_string_pretty(&result).map_err(|e| exec_err(self.name(), e))
    }
}

struct FinalizeEngineering;

#[async_trait]
impl Tool<EngineeringContext> for FinalizeEngineering {
    fn name(&self) -> &str {
        "finalize_engineering"
    }
    fn description(&self) -> &str {
        "Save the engineered dataset and write the engineering report. Call this when the \
         feature set is ready for training."
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "output_path": {
                    "type": "string",
                    "description": "Path where the engineered CSV is saved"
                },
                "summary": {
                    "type": "string",
                    "description": "A summary of the engineering decisions and reasoning"
                }
            },
            "required": ["output_path", "summary"]
        })
    }
    async fn execute(
        &self,
        ctx: &mut EngineeringContext,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        let output_path = str_arg(&arguments, "output_path")?;
        let summary = str_arg(&arguments, "summary")?;

        write_csv(&ctx.frame, Path::new(&output_path))
            .map_err(|e| exec_err(self.name(), format!("Could not save dataset: {e}")))?;

        let report = EngineeringReport {
            input_shape: ctx.input_shape,
            output_shape: ctx.frame.shape(),
            target_column: ctx.target.column.clone(),
            task_type: ctx.target.task_type,
            features_created: ctx.features_log.len(),
            feature_creation_details: ctx.features_log.clone(),
            final_features: ctx.frame.names().to_vec(),
            summary,
            output_file: output_path.clone(),
            auto_finalized: false,
        };
        report::save_json(&report, &ctx.report_path)
            .map_err(|e| exec_err(self.name(), format!("Could not write report: {e}")))?;
        let (rows, cols) = ctx.frame.shape();
        let report_path = ctx.report_path.display().to_string();
        ctx.report = Some(report);

        Ok(format!(
            "Feature engineering completed. Saved {rows} rows x {cols} columns to \
             {output_path}. Report saved to {report_path}"
        ))
    }
}

pub fn registry() -> ToolRegistry<EngineeringContext> {
    let mut r = ToolRegistry::new();
    r.register(Box::new(CreateInteraction));
    r.register(Box::new(EncodeCategorical));
    r.register(Box::new(CorrelationAnalysis));
    r.register(Box::new(SelectTopFeatures));
    r.register(Box::new(FinalizeEngineering));
    r
}

/// Ask the provider which column is the target and what kind of problem
/// this is, constrained to a JSON schema.
pub async fn infer_target(
    provider: &dyn Provider,
    model: &str,
    frame: &DataFrame,
) -> Result<TargetInfo, Error> {
    let mut columns_info = serde_json::Map::new();
    for name in frame.names() {
        let stats = frame
            .column_stats(name)
            .map_err(|e| Error::Internal(e.to_string()))?;
        columns_info.insert(
            name.clone(),
            serde_json::json!({
                "dtype": stats.dtype,
                "unique_count": stats.unique_count,
                "sample_values": stats.sample_values,
            }),
        );
    }

    let prompt = serde_json::json!({
        "instruction": "Identify the correct target column and the machine learning task type",
        "rules": "Return a JSON object with fields target_column and task_type. \
                  Allowed task types are classification and regression. \
                  If the target represents categories use classification; \
                  if it is continuous use regression. \
                  Think about the meaning of the column and its values. \
                  Never return placeholders.",
        "columns": columns_info,
    });

    let request = ProviderRequest {
        model: model.to_string(),
        messages: vec![
            Message::system(
                "You analyze dataset columns and decide the true target column and task \
                 type. Always return valid JSON only.",
            ),
            Message::user(prompt.to_string()),
        ],
        temperature: 0.0,
        tools: vec![],
        response_schema: Some(ResponseSchema {
            name: "target_info_schema".into(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target_column": { "type": "string" },
                    "task_type": { "type": "string", "enum": ["classification", "regression"] }
                },
                "required": ["target_column", "task_type"],
                "additionalProperties": false
            }),
        }),
    };

    let response = provider.complete(request).await.map_err(Error::Provider)?;
    let raw = response.message.content;
    let parsed: serde_json::Value = serde_json::from_str(&raw).map_err(|_| {
        Error::Provider(ProviderError::MalformedResponse(format!(
            "Target inference returned invalid JSON: {raw}"
        )))
    })?;

    let column = parsed["target_column"]
        .as_str()
        .ok_or_else(|| {
            Error::Provider(ProviderError::MalformedResponse(
                "Target inference omitted target_column".into(),
            ))
        })?
        .to_string();
    let task_type = match parsed["task_type"].as_str() {
        Some("classification") => TaskType::Classification,
        Some("regression") => TaskType::Regression,
        other => {
            return Err(Error::Provider(ProviderError::MalformedResponse(format!(
                "Target inference returned unknown task_type: {other:?}"
            ))))
        }
    };

    if !frame.has_column(&column) {
        return Err(Error::Pipeline(PipelineError::StageEntry {
            stage: "engineering".into(),
            reason: format!("Inferred target '{column}' is not a dataset column"),
        }));
    }

    Ok(TargetInfo { column, task_type })
}

fn system_prompt() -> String {
    "You are an expert feature architect and data scientist. Your mission is to maximize the \
     predictive power of the dataset through intelligent feature engineering.\n\
     \n\
     Your responsibilities:\n\
     1. Understand the data structure and relationships\n\
     2. Create meaningful interaction features using domain knowledge\n\
     3. Encode categorical variables appropriately\n\
     4. Analyze feature importance against the target\n\
     5. Select the most relevant features\n\
     \n\
     Process:\n\
     1. Think about domain logic and create interaction features that fit the data\n\
     2. One-hot encode low-cardinality categoricals; label encode higher cardinality\n\
     3. Run correlation_analysis to see which features matter\n\
     4. Select top features when there are clearly uninformative ones\n\
     5. Call finalize_engineering with a summary of decisions and reasoning\n\
     \n\
     Make decisions based on the data."
        .into()
}

fn user_prompt(
    cleaning_report: &CleaningReport,
    target: &TargetInfo,
    output_path: &Path,
) -> String {
    let report_json =
        serde_json::to_string_pretty(cleaning_report).unwrap_or_else(|_| "{}".into());
    format!(
        "Context from the cleaning stage:\n{report_json}\n\
         \n\
         The prediction target is '{}' ({}).\n\
         \n\
         Your tasks:\n\
         1. Create two to four interaction features based on domain logic\n\
         2. Encode categorical variables as needed\n\
         3. Run correlation analysis\n\
         4. Select the best features\n\
         5. Save the engineered dataset to: {}\n\
         \n\
         Be creative with the logic but make sure it fits the data.",
        target.column,
        target.task_type,
        output_path.display(),
    )
}

/// Run the engineering stage to completion and return its report.
pub async fn run(
    provider: Arc<dyn Provider>,
    settings: &StageSettings,
    cleaning_report: &CleaningReport,
    audit: AuditLog,
) -> Result<EngineeringReport, Error> {
    let input_path = PathBuf::from(&cleaning_report.output_file);
    let mut frame = read_csv(&input_path).map_err(|e| {
        Error::Pipeline(PipelineError::StageEntry {
            stage: "engineering".into(),
            reason: format!("Cannot load cleaned dataset: {e}"),
        })
    })?;
    let input_shape = frame.shape();

    let target = infer_target(provider.as_ref(), &settings.model, &frame).await?;
    audit.record(
        "engineering",
        "target_inferred",
        &target.column,
        Some(&serde_json::json!({"task_type": target.task_type})),
    );
    frame
        .move_to_end(&target.column)
        .map_err(|e| Error::Internal(e.to_string()))?;

    let mut ctx = EngineeringContext {
        frame,
        input_shape,
        target: target.clone(),
        features_log: Vec::new(),
        report_path: engineering_report_path(&settings.data_dir),
        default_output: settings.data_dir.join("engineered_data.csv"),
        report: None,
    };
    let default_output = ctx.default_output.clone();
    let report_path = ctx.report_path.clone();

    let stage = StageLoop::new(
        provider,
        settings.model.clone(),
        settings.temperature,
        registry(),
        "engineering",
        "finalize_engineering",
        Box::new(move |_ctx: &EngineeringContext| {
            serde_json::json!({
                "output_path": default_output.display().to_string(),
                "summary": "Feature engineering ended without an explicit finalize call. \
                            Saving the dataset in its current state.",
            })
        }),
        audit.clone(),
    )
    .with_max_iterations(settings.max_iterations);

    let mut conversation = Conversation::new();
    conversation.push(Message::system(system_prompt()));
    conversation.push(Message::user(user_prompt(
        cleaning_report,
        &target,
        &ctx.default_output,
    )));

    audit.record("engineering", "start", "Starting feature engineering", None);
    let run = stage.run(&mut ctx, &mut conversation).await;
    info!(iterations = run.iterations, finalization = ?run.finalization, "Engineering stage finished");

    if run.finalization == Finalization::Auto {
        if let Some(report) = ctx.report.as_mut() {
            report.auto_finalized = true;
            report::save_json(report, &report_path)?;
        }
    }

    let report = ctx.report.ok_or_else(|| {
        Error::Pipeline(PipelineError::MissingReport {
            stage: "engineering".into(),
            path: report_path.display().to_string(),
        })
    })?;
    audit.record("engineering", "finish", "Feature engineering completed", None);
    Ok(report)
}
