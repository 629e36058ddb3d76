//! Domain types and traits for the agentic ML pipeline.
//!
//! This crate defines the vocabulary every other crate speaks:
//! - [`message`]: conversations and tool-call requests
//! - [`provider`]: the LLM completion boundary
//! - [`tool`]: the tool trait and per-stage registry
//! - [`report`]: the immutable stage handoff artifacts
//! - [`error`]: the error taxonomy

pub mod error;
pub mod message;
pub mod provider;
pub mod report;
pub mod tool;

pub use error::{Error, PipelineError, ProviderError, Result, ToolError};
pub use message::{Conversation, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ResponseSchema, ToolDefinition};
pub use report::{
    CleaningReport, EngineeringReport, FeatureRecord, FinalReport, Shape, TaskType,
    TrainingIteration, TrainingReport,
};
pub use tool::{Tool, ToolRegistry};
