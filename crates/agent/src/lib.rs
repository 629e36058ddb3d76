//! Agent loop, sandbox, stages, and pipeline orchestration.
//!
//! The pipeline runs three LLM-driven agents in sequence over one
//! dataset: a cleaner, a feature engineer, and a trainer. Each agent is
//! a `StageLoop` over its own tool registry and context; stages hand off
//! through report files only.

pub mod audit;
pub mod loop_runner;
pub mod pipeline;
pub mod sandbox;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::AuditLog;
pub use loop_runner::{Finalization, StageLoop, StageRun};
pub use pipeline::Pipeline;
pub use sandbox::{ScriptOutcome, ScriptRunner};
