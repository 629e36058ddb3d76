//! The bounded stage loop that drives one agent through its tools.
//!
//! One `StageLoop` run owns a conversation: it repeatedly asks the
//! provider for the next step, dispatches any requested tool calls
//! against the stage context, and stops when the stage's finalize tool
//! runs or the iteration ceiling is hit. At the ceiling the loop invokes
//! the finalize tool itself with arguments synthesized from the context,
//! so a stage that terminates always leaves a report behind unless even
//! that last dispatch fails.

use std::sync::Arc;

use tabforge_core::message::{Conversation, Message};
use tabforge_core::provider::{Provider, ProviderRequest};
use tabforge_core::tool::ToolRegistry;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;

/// How a stage run reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// The model called the finalize tool itself.
    Explicit,
    /// The model never finalized (silent stop or iteration ceiling) and
    /// the loop called finalize with synthesized arguments.
    Auto,
    /// Even auto-finalization failed; no report was written by this loop.
    Unfinalized,
}

/// Summary of one stage run.
#[derive(Debug)]
pub struct StageRun {
    pub iterations: u32,
    pub finalization: Finalization,
    /// The last free-text content the model produced, if any.
    pub last_content: String,
}

/// Synthesizes finalize-tool arguments from the stage context when the
/// model never finalized on its own.
pub type AutoFinalizeArgs<C> = Box<dyn Fn(&C) -> serde_json::Value + Send + Sync>;

/// The bounded tool-use loop for one pipeline stage.
pub struct StageLoop<C: Send> {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    registry: ToolRegistry<C>,
    stage_name: String,
    finalize_tool: String,
    max_iterations: u32,
    /// When true, a turn with no tool calls draws a corrective note
    /// instead of ending the stage.
    require_tool_call: bool,
    auto_finalize: AutoFinalizeArgs<C>,
    audit: AuditLog,
}

impl<C: Send> StageLoop<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        registry: ToolRegistry<C>,
        stage_name: impl Into<String>,
        finalize_tool: impl Into<String>,
        auto_finalize: AutoFinalizeArgs<C>,
        audit: AuditLog,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            registry,
            stage_name: stage_name.into(),
            finalize_tool: finalize_tool.into(),
            max_iterations: 25,
            require_tool_call: false,
            auto_finalize,
            audit,
        }
    }

    /// Set the maximum number of loop iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Require every assistant turn to carry tool calls; text-only turns
    /// draw a corrective note instead of ending the stage.
    pub fn with_required_tool_call(mut self, required: bool) -> Self {
        self.require_tool_call = required;
        self
    }

    /// Drive the stage to completion.
    ///
    /// Provider failures are recoverable: the error is fed back into the
    /// conversation as a user note and the next iteration retries, so a
    /// flaky provider consumes iterations rather than aborting the stage.
    pub async fn run(&self, ctx: &mut C, conversation: &mut Conversation) -> StageRun {
        info!(
            stage = %self.stage_name,
            max_iterations = self.max_iterations,
            "Starting stage loop"
        );

        let tool_definitions = self.registry.definitions();
        let mut iteration = 0u32;
        let mut finalized = false;
        let mut silent_completion = false;
        let mut last_content = String::new();

        while iteration < self.max_iterations && !finalized && !silent_completion {
            iteration += 1;
            debug!(stage = %self.stage_name, iteration, "Stage loop iteration");

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: conversation.messages.clone(),
                temperature: self.temperature,
                tools: tool_definitions.clone(),
                response_schema: None,
            };

            let response = match self.provider.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(stage = %self.stage_name, error = %e, "Provider call failed, retrying");
                    self.audit
                        .record(&self.stage_name, "provider_error", &e.to_string(), None);
                    conversation.push(Message::user(format!(
                        "The last completion failed with: {e}. Continue from the last step."
                    )));
                    continue;
                }
            };

            if !response.message.content.is_empty() {
                last_content = response.message.content.clone();
                self.audit.record(
                    &self.stage_name,
                    "assistant_text",
                    &response.message.content,
                    None,
                );
            }

            let tool_calls = response.message.tool_calls.clone();
            conversation.push(response.message);

            if tool_calls.is_empty() {
                if self.require_tool_call {
                    self.audit.record(
                        &self.stage_name,
                        "corrective_note",
                        "no tool call in assistant turn",
                        None,
                    );
                    conversation.push(Message::user(
                        "You must respond with a tool call. Use the available tools to \
                         continue, and call the finalize tool when you are done.",
                    ));
                    continue;
                }
                silent_completion = true;
                break;
            }

            for call in &tool_calls {
                let arguments: serde_json::Value = match serde_json::from_str(&call.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        // Malformed JSON never reaches a handler; pair an
                        // error result to the call and move on.
                        warn!(stage = %self.stage_name, tool = %call.name, error = %e, "Malformed tool arguments");
                        self.audit.record(
                            &self.stage_name,
                            "malformed_arguments",
                            &call.name,
                            None,
                        );
                        conversation.push(Message::tool_result(
                            &call.id,
                            format!("Error: arguments are not valid JSON: {e}"),
                        ));
                        conversation.push(Message::user(format!(
                            "The arguments for '{}' were not valid JSON. Retry the call with \
                             corrected arguments.",
                            call.name
                        )));
                        continue;
                    }
                };

                self.audit
                    .record(&self.stage_name, "tool_call", &call.name, Some(&arguments));

                match self.registry.dispatch(ctx, &call.name, arguments).await {
                    Ok(output) => {
                        self.audit
                            .record(&self.stage_name, "tool_result", &output, None);
                        conversation.push(Message::tool_result(&call.id, &output));
                        if call.name == self.finalize_tool {
                            finalized = true;
                            break;
                        }
                        conversation.push(Message::user(
                            "Continue with the next step, or finalize if the work is complete.",
                        ));
                    }
                    Err(e) => {
                        warn!(stage = %self.stage_name, tool = %call.name, error = %e, "Tool failed");
                        self.audit
                            .record(&self.stage_name, "tool_error", &e.to_string(), None);
                        conversation.push(Message::tool_result(&call.id, format!("Error: {e}")));
                        conversation.push(Message::user(format!(
                            "The call to '{}' failed. Inspect the error, adjust, and try again.",
                            call.name
                        )));
                    }
                }
            }
        }

        let finalization = if finalized {
            Finalization::Explicit
        } else {
            // Silent stop or ceiling: the loop finalizes on the model's
            // behalf so a terminating stage always leaves a report.
            warn!(
                stage = %self.stage_name,
                iterations = iteration,
                silent = silent_completion,
                "Stage ended without an explicit finalize, auto-finalizing"
            );
            let args = (self.auto_finalize)(ctx);
            self.audit
                .record(&self.stage_name, "auto_finalize", &self.finalize_tool, Some(&args));
            match self.registry.dispatch(ctx, &self.finalize_tool, args).await {
                Ok(output) => {
                    self.audit
                        .record(&self.stage_name, "tool_result", &output, None);
                    Finalization::Auto
                }
                Err(e) => {
                    warn!(stage = %self.stage_name, error = %e, "Auto-finalization failed");
                    self.audit
                        .record(&self.stage_name, "auto_finalize_error", &e.to_string(), None);
                    Finalization::Unfinalized
                }
            }
        };

        StageRun {
            iterations: iteration,
            finalization,
            last_content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use async_trait::async_trait;
    use tabforge_core::error::ToolError;
    use tabforge_core::message::{MessageToolCall, Role};
    use tabforge_core::tool::Tool;

    #[derive(Default)]
    struct TestCtx {
        steps: Vec<String>,
        finalized: bool,
    }

    struct StepTool;

    #[async_trait]
    impl Tool<TestCtx> for StepTool {
        fn name(&self) -> &str {
            "step"
        }
        fn description(&self) -> &str {
            "Record a step"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"label": {"type": "string"}}})
        }
        async fn execute(
            &self,
            ctx: &mut TestCtx,
            arguments: serde_json::Value,
        ) -> Result<String, ToolError> {
            let label = arguments["label"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'label'".into()))?;
            ctx.steps.push(label.to_string());
            Ok(format!("recorded {label}"))
        }
    }

    struct FinishTool;

    #[async_trait]
    impl Tool<TestCtx> for FinishTool {
        fn name(&self) -> &str {
            "finish"
        }
        fn description(&self) -> &str {
            "Finish the stage"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"summary": {"type": "string"}}})
        }
        async fn execute(
            &self,
            ctx: &mut TestCtx,
            _arguments: serde_json::Value,
        ) -> Result<String, ToolError> {
            ctx.finalized = true;
            Ok("finished".into())
        }
    }

    fn registry() -> ToolRegistry<TestCtx> {
        let mut r = ToolRegistry::new();
        r.register(Box::new(StepTool));
        r.register(Box::new(FinishTool));
        r
    }

    fn stage_loop(provider: ScriptedProvider) -> StageLoop<TestCtx> {
        StageLoop::new(
            Arc::new(provider),
            "test-model",
            0.0,
            registry(),
            "test",
            "finish",
            Box::new(|_ctx: &TestCtx| serde_json::json!({"summary": "auto"})),
            AuditLog::disabled(),
        )
    }

    fn call(id: &str, name: &str, args: &str) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.into(),
        }
    }

    #[tokio::test]
    async fn finalize_tool_ends_the_stage() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "step",
                r#"{"label":"one"}"#,
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "finish",
                r#"{"summary":"done"}"#,
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));

        let run = sl.run(&mut ctx, &mut conv).await;
        assert_eq!(run.finalization, Finalization::Explicit);
        assert_eq!(run.iterations, 2);
        assert!(ctx.finalized);
        assert_eq!(ctx.steps, vec!["one"]);
    }

    #[tokio::test]
    async fn every_tool_call_gets_a_paired_result() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![
                call("c1", "step", r#"{"label":"a"}"#),
                call("c2", "step", r#"{"label":"b"}"#),
            ])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c3",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        sl.run(&mut ctx, &mut conv).await;

        for id in ["c1", "c2", "c3"] {
            assert!(
                conv.messages
                    .iter()
                    .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(id)),
                "missing tool result for {id}"
            );
        }
    }

    #[tokio::test]
    async fn malformed_arguments_never_reach_the_handler() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "step",
                "{not json",
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        sl.run(&mut ctx, &mut conv).await;

        assert!(ctx.steps.is_empty());
        let paired = conv
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(paired.content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn handler_failure_is_reported_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![call("c1", "step", "{}")])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.finalization, Finalization::Explicit);
        let paired = conv
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(paired.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn provider_failure_consumes_an_iteration_and_retries() {
        let provider = ScriptedProvider::new(vec![
            Err(tabforge_core::error::ProviderError::Network(
                "connection reset".into(),
            )),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.finalization, Finalization::Explicit);
        assert_eq!(run.iterations, 2);
        assert!(conv
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("failed with")));
    }

    #[tokio::test]
    async fn ceiling_triggers_auto_finalization() {
        // Provider that never finalizes on its own.
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "step",
                r#"{"label":"x"}"#,
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "step",
                r#"{"label":"y"}"#,
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c3",
                "step",
                r#"{"label":"z"}"#,
            )])),
        ]);
        let sl = stage_loop(provider).with_max_iterations(3);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.iterations, 3);
        assert_eq!(run.finalization, Finalization::Auto);
        assert!(ctx.finalized);
    }

    #[tokio::test]
    async fn text_only_turn_ends_stage_and_auto_finalizes() {
        let provider = ScriptedProvider::new(vec![Ok(ScriptedProvider::text_turn(
            "All columns look clean already.",
        ))]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.finalization, Finalization::Auto);
        assert_eq!(run.iterations, 1);
        assert_eq!(run.last_content, "All columns look clean already.");
        assert!(ctx.finalized);
    }

    #[tokio::test]
    async fn text_only_turn_draws_corrective_note_when_required() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::text_turn("Thinking out loud.")),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider).with_required_tool_call(true);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.finalization, Finalization::Explicit);
        assert!(conv
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.contains("must respond with a tool call")));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let provider = ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c1",
                "does_not_exist",
                "{}",
            )])),
            Ok(ScriptedProvider::tool_turn(vec![call(
                "c2",
                "finish",
                "{}",
            )])),
        ]);
        let sl = stage_loop(provider);
        let mut ctx = TestCtx::default();
        let mut conv = Conversation::new();
        conv.push(Message::user("go"));
        let run = sl.run(&mut ctx, &mut conv).await;

        assert_eq!(run.finalization, Finalization::Explicit);
        let paired = conv
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(paired.content.contains("Unknown tool"));
    }
}
