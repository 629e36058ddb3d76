//! Test doubles shared by the agent crate's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tabforge_core::error::ProviderError;
use tabforge_core::message::{Message, MessageToolCall};
use tabforge_core::provider::{Provider, ProviderRequest, ProviderResponse};

/// A provider that replays a fixed sequence of responses, one per
/// `complete` call. Running past the script fails the test loudly.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    /// Captured requests, for asserting on what the loop sent.
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An assistant turn that requests the given tool calls.
    pub fn tool_turn(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
        let mut message = Message::assistant("");
        message.tool_calls = tool_calls;
        ProviderResponse {
            message,
            usage: None,
            model: "scripted".into(),
        }
    }

    /// An assistant turn with free text only.
    pub fn text_turn(content: &str) -> ProviderResponse {
        ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model: "scripted".into(),
        }
    }

    /// An assistant turn answering a structured-output request.
    pub fn json_turn(value: serde_json::Value) -> ProviderResponse {
        Self::text_turn(&value.to_string())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider ran out of responses")
    }
}
