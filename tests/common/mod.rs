//! Shared test helpers and scripted transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use confab::backend::{ChatRequest, ChunkStream, CompletionTransport, CreateSessionRequest};
use confab::error::{ConfabError, Result};
use confab::tools::{FunctionRegistry, FunctionTool, FunctionToolProvider, ParameterBuilder};
use confab::types::*;

/// A transport that replays queued assistant messages and records every
/// request it receives.
///
/// The same script serves both delivery modes: `chat` wraps the next
/// message in a completion, `chat_stream` splits it into fragments.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<ChatRequest>>,
    sessions: Mutex<Vec<CreateSessionRequest>>,
    /// Streams yield one fragment and then never finish.
    stall_streams: bool,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn stalling(replies: impl IntoIterator<Item = ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            stall_streams: true,
            ..Default::default()
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn sessions(&self) -> Vec<CreateSessionRequest> {
        self.sessions.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<ChatMessage> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ConfabError::InvalidState("script exhausted".into()))
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let message = self.next_reply(request)?;
        Ok(completion(message))
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let message = self.next_reply(request)?;
        let chunks = chunks_for(&message);
        if self.stall_streams {
            let first = chunks.into_iter().next().unwrap_or_default();
            let stream = futures::stream::iter(vec![Ok(first)]).chain(futures::stream::pending());
            return Ok(Box::pin(stream));
        }
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push(request.clone());
        Ok(format!("ctx-{}", sessions.len()))
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

fn finish_reason_for(message: &ChatMessage) -> FinishReason {
    if message.has_tool_calls() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    }
}

pub fn completion(message: ChatMessage) -> ChatCompletion {
    let finish_reason = finish_reason_for(&message);
    ChatCompletion {
        id: "cmpl-test".into(),
        model: "test-model".into(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(finish_reason),
        }],
        usage: Some(usage()),
    }
}

fn delta_chunk(delta: ChoiceDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: "cmpl-test".into(),
        model: "test-model".into(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage: None,
    }
}

/// Split a message into fragments the way a streaming backend would:
/// text in three-character pieces, each tool call's arguments in two.
pub fn chunks_for(message: &ChatMessage) -> Vec<ChatCompletionChunk> {
    let mut chunks = Vec::new();
    let text: Vec<char> = message.text().chars().collect();
    for piece in text.chunks(3) {
        chunks.push(delta_chunk(
            ChoiceDelta {
                role: Some(Role::Assistant),
                content: Some(piece.iter().collect()),
                ..Default::default()
            },
            None,
        ));
    }
    for (index, call) in message.tool_calls.iter().enumerate() {
        let args = call.arguments();
        let mut mid = args.len() / 2;
        while !args.is_char_boundary(mid) {
            mid += 1;
        }
        let pieces = [
            (Some(call.id.clone()), Some(call.name().to_string()), &args[..mid]),
            (None, None, &args[mid..]),
        ];
        for (id, name, arguments) in pieces {
            chunks.push(delta_chunk(
                ChoiceDelta {
                    tool_calls: vec![ToolCallDelta {
                        index: index as u32,
                        id,
                        function: FunctionDelta {
                            name,
                            arguments: Some(arguments.to_string()),
                        },
                    }],
                    ..Default::default()
                },
                None,
            ));
        }
    }
    let mut last = delta_chunk(ChoiceDelta::default(), Some(finish_reason_for(message)));
    last.usage = Some(usage());
    chunks.push(last);
    chunks
}

pub fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

/// `add(a, b) = a + b`, counting its invocations.
pub fn add_tool(calls: Arc<AtomicUsize>) -> FunctionTool {
    FunctionTool::new(
        "add",
        "Add two integers",
        ParameterBuilder::new()
            .integer("a", "First addend", true)
            .integer("b", "Second addend", true)
            .build(),
        move |args| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::String(
                    (args.get_i64("a")? + args.get_i64("b")?).to_string(),
                ))
            }
        },
    )
}

pub fn add_provider(calls: Arc<AtomicUsize>) -> FunctionToolProvider {
    let registry = FunctionRegistry::new()
        .with(add_tool(calls))
        .expect("add registers");
    FunctionToolProvider::new(registry)
}
