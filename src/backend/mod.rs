//! Completion backends.
//!
//! A [`CompletionTransport`] is the raw request/response channel to the
//! inference service. A [`CompletionBackend`] decides what to send over it:
//! the stateless backend resends the whole history every round, the stateful
//! backend sends only what the backend-held session has not seen yet.

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfabError, Result};
use crate::session::SessionState;
use crate::tools::ToolSchema;
use crate::types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, ChatParameters, SessionMode,
    SessionParameters, TruncationStrategy,
};

pub use http::HttpTransport;

/// Forward-only sequence of completion fragments.
pub type ChunkStream = BoxStream<'static, Result<ChatCompletionChunk>>;

/// One chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    /// Backend-held session this request continues, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(flatten)]
    pub parameters: ChatParameters,
    #[serde(default)]
    pub stream: bool,
}

/// Body of a session-creation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateSessionRequest {
    pub model: String,
    pub mode: SessionMode,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_strategy: Option<TruncationStrategy>,
}

impl CreateSessionRequest {
    pub fn new(model: impl Into<String>, parameters: &SessionParameters) -> Self {
        Self {
            model: model.into(),
            mode: parameters.mode,
            messages: parameters.initial_messages.clone(),
            ttl: parameters.ttl,
            truncation_strategy: parameters.truncation_strategy.clone(),
        }
    }
}

/// Raw delivery channel to the inference service.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream>;

    /// Allocate a backend-held session and return its id.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        let _ = request;
        Err(ConfabError::UnsupportedOperation(
            "this transport does not support backend-held sessions".into(),
        ))
    }
}

#[async_trait]
impl<T: CompletionTransport + ?Sized> CompletionTransport for Arc<T> {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        (**self).chat(request).await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        (**self).chat_stream(request).await
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<String> {
        (**self).create_session(request).await
    }
}

/// How a completion is delivered to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    #[default]
    Complete,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    Stateless,
    Stateful,
}

/// Turns `(session state, new messages)` into a completion.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn transport(&self) -> &dyn CompletionTransport;

    /// The request this backend sends for the given state.
    fn build_request(
        &self,
        state: &SessionState,
        new_messages: &[ChatMessage],
        tools: &[ToolSchema],
        stream: bool,
    ) -> Result<ChatRequest>;

    async fn send(
        &self,
        state: &SessionState,
        new_messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatCompletion> {
        let request = self.build_request(state, new_messages, tools, false)?;
        debug!(
            backend = %self.kind(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending completion request"
        );
        self.transport().chat(&request).await
    }

    async fn send_stream(
        &self,
        state: &SessionState,
        new_messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChunkStream> {
        let request = self.build_request(state, new_messages, tools, true)?;
        debug!(
            backend = %self.kind(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "opening completion stream"
        );
        self.transport().chat_stream(&request).await
    }
}

/// Resends the full history each round.
pub struct StatelessBackend {
    transport: Arc<dyn CompletionTransport>,
}

impl StatelessBackend {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CompletionBackend for StatelessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Stateless
    }

    fn transport(&self) -> &dyn CompletionTransport {
        self.transport.as_ref()
    }

    fn build_request(
        &self,
        state: &SessionState,
        new_messages: &[ChatMessage],
        tools: &[ToolSchema],
        stream: bool,
    ) -> Result<ChatRequest> {
        Ok(ChatRequest {
            model: state.model().to_string(),
            context_id: None,
            messages: state
                .messages()
                .iter()
                .chain(new_messages)
                .cloned()
                .collect(),
            tools: tools.to_vec(),
            parameters: state.parameters().clone(),
            stream,
        })
    }
}

/// Sends only messages the backend-held session has not seen.
pub struct StatefulBackend {
    transport: Arc<dyn CompletionTransport>,
}

impl StatefulBackend {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl CompletionBackend for StatefulBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Stateful
    }

    fn transport(&self) -> &dyn CompletionTransport {
        self.transport.as_ref()
    }

    fn build_request(
        &self,
        state: &SessionState,
        new_messages: &[ChatMessage],
        tools: &[ToolSchema],
        stream: bool,
    ) -> Result<ChatRequest> {
        let session_id = state.session_id().ok_or_else(|| {
            ConfabError::InvalidState("stateful backend used without a session id".into())
        })?;
        Ok(ChatRequest {
            model: state.model().to_string(),
            context_id: Some(session_id.to_string()),
            messages: state.unsynced().iter().chain(new_messages).cloned().collect(),
            tools: tools.to_vec(),
            parameters: state.parameters().clone(),
            stream,
        })
    }
}

/// Pick the backend matching the state's session binding.
pub fn backend_for(
    state: &SessionState,
    transport: Arc<dyn CompletionTransport>,
) -> Box<dyn CompletionBackend> {
    if state.is_stateful() {
        Box::new(StatefulBackend::new(transport))
    } else {
        Box::new(StatelessBackend::new(transport))
    }
}
