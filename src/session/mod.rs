//! Conversation sessions and the orchestration loop.
//!
//! A [`Session`] owns its history, tool pool and hook chain. Each turn
//! alternates completion requests with tool execution until the model
//! answers without calling a tool:
//!
//! 1. Send `history + new` (stateless) or only the unsynced tail (stateful).
//! 2. Append the new messages and the assistant reply to history.
//! 3. No tool calls: the turn is over.
//! 4. Otherwise run hooks and tools for every call and append one tool
//!    message per call, in call order.
//! 5. Repeat with no new messages.
//!
//! Every round is checkpointed. If the round fails, or its future or
//! stream is dropped before it finishes, history is truncated back to the
//! checkpoint so no tool call is left unanswered.

pub mod config;
pub mod state;
pub mod stream;
mod tooling;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

pub use config::{LoopConfig, MissingToolPolicy, ToolErrorPolicy};
pub use state::SessionState;
pub use stream::ToolCallAccumulator;

use crate::backend::{
    backend_for, BackendKind, CompletionBackend, CompletionTransport, CreateSessionRequest,
    Delivery, HttpTransport,
};
use crate::config::ConfabConfig;
use crate::error::{ConfabError, Result};
use crate::hooks::{HookChain, ToolHook};
use crate::tools::{ToolPool, ToolProvider, ToolSchema};
use crate::types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, ChatParameters, SessionParameters,
};
use state::{ensure_answered, RoundGuard};
use tooling::{RoundFlow, ToolRunner};

/// Result of [`Session::run_turn`].
pub enum Turn<'a> {
    Complete(ChatCompletion),
    /// Fragments of every round, in order, as one stream.
    Stream(BoxStream<'a, Result<ChatCompletionChunk>>),
}

impl std::fmt::Debug for Turn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(completion) => f.debug_tuple("Complete").field(completion).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One multi-turn conversation bound to a completion backend.
pub struct Session {
    state: SessionState,
    backend: Box<dyn CompletionBackend>,
    pool: Option<ToolPool>,
    hooks: HookChain,
    config: LoopConfig,
}

impl Session {
    pub fn builder(model: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(model)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.state.messages()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.state.session_id()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn pool(&self) -> Option<&ToolPool> {
        self.pool.as_ref()
    }

    /// Mutable pool access, e.g. to call [`ToolPool::refresh_tools`]
    /// between turns.
    pub fn pool_mut(&mut self) -> Option<&mut ToolPool> {
        self.pool.as_mut()
    }

    pub fn hooks_mut(&mut self) -> &mut HookChain {
        &mut self.hooks
    }

    pub fn loop_config(&self) -> &LoopConfig {
        &self.config
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.pool
            .as_ref()
            .map(|pool| pool.list_tools().to_vec())
            .unwrap_or_default()
    }

    /// Run one turn with the requested delivery.
    pub async fn run_turn(
        &mut self,
        new_messages: Vec<ChatMessage>,
        delivery: Delivery,
    ) -> Result<Turn<'_>> {
        match delivery {
            Delivery::Complete => Ok(Turn::Complete(self.complete(new_messages).await?)),
            Delivery::Stream => Ok(Turn::Stream(self.stream(new_messages))),
        }
    }

    /// Run one turn to completion and return the final completion.
    pub async fn complete(&mut self, new_messages: Vec<ChatMessage>) -> Result<ChatCompletion> {
        let tools = self.tool_schemas();
        let Session {
            state,
            backend,
            pool,
            hooks,
            config,
        } = self;
        let runner = ToolRunner {
            pool: pool.as_ref(),
            hooks,
            config,
        };

        let mut pending = new_messages;
        for round in 0..config.max_rounds {
            let mut guard = RoundGuard::new(&mut *state);
            ensure_answered(guard.state().messages().iter().chain(&pending))?;
            debug!(round, session_id = ?guard.state().session_id(), "starting round");

            let completion = backend.send(guard.state(), &pending, &tools).await?;
            let message = completion
                .message()
                .cloned()
                .ok_or_else(|| ConfabError::InvalidState("completion has no choices".into()))?;
            record_reply(guard.state_mut(), std::mem::take(&mut pending), message.clone());

            if !message.has_tool_calls() {
                guard.commit();
                return Ok(completion);
            }

            let flow = runner
                .run(guard.state_mut(), &message.tool_calls, round)
                .await?;
            guard.commit();
            if flow == RoundFlow::Stop {
                return Ok(completion);
            }
        }
        Err(ConfabError::RoundLimitExceeded(config.max_rounds))
    }

    /// Run one turn, forwarding every fragment of every round as it arrives.
    ///
    /// Tool calls are assembled from the fragments and executed after each
    /// round's fragments are exhausted. Dropping the stream mid-round rolls
    /// that round back.
    pub fn stream(
        &mut self,
        new_messages: Vec<ChatMessage>,
    ) -> BoxStream<'_, Result<ChatCompletionChunk>> {
        let tools = self.tool_schemas();
        let Session {
            state,
            backend,
            pool,
            hooks,
            config,
        } = self;
        let backend: &dyn CompletionBackend = &**backend;
        let runner = ToolRunner {
            pool: pool.as_ref(),
            hooks,
            config,
        };
        let max_rounds = config.max_rounds;

        Box::pin(async_stream::try_stream! {
            let mut pending = new_messages;
            let mut finished = false;
            for round in 0..max_rounds {
                let mut guard = RoundGuard::new(&mut *state);
                ensure_answered(guard.state().messages().iter().chain(&pending))?;
                debug!(round, session_id = ?guard.state().session_id(), "starting streamed round");

                let mut chunks = backend.send_stream(guard.state(), &pending, &tools).await?;
                let mut accumulator = ToolCallAccumulator::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    accumulator.push(&chunk);
                    yield chunk;
                }

                let message = accumulator.into_message()?;
                record_reply(guard.state_mut(), std::mem::take(&mut pending), message.clone());
                if !message.has_tool_calls() {
                    guard.commit();
                    finished = true;
                    break;
                }

                let flow = runner.run(guard.state_mut(), &message.tool_calls, round).await?;
                guard.commit();
                if flow == RoundFlow::Stop {
                    finished = true;
                    break;
                }
            }
            if !finished {
                Err::<(), _>(ConfabError::RoundLimitExceeded(max_rounds))?;
            }
        })
    }

    /// Close every tool provider.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.as_mut() {
            pool.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("backend", &self.backend.kind())
            .field("pool", &self.pool)
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}

fn record_reply(state: &mut SessionState, pending: Vec<ChatMessage>, reply: ChatMessage) {
    state.extend(pending);
    state.push(reply);
    if state.backend_retains_turns() {
        state.mark_synced();
    }
}

/// Assembles a [`Session`]. `build` creates the backend-held session (when
/// session parameters are given) and connects the tool pool.
pub struct SessionBuilder {
    model: String,
    transport: Option<Arc<dyn CompletionTransport>>,
    pool: Option<ToolPool>,
    hooks: HookChain,
    parameters: ChatParameters,
    session_parameters: Option<SessionParameters>,
    config: LoopConfig,
}

impl SessionBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            transport: None,
            pool: None,
            hooks: HookChain::new(),
            parameters: ChatParameters::default(),
            session_parameters: None,
            config: LoopConfig::from_env(),
        }
    }

    /// Model, HTTP transport and loop limits from resolved configuration.
    pub fn from_config(config: &ConfabConfig) -> Result<Self> {
        let model = config.model().ok_or_else(|| {
            ConfabError::Configuration("no model configured (set CONFAB_MODEL)".into())
        })?;
        Ok(Self::new(model)
            .transport(HttpTransport::from_config(config)?)
            .loop_config(LoopConfig::from_config(config)))
    }

    pub fn transport(self, transport: impl CompletionTransport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    pub fn shared_transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tools(mut self, pool: ToolPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Add a provider to the session's pool, creating the pool if needed.
    pub fn tool_provider(mut self, provider: impl ToolProvider + 'static) -> Self {
        self.pool = Some(self.pool.take().unwrap_or_default().with_provider(provider));
        self
    }

    pub fn hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hook(mut self, tool_name: impl Into<String>, hook: impl ToolHook + 'static) -> Self {
        self.hooks.register(tool_name, hook);
        self
    }

    pub fn parameters(mut self, parameters: ChatParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Use a backend-held session created with these parameters.
    pub fn session_parameters(mut self, session_parameters: SessionParameters) -> Self {
        self.session_parameters = Some(session_parameters);
        self
    }

    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<Session> {
        let transport = self.transport.ok_or_else(|| {
            ConfabError::Configuration("session requires a completion transport".into())
        })?;

        let mut pool = self.pool;
        if let Some(pool) = pool.as_mut() {
            if !pool.is_connected() {
                pool.connect().await?;
            }
        }

        let mut state = SessionState::new(self.model).with_parameters(self.parameters);
        if let Some(params) = self.session_parameters {
            let request = CreateSessionRequest::new(state.model(), &params);
            let session_id = transport.create_session(&request).await?;
            info!(session_id = %session_id, mode = %params.mode, "created backend session");
            state.assign_session_id(session_id)?;
            state.extend(params.initial_messages.iter().cloned());
            state.mark_synced();
            state = state.with_session_parameters(params);
        }

        let backend = backend_for(&state, transport);
        debug!(backend = %backend.kind(), model = %state.model(), "session ready");
        Ok(Session {
            state,
            backend,
            pool,
            hooks: self.hooks,
            config: self.config,
        })
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("model", &self.model)
            .field("has_transport", &self.transport.is_some())
            .field("pool", &self.pool)
            .field("session_parameters", &self.session_parameters)
            .field("config", &self.config)
            .finish()
    }
}
