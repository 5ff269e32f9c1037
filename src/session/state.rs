//! Mutable conversation record owned by one session.

use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ConfabError, Result};
use crate::types::{ChatMessage, ChatParameters, Role, SessionMode, SessionParameters};

/// Message history, model selection and backend binding for one conversation.
///
/// Only the orchestration loop appends to the history. The backend session
/// id, once assigned, never changes.
#[derive(Debug, Clone)]
pub struct SessionState {
    model: String,
    messages: Vec<ChatMessage>,
    parameters: ChatParameters,
    session_parameters: Option<SessionParameters>,
    session_id: Option<String>,
    synced_len: usize,
}

impl SessionState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            parameters: ChatParameters::default(),
            session_parameters: None,
            session_id: None,
            synced_len: 0,
        }
    }

    pub fn with_parameters(mut self, parameters: ChatParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_session_parameters(mut self, session_parameters: SessionParameters) -> Self {
        self.session_parameters = Some(session_parameters);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn parameters(&self) -> &ChatParameters {
        &self.parameters
    }

    pub fn session_parameters(&self) -> Option<&SessionParameters> {
        self.session_parameters.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// True once a backend-held session is bound.
    pub fn is_stateful(&self) -> bool {
        self.session_id.is_some()
    }

    /// True when the backend-held session keeps each turn, so only unsynced
    /// messages need to be sent. A common-prefix session keeps only its
    /// initial messages.
    pub fn backend_retains_turns(&self) -> bool {
        self.is_stateful()
            && self
                .session_parameters
                .as_ref()
                .map_or(true, |params| params.mode == SessionMode::Session)
    }

    /// Bind the backend session id. Fails if one is already bound.
    pub fn assign_session_id(&mut self, session_id: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.session_id {
            return Err(ConfabError::InvalidState(format!(
                "session id already assigned ({existing})"
            )));
        }
        self.session_id = Some(session_id.into());
        Ok(())
    }

    /// Number of history messages the backend-held session already has.
    pub fn synced_len(&self) -> usize {
        self.synced_len
    }

    /// Messages not yet delivered to the backend-held session.
    pub fn unsynced(&self) -> &[ChatMessage] {
        &self.messages[self.synced_len.min(self.messages.len())..]
    }

    pub(crate) fn mark_synced(&mut self) {
        self.synced_len = self.messages.len();
    }

    pub(crate) fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub(crate) fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.messages.len(),
            synced_len: self.synced_len,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.messages.truncate(checkpoint.len);
        self.synced_len = checkpoint.synced_len;
    }

    /// Append an error tool message for every tool call issued at or after
    /// `from` that has no answer yet. Returns how many were answered.
    pub(crate) fn answer_unresolved(&mut self, from: usize, reason: &str) -> usize {
        let tail = &self.messages[from.min(self.messages.len())..];
        let answered: HashSet<&str> = tail
            .iter()
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();
        let open: Vec<String> = tail
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .flat_map(|message| &message.tool_calls)
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect();
        let count = open.len();
        for id in open {
            let body = json!({ "error": reason, "source": "loop" }).to_string();
            self.messages.push(ChatMessage::tool(id, body));
        }
        count
    }

    /// Verify that every tool call in history has a tool message answering it.
    pub fn ensure_tool_calls_answered(&self) -> Result<()> {
        ensure_answered(&self.messages)
    }
}

/// Fail with `ProtocolViolation` if any assistant tool call in `messages`
/// lacks a tool message carrying its id.
pub(crate) fn ensure_answered<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> Result<()> {
    let mut pending: Vec<&str> = Vec::new();
    let mut answered: HashSet<&str> = HashSet::new();
    for message in messages {
        match message.role {
            Role::Assistant => {
                pending.extend(message.tool_calls.iter().map(|call| call.id.as_str()));
            }
            Role::Tool => {
                if let Some(id) = message.tool_call_id.as_deref() {
                    answered.insert(id);
                }
            }
            _ => {}
        }
    }
    match pending.into_iter().find(|id| !answered.contains(id)) {
        Some(id) => Err(ConfabError::ProtocolViolation(format!(
            "tool call `{id}` has no tool message"
        ))),
        None => Ok(()),
    }
}

const INTERRUPTED_CALL: &str = "tool call interrupted before completing";

/// History length and sync cursor at the start of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    len: usize,
    synced_len: usize,
}

/// Rolls the state back to its checkpoint unless the round commits.
///
/// A backend-held session that already recorded the round's reply cannot
/// be rolled back; its open tool calls are answered with errors instead,
/// to be delivered with the next request.
pub(crate) struct RoundGuard<'a> {
    state: &'a mut SessionState,
    checkpoint: Checkpoint,
    committed: bool,
}

impl<'a> RoundGuard<'a> {
    pub(crate) fn new(state: &'a mut SessionState) -> Self {
        let checkpoint = state.checkpoint();
        Self {
            state,
            checkpoint,
            committed: false,
        }
    }

    pub(crate) fn state(&self) -> &SessionState {
        self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        self.state
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.state.backend_retains_turns() && self.state.synced_len() > self.checkpoint.synced_len
        {
            let answered = self
                .state
                .answer_unresolved(self.checkpoint.len, INTERRUPTED_CALL);
            warn!(
                answered,
                session_id = ?self.state.session_id(),
                "round interrupted after the backend recorded it; answering open tool calls"
            );
        } else {
            debug!(
                restored_len = self.checkpoint.len,
                "round did not complete; restoring history"
            );
            self.state.restore(self.checkpoint);
        }
    }
}
