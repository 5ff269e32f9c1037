//! Reassembling streamed fragments into an assistant message.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use crate::error::{ConfabError, Result};
use crate::types::{
    ChatCompletionChunk, ChatMessage, FinishReason, MessageContent, Role, ToolCall, Usage,
};

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds chunk deltas for the first choice into one assistant message.
///
/// Tool-call pieces are keyed by their `index`; the id and name usually
/// arrive on the first piece and the argument string arrives in fragments
/// that are concatenated verbatim. Arguments are not parsed here.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    content: String,
    calls: BTreeMap<u32, PartialCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &ChatCompletionChunk) {
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        let Some(choice) = chunk.choices.iter().find(|c| c.index == 0) else {
            return;
        };
        if let Some(text) = &choice.delta.content {
            self.content.push_str(text);
        }
        for delta in &choice.delta.tool_calls {
            let entry = self.calls.entry(delta.index).or_default();
            if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
                entry.id = Some(id.to_string());
            }
            if let Some(name) = &delta.function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &delta.function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// The assembled assistant message. A call that never received an id
    /// gets a generated one; a call without a name is an error.
    pub fn into_message(self) -> Result<ChatMessage> {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for (index, call) in self.calls {
            let id = call.id.unwrap_or_else(|| {
                let generated = format!("call_{}", Uuid::new_v4().simple());
                debug!(index, id = %generated, "streamed tool call had no id");
                generated
            });
            if call.name.is_empty() {
                return Err(ConfabError::Stream(format!(
                    "tool call `{id}` at index {index} has no name"
                )));
            }
            tool_calls.push(ToolCall::new(id, call.name, call.arguments));
        }
        Ok(ChatMessage {
            role: Role::Assistant,
            content: (!self.content.is_empty()).then(|| MessageContent::Text(self.content)),
            tool_call_id: None,
            tool_calls,
        })
    }
}
