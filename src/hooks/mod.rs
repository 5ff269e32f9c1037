//! Per-tool interceptors that run before a tool call executes.
//!
//! Hooks registered for a tool name run strictly in registration order;
//! each sees the call as rewritten by the hooks before it. A hook either
//! passes the (possibly modified) call on, or rejects it. Rejection is a
//! normal outcome: the loop answers the call with an error tool message.
//! A hook returning `Err` is a fault and aborts the round.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfabError, Result};
use crate::session::SessionState;
use crate::types::ToolCall;

/// What a hook decided about a pending call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Continue with this call (unchanged or rewritten).
    Proceed(ToolCall),
    /// Do not execute; answer the call with `reason`.
    Reject { reason: String },
}

impl HookOutcome {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait ToolHook: Send + Sync {
    async fn on_tool_call(&self, state: &SessionState, call: ToolCall) -> Result<HookOutcome>;
}

/// Ordered hooks keyed by tool name.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: HashMap<String, Vec<Arc<dyn ToolHook>>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook for `tool_name`.
    pub fn register(&mut self, tool_name: impl Into<String>, hook: impl ToolHook + 'static) {
        self.register_arc(tool_name, Arc::new(hook));
    }

    pub fn register_arc(&mut self, tool_name: impl Into<String>, hook: Arc<dyn ToolHook>) {
        self.hooks.entry(tool_name.into()).or_default().push(hook);
    }

    pub fn with(mut self, tool_name: impl Into<String>, hook: impl ToolHook + 'static) -> Self {
        self.register(tool_name, hook);
        self
    }

    pub fn has_hooks(&self, tool_name: &str) -> bool {
        self.hooks
            .get(tool_name)
            .is_some_and(|hooks| !hooks.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    /// Run every hook registered for the call's tool name, in order.
    ///
    /// Tools with no registrations pass through untouched.
    pub async fn apply(&self, state: &SessionState, call: ToolCall) -> Result<HookOutcome> {
        let Some(hooks) = self.hooks.get(call.name()) else {
            return Ok(HookOutcome::Proceed(call));
        };

        let tool_name = call.name().to_string();
        let mut current = call;
        for (position, hook) in hooks.iter().enumerate() {
            let outcome = hook
                .on_tool_call(state, current)
                .await
                .map_err(|err| ConfabError::HookFailed {
                    tool_name: tool_name.clone(),
                    message: err.to_string(),
                })?;
            match outcome {
                HookOutcome::Proceed(next) => current = next,
                HookOutcome::Reject { reason } => {
                    debug!(tool = %tool_name, position, reason = %reason, "hook rejected tool call");
                    return Ok(HookOutcome::Reject { reason });
                }
            }
        }
        Ok(HookOutcome::Proceed(current))
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(name, hooks)| (name.as_str(), hooks.len()))
            .collect();
        f.debug_struct("HookChain").field("hooks", &counts).finish()
    }
}

/// Hook built from a closure over the pending call.
pub struct FnHook<F> {
    f: F,
}

/// Wrap a closure as a [`ToolHook`]. The closure does not see session state;
/// implement [`ToolHook`] directly when it is needed.
pub fn hook_fn<F, Fut>(f: F) -> FnHook<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutcome>> + Send + 'static,
{
    FnHook { f }
}

#[async_trait]
impl<F, Fut> ToolHook for FnHook<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutcome>> + Send + 'static,
{
    async fn on_tool_call(&self, _state: &SessionState, call: ToolCall) -> Result<HookOutcome> {
        (self.f)(call).await
    }
}

/// Rejects every call with a fixed reason.
#[derive(Debug, Clone)]
pub struct DenyHook {
    reason: String,
}

impl DenyHook {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolHook for DenyHook {
    async fn on_tool_call(&self, _state: &SessionState, _call: ToolCall) -> Result<HookOutcome> {
        Ok(HookOutcome::reject(self.reason.clone()))
    }
}

/// A pending call awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    /// Raw argument payload as sent by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ApprovalDecision {
    Accept,
    Decline {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Run the call with replacement arguments.
    Modify { arguments: String },
}

/// Async approval handler callback.
pub type ApprovalHandler =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, ApprovalDecision> + Send + Sync>;

/// Gates a call on an external decision; may wait indefinitely.
#[derive(Clone)]
pub struct ApprovalHook {
    handler: ApprovalHandler,
}

impl ApprovalHook {
    pub fn new(handler: ApprovalHandler) -> Self {
        Self { handler }
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ApprovalRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApprovalDecision> + Send + 'static,
    {
        Self::new(Arc::new(move |request| Box::pin(f(request))))
    }
}

#[async_trait]
impl ToolHook for ApprovalHook {
    async fn on_tool_call(&self, _state: &SessionState, call: ToolCall) -> Result<HookOutcome> {
        let request = ApprovalRequest {
            call_id: call.id.clone(),
            tool_name: call.name().to_string(),
            arguments: call.arguments().to_string(),
        };
        Ok(match (self.handler)(request).await {
            ApprovalDecision::Accept => HookOutcome::Proceed(call),
            ApprovalDecision::Decline { reason } => {
                HookOutcome::reject(reason.unwrap_or_else(|| "approval declined".to_string()))
            }
            ApprovalDecision::Modify { arguments } => {
                let mut call = call;
                call.function.arguments = arguments;
                HookOutcome::Proceed(call)
            }
        })
    }
}
