//! Convenience re-exports for common use.

pub use crate::backend::{CompletionTransport, Delivery, HttpTransport};
pub use crate::config::ConfabConfig;
pub use crate::error::{ConfabError, Result};
pub use crate::hooks::{ApprovalDecision, ApprovalHook, DenyHook, HookChain, HookOutcome, ToolHook};
pub use crate::session::{LoopConfig, Session, SessionBuilder, SessionState, Turn};
pub use crate::tools::{
    FunctionRegistry, FunctionTool, FunctionToolProvider, HostedActionProvider, ParameterBuilder,
    ToolArguments, ToolOutput, ToolPool, ToolProvider, ToolSchema,
};
pub use crate::types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, ChatParameters, Role, SessionParameters,
    ToolCall,
};

#[cfg(feature = "mcp")]
pub use crate::mcp::{MCPConnectOptions, MCPToolProvider};
