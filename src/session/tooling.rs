//! Resolving one round's tool calls into tool messages.

use futures::{stream, StreamExt, TryStreamExt};
use serde_json::json;
use tracing::{debug, warn};

use super::config::{LoopConfig, MissingToolPolicy, ToolErrorPolicy};
use super::state::SessionState;
use crate::error::{ConfabError, Result};
use crate::hooks::{HookChain, HookOutcome};
use crate::tools::{ToolArguments, ToolPool};
use crate::types::{ChatMessage, ToolCall};

/// Whether the loop may request another completion after this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoundFlow {
    Continue,
    Stop,
}

struct Resolution {
    message: ChatMessage,
    stop: bool,
}

enum Planned {
    /// Execute `call`, answering `call_id` (the id the model issued).
    Execute { call_id: String, call: ToolCall },
    Answered(ChatMessage),
}

fn error_message(call_id: &str, error: &str, source: &str) -> ChatMessage {
    ChatMessage::tool(
        call_id,
        json!({ "error": error, "source": source }).to_string(),
    )
}

pub(crate) struct ToolRunner<'a> {
    pub(crate) pool: Option<&'a ToolPool>,
    pub(crate) hooks: &'a HookChain,
    pub(crate) config: &'a LoopConfig,
}

impl ToolRunner<'_> {
    /// Answer every call in call order, appending one tool message per call
    /// to `state`.
    ///
    /// Sequentially (parallelism 1) each call's hooks see the answers to the
    /// calls before it. With more parallelism all hooks run first against
    /// the round's starting history, then the approved calls execute
    /// concurrently.
    pub(crate) async fn run(
        &self,
        state: &mut SessionState,
        calls: &[ToolCall],
        round: usize,
    ) -> Result<RoundFlow> {
        let mut stop = false;
        if self.config.parallelism <= 1 {
            for call in calls {
                let resolution = self.resolve(self.plan(state, call, round).await?, round).await?;
                stop |= resolution.stop;
                state.push(resolution.message);
            }
        } else {
            let mut planned = Vec::with_capacity(calls.len());
            for call in calls {
                planned.push(self.plan(state, call, round).await?);
            }
            let resolutions: Vec<Resolution> = stream::iter(planned)
                .map(|step| self.resolve(step, round))
                .buffered(self.config.parallelism)
                .try_collect()
                .await?;
            for resolution in resolutions {
                stop |= resolution.stop;
                state.push(resolution.message);
            }
        }

        Ok(if stop {
            RoundFlow::Stop
        } else {
            RoundFlow::Continue
        })
    }

    async fn plan(&self, state: &SessionState, call: &ToolCall, round: usize) -> Result<Planned> {
        Ok(match self.hooks.apply(state, call.clone()).await? {
            HookOutcome::Proceed(rewritten) => Planned::Execute {
                call_id: call.id.clone(),
                call: rewritten,
            },
            HookOutcome::Reject { reason } => {
                debug!(round, tool = %call.name(), call_id = %call.id, "tool call rejected by hook");
                Planned::Answered(error_message(&call.id, &reason, "hook"))
            }
        })
    }

    async fn resolve(&self, step: Planned, round: usize) -> Result<Resolution> {
        match step {
            Planned::Answered(message) => Ok(Resolution {
                message,
                stop: false,
            }),
            Planned::Execute { call_id, call } => self.execute(call_id, call, round).await,
        }
    }

    async fn execute(&self, call_id: String, call: ToolCall, round: usize) -> Result<Resolution> {
        let name = call.name();
        let Some(pool) = self.pool.filter(|pool| pool.contains(name)) else {
            return self.missing(&call_id, name, round);
        };

        let arguments = match ToolArguments::parse(call.arguments()) {
            Ok(arguments) => arguments,
            Err(err) => return self.failed(&call_id, name, err),
        };

        debug!(round, tool = %name, call_id = %call_id, "executing tool");
        match pool.execute_tool(name, &arguments).await {
            Ok(output) => Ok(Resolution {
                message: ChatMessage::tool(call_id, output),
                stop: false,
            }),
            Err(ConfabError::UnknownTool(_)) => self.missing(&call_id, name, round),
            Err(err) => self.failed(&call_id, name, err),
        }
    }

    fn missing(&self, call_id: &str, name: &str, round: usize) -> Result<Resolution> {
        warn!(round, tool = %name, call_id = %call_id, policy = %self.config.missing_tool, "model called an unavailable tool");
        let denial = || error_message(call_id, &format!("tool `{name}` is not available"), "tool");
        match self.config.missing_tool {
            MissingToolPolicy::Deny => Ok(Resolution {
                message: denial(),
                stop: false,
            }),
            MissingToolPolicy::Stop => Ok(Resolution {
                message: denial(),
                stop: true,
            }),
            MissingToolPolicy::Fail => Err(ConfabError::UnknownTool(name.to_string())),
        }
    }

    fn failed(&self, call_id: &str, name: &str, err: ConfabError) -> Result<Resolution> {
        match self.config.tool_errors {
            ToolErrorPolicy::ReportToModel => {
                warn!(tool = %name, call_id = %call_id, error = %err, "tool call failed");
                Ok(Resolution {
                    message: error_message(call_id, &err.to_string(), "tool"),
                    stop: false,
                })
            }
            ToolErrorPolicy::Fail => Err(err),
        }
    }
}
