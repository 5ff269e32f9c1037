//! Confab: tool-calling conversations over chat-completion backends.
//!
//! A [`session::Session`] drives repeated completion and tool-execution
//! rounds until the model stops calling tools. Tools come from any mix of
//! providers (in-process functions, MCP servers, hosted actions) gathered
//! into one [`tools::ToolPool`]; per-tool [`hooks`] can rewrite, approve or
//! reject calls before they run. Conversations either resend their full
//! history each round or bind to a backend-held session that keeps it.
//!
//! # Quick Start
//!
//! ```no_run
//! use confab::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> confab::error::Result<()> {
//! let add = FunctionTool::new(
//!     "add",
//!     "Add two integers",
//!     ParameterBuilder::new()
//!         .integer("a", "First addend", true)
//!         .integer("b", "Second addend", true)
//!         .build(),
//!     |args: ToolArguments| async move {
//!         Ok(json!(args.get_i64("a")? + args.get_i64("b")?))
//!     },
//! );
//! let registry = FunctionRegistry::new().with(add)?;
//!
//! let config = ConfabConfig::load()?;
//! let mut session = SessionBuilder::from_config(&config)?
//!     .tool_provider(FunctionToolProvider::new(registry))
//!     .build()
//!     .await?;
//!
//! let reply = session
//!     .complete(vec![ChatMessage::user("use add on 2 and 3")])
//!     .await?;
//! println!("{}", reply.text());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod hooks;
pub mod prelude;
pub mod session;
pub mod tools;
pub mod types;

#[cfg(feature = "mcp")]
pub mod mcp;
