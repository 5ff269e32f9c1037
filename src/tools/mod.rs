//! Tool providers and the tool pool.

pub mod arguments;
pub mod function;
pub mod hosted;
pub mod output;
pub mod pool;
pub mod provider;
pub mod schema;

pub use arguments::ToolArguments;
pub use function::{FunctionRegistry, FunctionTool, FunctionToolProvider};
pub use hosted::{
    HostedAction, HostedActionClient, HostedActionProvider, HostedActionRequest,
    HostedActionResponse, HttpHostedActionClient,
};
pub use output::ToolOutput;
pub use pool::{ShadowedTool, ToolPool};
pub use provider::ToolProvider;
pub use schema::{FunctionDefinition, ParameterBuilder, ToolSchema};
