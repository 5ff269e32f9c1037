//! The capability interface shared by every tool provider.

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::output::ToolOutput;
use super::schema::ToolSchema;
use crate::error::Result;

/// A source of tools: in-process functions, a remote protocol server, or a
/// hosted action runner.
///
/// All methods take `&self`; providers that hold a live connection keep it
/// behind their own lock so a pool can share them across tasks.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name, used in logs and errors.
    fn name(&self) -> &str;

    /// Establish the connection and populate the tool cache.
    async fn connect(&self) -> Result<()>;

    /// Last-fetched tool schemas, in provider order.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>>;

    /// Re-fetch the tool list, replacing the cached snapshot.
    async fn refresh_tools(&self) -> Result<Vec<ToolSchema>>;

    /// Execute the named tool.
    async fn execute_tool(&self, name: &str, arguments: &ToolArguments) -> Result<ToolOutput>;

    /// Release any held connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
