//! Bridge an MCP server into the tool provider interface.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::client::{MCPClient, ServerIdentity, DEFAULT_CONNECT_TIMEOUT};
use super::schema::MCPToolSchema;
use super::transport::{MCPTransport, StdioTransport, StreamableHttpTransport};
use crate::error::{ConfabError, Result};
use crate::tools::{ToolArguments, ToolOutput, ToolProvider, ToolSchema};

#[async_trait]
trait MCPClientOps: Send {
    async fn initialize(&mut self) -> Result<()>;
    async fn reconnect(&mut self) -> Result<()>;
    async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>>;
    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput>;
    async fn close(&mut self) -> Result<()>;
    fn server(&self) -> Option<ServerIdentity>;
}

#[async_trait]
impl MCPClientOps for MCPClient {
    async fn initialize(&mut self) -> Result<()> {
        MCPClient::initialize(self).await
    }

    async fn reconnect(&mut self) -> Result<()> {
        MCPClient::reconnect(self).await
    }

    async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>> {
        MCPClient::list_tools(self).await
    }

    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput> {
        MCPClient::call_tool(self, name, arguments).await
    }

    async fn close(&mut self) -> Result<()> {
        MCPClient::close(self).await
    }

    fn server(&self) -> Option<ServerIdentity> {
        MCPClient::server(self).cloned()
    }
}

/// Streamable HTTP read deadline when none is configured.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Where and how to reach an MCP server.
///
/// Exactly one of `command`, `script_path` or `url` must be set.
#[derive(Debug, Clone)]
pub struct MCPConnectOptions {
    pub name: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub script_path: Option<PathBuf>,
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    /// Deadline for opening the transport and completing the handshake.
    pub timeout: Duration,
    /// Deadline for the next bytes of a streamable HTTP response.
    pub read_timeout: Duration,
    /// Descriptions for schema properties the server leaves undocumented.
    pub param_descriptions: HashMap<String, String>,
}

impl Default for MCPConnectOptions {
    fn default() -> Self {
        Self {
            name: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            script_path: None,
            url: None,
            headers: HashMap::new(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            param_descriptions: HashMap::new(),
        }
    }
}

impl MCPConnectOptions {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn script(path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn param_description(
        mut self,
        param: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.param_descriptions
            .insert(param.into(), description.into());
        self
    }

    /// Validate the options and build the matching transport. No I/O.
    pub fn transport(&self) -> Result<Box<dyn MCPTransport>> {
        let targets = [
            self.command.is_some(),
            self.script_path.is_some(),
            self.url.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if targets != 1 {
            return Err(ConfabError::Configuration(
                "MCP connection needs exactly one of command, script_path or url".into(),
            ));
        }

        if let Some(command) = &self.command {
            return Ok(Box::new(
                StdioTransport::new(command.clone(), self.args.clone()).envs(self.env.clone()),
            ));
        }
        if let Some(path) = &self.script_path {
            return Ok(Box::new(StdioTransport::from_script(path)?.envs(self.env.clone())));
        }
        match &self.url {
            Some(url) => {
                let transport = StreamableHttpTransport::new(url.clone())
                    .headers(&self.headers)?
                    .read_timeout(self.read_timeout);
                transport.http_client()?;
                Ok(Box::new(transport))
            }
            None => Err(ConfabError::Configuration(
                "MCP connection target missing".into(),
            )),
        }
    }

    fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(command) = &self.command {
            return command.clone();
        }
        if let Some(path) = &self.script_path {
            return path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mcp".into());
        }
        self.url.clone().unwrap_or_else(|| "mcp".into())
    }
}

/// Tool provider backed by one MCP server session.
///
/// The session is held behind a mutex, so concurrent calls on the same
/// provider are serialized.
pub struct MCPToolProvider {
    name: String,
    client: Mutex<Box<dyn MCPClientOps>>,
    cache: Mutex<Option<Vec<ToolSchema>>>,
    param_descriptions: HashMap<String, String>,
}

impl MCPToolProvider {
    /// Validate `options` and prepare a provider. Connects on [`ToolProvider::connect`].
    pub fn new(options: MCPConnectOptions) -> Result<Self> {
        let transport = options.transport()?;
        Ok(Self {
            name: options.display_name(),
            client: Mutex::new(Box::new(
                MCPClient::new(transport).with_connect_timeout(options.timeout),
            )),
            cache: Mutex::new(None),
            param_descriptions: options.param_descriptions,
        })
    }

    /// Wrap an existing client.
    pub fn from_client(name: impl Into<String>, client: MCPClient) -> Self {
        Self::from_client_ops(name.into(), Box::new(client))
    }

    fn from_client_ops(name: String, client: Box<dyn MCPClientOps>) -> Self {
        Self {
            name,
            client: Mutex::new(client),
            cache: Mutex::new(None),
            param_descriptions: HashMap::new(),
        }
    }

    /// Identity the server reported in its handshake.
    pub async fn server(&self) -> Option<ServerIdentity> {
        self.client.lock().await.server()
    }

    async fn fetch_tools(&self, client: &mut dyn MCPClientOps) -> Result<Vec<ToolSchema>> {
        let tools = client
            .list_tools()
            .await?
            .into_iter()
            .map(|tool| tool.into_tool_schema(&self.param_descriptions))
            .collect::<Vec<_>>();
        *self.cache.lock().await = Some(tools.clone());
        Ok(tools)
    }
}

#[async_trait]
impl ToolProvider for MCPToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        client.initialize().await?;
        let tools = self.fetch_tools(&mut **client).await?;
        info!(provider = %self.name, tools = tools.len(), "MCP provider connected");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        self.cache.lock().await.clone().ok_or_else(|| {
            ConfabError::InvalidState(format!("MCP provider '{}' is not connected", self.name))
        })
    }

    /// Re-handshake with the server, then re-list its tools.
    async fn refresh_tools(&self) -> Result<Vec<ToolSchema>> {
        let mut client = self.client.lock().await;
        client.reconnect().await?;
        let tools = self.fetch_tools(&mut **client).await?;
        debug!(provider = %self.name, tools = tools.len(), "MCP tool list refreshed");
        Ok(tools)
    }

    async fn execute_tool(&self, name: &str, arguments: &ToolArguments) -> Result<ToolOutput> {
        let mut client = self.client.lock().await;
        client.initialize().await?;
        client.call_tool(name, arguments.raw().clone()).await
    }

    async fn close(&self) -> Result<()> {
        *self.cache.lock().await = None;
        self.client.lock().await.close().await
    }
}
