//! MCP transport layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::ClientInfo;
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceExt};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;

use crate::error::{ConfabError, Result};

pub type DynClientService = Box<dyn DynService<RoleClient>>;
pub type MCPRunningService = RunningService<RoleClient, DynClientService>;

/// Transport trait for MCP communication.
///
/// `connect` may be called more than once: each call opens a fresh session,
/// which is how the client reconnects after a dropped transport.
#[async_trait]
pub trait MCPTransport: Send {
    /// Open the transport and run the initialize handshake.
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> std::result::Result<MCPRunningService, ClientInitializeError>;

    /// Short human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Stdio transport: spawns the server and talks over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn from_command(command: impl Into<String>) -> Self {
        Self::new(command, Vec::new())
    }

    /// Run a server script with the interpreter its extension implies:
    /// `.py` with `python`, `.js` with `node`.
    pub fn from_script(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let interpreter = match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => "python",
            Some("js") => "node",
            _ => {
                return Err(ConfabError::Configuration(format!(
                    "server script must be a .py or .js file: {}",
                    path.display()
                )))
            }
        };
        Ok(Self::new(
            interpreter,
            vec![path.to_string_lossy().into_owned()],
        ))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl MCPTransport for StdioTransport {
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> std::result::Result<MCPRunningService, ClientInitializeError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stderr(Stdio::inherit());
        let transport = TokioChildProcess::new(command).map_err(|error| {
            ClientInitializeError::transport::<TokioChildProcess>(error, "spawn stdio transport")
        })?;

        client_info.into_dyn().serve(transport).await
    }

    fn describe(&self) -> String {
        format!("stdio:{}", self.command)
    }
}

/// Streamable HTTP transport for remote MCP servers.
#[derive(Debug, Clone)]
pub struct StreamableHttpTransport {
    url: String,
    headers: HeaderMap,
    read_timeout: Option<Duration>,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            read_timeout: None,
        }
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ConfabError::Configuration(format!("invalid MCP header name `{name}`: {e}"))
        })?;
        let header_value = HeaderValue::from_str(value.as_ref().trim()).map_err(|e| {
            ConfabError::Configuration(format!("invalid value for MCP header `{name}`: {e}"))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn headers(self, headers: &HashMap<String, String>) -> Result<Self> {
        headers
            .iter()
            .try_fold(self, |transport, (name, value)| transport.header(name, value))
    }

    /// Longest wait for the next bytes of a response or event stream.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The HTTP client every connection uses.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().default_headers(self.headers.clone());
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        builder.build().map_err(|e| {
            ConfabError::Configuration(format!("cannot build MCP HTTP client for {}: {e}", self.url))
        })
    }
}

#[async_trait]
impl MCPTransport for StreamableHttpTransport {
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> std::result::Result<MCPRunningService, ClientInitializeError> {
        let http_client = self
            .http_client()
            .map_err(|e| ClientInitializeError::ConnectionClosed(e.to_string()))?;
        let transport = StreamableHttpClientTransport::with_client(
            http_client,
            StreamableHttpClientTransportConfig::with_uri(self.url.clone()),
        );

        client_info.into_dyn().serve(transport).await
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
