//! MCP client for connecting to MCP servers.

use std::time::Duration;

use rmcp::{
    model::{CallToolRequestParams, CallToolResult, Content, JsonObject, ProtocolVersion},
    service::{ClientInitializeError, ServiceError},
};
use tracing::{debug, info, warn};

use super::schema::MCPToolSchema;
use super::transport::{MCPRunningService, MCPTransport};
use crate::error::{ConfabError, Result};
use crate::tools::ToolOutput;

/// Handshake deadline when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MCPConnectionState {
    Disconnected,
    Initialized,
    Closed,
}

/// Identity a server reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub instructions: Option<String>,
}

/// Client for a Model Context Protocol server.
pub struct MCPClient {
    transport: Option<Box<dyn MCPTransport>>,
    session: Option<MCPRunningService>,
    state: MCPConnectionState,
    server: Option<ServerIdentity>,
    connect_timeout: Duration,
}

impl MCPClient {
    /// Create a new MCP client with the given transport.
    pub fn new(transport: Box<dyn MCPTransport>) -> Self {
        Self {
            transport: Some(transport),
            session: None,
            state: MCPConnectionState::Disconnected,
            server: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound each connection attempt, handshake included.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create a client from an already-running rmcp service.
    ///
    /// Such a client cannot reconnect once the session drops.
    pub fn from_running_service(session: MCPRunningService) -> Self {
        let server = server_identity(&session);
        Self {
            transport: None,
            session: Some(session),
            state: MCPConnectionState::Initialized,
            server,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn connection_state(&self) -> MCPConnectionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == MCPConnectionState::Initialized
    }

    /// Server identity captured on the last successful handshake.
    pub fn server(&self) -> Option<&ServerIdentity> {
        self.server.as_ref()
    }

    /// Initialize the MCP connection. A no-op when already initialized.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state == MCPConnectionState::Closed {
            return Err(ConfabError::InvalidState("MCP client is closed".into()));
        }
        if let Some(session) = self.session.as_ref() {
            if !session.is_closed() {
                self.state = MCPConnectionState::Initialized;
                return Ok(());
            }
            self.session = None;
            self.state = MCPConnectionState::Disconnected;
        }

        let session = self.connect_with_protocol_fallback().await?;
        self.server = server_identity(&session);
        if let Some(server) = &self.server {
            info!(
                server = %server.name,
                version = %server.version,
                protocol = %server.protocol_version,
                "MCP session initialized"
            );
        }
        self.session = Some(session);
        self.state = MCPConnectionState::Initialized;
        Ok(())
    }

    /// List available tools from the MCP server.
    pub async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>> {
        self.ensure_initialized()?;

        let tools = match self.list_tools_from_active_session().await {
            Ok(tools) => tools,
            Err(error) if Self::should_reconnect_after_service_error(&error) => {
                self.reconnect_after_drop().await?;
                self.list_tools_from_active_session()
                    .await
                    .map_err(|retry_error| map_service_error("list_tools", retry_error))?
            }
            Err(error) => return Err(map_service_error("list_tools", error)),
        };

        Ok(tools.into_iter().map(MCPToolSchema::from).collect())
    }

    /// Execute a tool on the MCP server.
    pub async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput> {
        self.ensure_initialized()?;
        let arguments = coerce_tool_arguments(arguments)?;

        let result = match self
            .call_tool_from_active_session(name, arguments.clone())
            .await
        {
            Ok(result) => result,
            Err(error) if Self::should_reconnect_after_service_error(&error) => {
                self.reconnect_after_drop().await?;
                self.call_tool_from_active_session(name, arguments)
                    .await
                    .map_err(|retry_error| map_service_error("call_tool", retry_error))?
            }
            Err(error) => return Err(map_service_error("call_tool", error)),
        };

        map_call_result(name, result)
    }

    /// Shut the session down. Further calls fail with `InvalidState`.
    pub async fn close(&mut self) -> Result<()> {
        self.state = MCPConnectionState::Closed;
        self.transport = None;
        if let Some(session) = self.session.take() {
            session
                .cancel()
                .await
                .map_err(|e| ConfabError::Stream(format!("MCP session shutdown failed: {e}")))?;
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        match self.state {
            MCPConnectionState::Initialized => Ok(()),
            MCPConnectionState::Closed => {
                Err(ConfabError::InvalidState("MCP client is closed".into()))
            }
            MCPConnectionState::Disconnected => Err(ConfabError::InvalidState(
                "MCP client must be initialized first".into(),
            )),
        }
    }

    /// Shut the current session down and handshake again on a fresh
    /// connection.
    ///
    /// A client built from a running service has no transport to reopen;
    /// for it this only checks that the session is still open.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.state == MCPConnectionState::Closed {
            return Err(ConfabError::InvalidState("MCP client is closed".into()));
        }
        if self.transport.is_none() {
            return self.initialize().await;
        }
        if let Some(session) = self.session.take() {
            if let Err(error) = session.cancel().await {
                debug!(error = %error, "previous MCP session did not shut down cleanly");
            }
        }
        self.state = MCPConnectionState::Disconnected;
        self.initialize().await
    }

    async fn reconnect_after_drop(&mut self) -> Result<()> {
        if self.transport.is_none() {
            self.state = MCPConnectionState::Closed;
            return Err(ConfabError::Stream("MCP session is closed".into()));
        }
        warn!("MCP transport dropped; reconnecting once");
        self.session = None;
        self.state = MCPConnectionState::Disconnected;
        self.initialize().await
    }

    async fn connect_with_protocol_fallback(&mut self) -> Result<MCPRunningService> {
        let deadline = self.connect_timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ConfabError::Configuration("Missing MCP transport".into()))?;
        let target = transport.describe();

        let latest_client_info = rmcp::model::ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };

        let attempt = tokio::time::timeout(deadline, transport.connect(latest_client_info))
            .await
            .map_err(|_| handshake_timed_out(&target, deadline))?;
        match attempt {
            Ok(session) => return Ok(session),
            Err(error) if Self::should_retry_protocol_fallback(&error) => {
                debug!(target = %target, "retrying MCP handshake with 2024-11-05 protocol");
            }
            Err(error) => return Err(map_client_initialize_error(&target, error)),
        }

        let fallback_client_info = rmcp::model::ClientInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            ..Default::default()
        };
        tokio::time::timeout(deadline, transport.connect(fallback_client_info))
            .await
            .map_err(|_| handshake_timed_out(&target, deadline))?
            .map_err(|error| map_client_initialize_error(&target, error))
    }

    async fn list_tools_from_active_session(
        &mut self,
    ) -> std::result::Result<Vec<rmcp::model::Tool>, ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::TransportClosed)?;

        match session.list_all_tools().await {
            Ok(tools) => Ok(tools),
            Err(ServiceError::UnexpectedResponse) => {
                session.list_tools(None).await.map(|page| page.tools)
            }
            Err(error) => Err(error),
        }
    }

    async fn call_tool_from_active_session(
        &mut self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> std::result::Result<CallToolResult, ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::TransportClosed)?;

        session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
    }

    fn should_reconnect_after_service_error(error: &ServiceError) -> bool {
        matches!(
            error,
            ServiceError::TransportClosed
                | ServiceError::TransportSend(_)
                | ServiceError::Cancelled { .. }
        )
    }

    fn should_retry_protocol_fallback(error: &ClientInitializeError) -> bool {
        match error {
            ClientInitializeError::JsonRpcError(error) => {
                let message = error.message.to_ascii_lowercase();
                message.contains("protocol") && message.contains("version")
            }
            _ => false,
        }
    }
}

fn server_identity(session: &MCPRunningService) -> Option<ServerIdentity> {
    let info = session.peer_info()?;
    let protocol_version = serde_json::to_value(&info.protocol_version)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    Some(ServerIdentity {
        name: info.server_info.name.clone(),
        version: info.server_info.version.clone(),
        protocol_version,
        instructions: info.instructions.clone(),
    })
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                ConfabError::InvalidArgument(format!("MCP tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(ConfabError::InvalidArgument(format!(
            "MCP tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn content_type(item: &Content) -> String {
    serde_json::to_value(item)
        .ok()
        .and_then(|value| {
            value
                .get("type")
                .and_then(|t| t.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".into())
}

/// Convert a call-tool envelope into canonical tool output.
///
/// One text part becomes a single string; several become a sequence in
/// server order. Any non-text part fails the call.
fn map_call_result(name: &str, result: CallToolResult) -> Result<ToolOutput> {
    if result.is_error.unwrap_or(false) {
        let text = result
            .content
            .iter()
            .filter_map(|item| item.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("\n");
        let message = if !text.is_empty() {
            text
        } else {
            result
                .structured_content
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "MCP tool returned an error result".into())
        };
        return Err(ConfabError::ToolExecution {
            tool_name: name.to_string(),
            message,
        });
    }

    let mut texts = Vec::with_capacity(result.content.len());
    for item in &result.content {
        match item.as_text() {
            Some(text) => texts.push(text.text.clone()),
            None => {
                return Err(ConfabError::UnsupportedContent {
                    tool_name: name.to_string(),
                    content_type: content_type(item),
                })
            }
        }
    }

    Ok(match texts.len() {
        0 => ToolOutput::Text(
            result
                .structured_content
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ),
        1 => ToolOutput::Text(texts.remove(0)),
        _ => ToolOutput::Parts(texts),
    })
}

fn handshake_timed_out(target: &str, deadline: Duration) -> ConfabError {
    warn!(target = %target, timeout_ms = deadline.as_millis() as u64, "MCP handshake timed out");
    ConfabError::Timeout(deadline.as_millis() as u64)
}

fn map_client_initialize_error(target: &str, error: ClientInitializeError) -> ConfabError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("initialize connection closed: {context}")
        }
        ClientInitializeError::TransportError { error, context } => {
            format!("initialize transport error ({context}): {error}")
        }
        ClientInitializeError::JsonRpcError(error) => {
            format!("initialize JSON-RPC error {}: {}", error.code.0, error.message)
        }
        ClientInitializeError::Cancelled => "initialize cancelled".to_string(),
        other => format!("initialize error: {other}"),
    };
    ConfabError::ProviderUnavailable {
        provider: target.to_string(),
        message,
    }
}

fn map_service_error(context: &str, error: ServiceError) -> ConfabError {
    match error {
        ServiceError::McpError(error) => ConfabError::ProviderUnavailable {
            provider: "mcp".into(),
            message: format!("{context}: MCP error {}: {}", error.code.0, error.message),
        },
        ServiceError::TransportSend(error) => {
            ConfabError::Stream(format!("{context}: MCP transport send failed: {error}"))
        }
        ServiceError::TransportClosed => {
            ConfabError::Stream(format!("{context}: MCP transport closed"))
        }
        ServiceError::UnexpectedResponse => ConfabError::ProviderUnavailable {
            provider: "mcp".into(),
            message: format!("{context}: unexpected MCP response"),
        },
        ServiceError::Cancelled { reason } => {
            let suffix = reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            ConfabError::Stream(format!("{context}: MCP request cancelled{suffix}"))
        }
        ServiceError::Timeout { timeout } => ConfabError::Timeout(timeout.as_millis() as u64),
        other => ConfabError::ProviderUnavailable {
            provider: "mcp".into(),
            message: format!("{context}: MCP service error: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rmcp::{
        model::ServerJsonRpcMessage,
        service::{serve_directly, RoleClient, RxJsonRpcMessage, ServiceExt, TxJsonRpcMessage},
        transport::Transport as RmcpTransport,
    };
    use serde_json::json;
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    enum MockSessionBehavior {
        DisconnectOnListTools,
        DisconnectOnCallTool,
        ListTools { tool_name: String },
        CallTool { content: serde_json::Value },
    }

    struct ChannelRmcpTransport {
        outbound: UnboundedSender<TxJsonRpcMessage<RoleClient>>,
        inbound: UnboundedReceiver<RxJsonRpcMessage<RoleClient>>,
    }

    impl RmcpTransport<RoleClient> for ChannelRmcpTransport {
        type Error = io::Error;

        fn send(
            &mut self,
            item: TxJsonRpcMessage<RoleClient>,
        ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send + 'static
        {
            let tx = self.outbound.clone();
            async move {
                tx.send(item).map_err(|_| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "mock rmcp channel closed")
                })
            }
        }

        async fn receive(&mut self) -> Option<RxJsonRpcMessage<RoleClient>> {
            self.inbound.recv().await
        }

        fn close(
            &mut self,
        ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send {
            self.inbound.close();
            std::future::ready(Ok(()))
        }
    }

    fn scripted_running_service(behavior: MockSessionBehavior) -> MCPRunningService {
        let (outbound_tx, mut outbound_rx) = unbounded_channel::<TxJsonRpcMessage<RoleClient>>();
        let (inbound_tx, inbound_rx) = unbounded_channel::<RxJsonRpcMessage<RoleClient>>();
        let transport = ChannelRmcpTransport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let value = match serde_json::to_value(message) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
                    continue;
                };
                let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);

                let result = match (&behavior, method) {
                    (MockSessionBehavior::DisconnectOnListTools, "tools/list")
                    | (MockSessionBehavior::DisconnectOnCallTool, "tools/call") => return,
                    (MockSessionBehavior::ListTools { tool_name }, "tools/list") => json!({
                        "tools": [{
                            "name": tool_name,
                            "description": "mock tool",
                            "inputSchema": {
                                "type": "object",
                                "properties": { "city": { "type": "string" } }
                            }
                        }],
                        "nextCursor": null
                    }),
                    (MockSessionBehavior::CallTool { content }, "tools/call") => json!({
                        "content": content,
                        "isError": false
                    }),
                    _ => continue,
                };

                let response: ServerJsonRpcMessage = serde_json::from_value(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": result
                }))
                .expect("mock response should deserialize");
                let _ = inbound_tx.send(response);
            }
        });

        serve_directly(().into_dyn(), transport, None)
    }

    struct MockBootstrapTransport {
        connect_results: VecDeque<std::result::Result<MCPRunningService, ClientInitializeError>>,
        attempted_protocols: Arc<Mutex<Vec<ProtocolVersion>>>,
    }

    impl MockBootstrapTransport {
        fn new(
            connect_results: Vec<std::result::Result<MCPRunningService, ClientInitializeError>>,
        ) -> Self {
            Self {
                connect_results: connect_results.into(),
                attempted_protocols: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn attempted_protocols(&self) -> Arc<Mutex<Vec<ProtocolVersion>>> {
            Arc::clone(&self.attempted_protocols)
        }
    }

    #[async_trait]
    impl MCPTransport for MockBootstrapTransport {
        async fn connect(
            &mut self,
            client_info: rmcp::model::ClientInfo,
        ) -> std::result::Result<MCPRunningService, ClientInitializeError> {
            self.attempted_protocols
                .lock()
                .expect("protocol mutex should lock")
                .push(client_info.protocol_version);

            self.connect_results.pop_front().unwrap_or_else(|| {
                Err(ClientInitializeError::ConnectionClosed(
                    "missing mock connect result".into(),
                ))
            })
        }

        fn describe(&self) -> String {
            "mock".into()
        }
    }

    /// Transport whose handshake never completes.
    struct HangingTransport;

    #[async_trait]
    impl MCPTransport for HangingTransport {
        async fn connect(
            &mut self,
            _client_info: rmcp::model::ClientInfo,
        ) -> std::result::Result<MCPRunningService, ClientInitializeError> {
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "hanging".into()
        }
    }

    fn call_result(value: serde_json::Value) -> CallToolResult {
        serde_json::from_value(value).expect("fixture call result should deserialize")
    }

    #[test]
    fn coerce_tool_arguments_accepts_object_and_stringified_object() {
        let from_obj = coerce_tool_arguments(json!({"city":"nyc"}))
            .expect("object arguments should parse")
            .expect("object should be present");
        assert_eq!(from_obj.get("city"), Some(&json!("nyc")));

        let from_str = coerce_tool_arguments(json!(r#"{"city":"la"}"#))
            .expect("stringified object should parse")
            .expect("object should be present");
        assert_eq!(from_str.get("city"), Some(&json!("la")));
    }

    #[test]
    fn coerce_tool_arguments_rejects_non_object() {
        let err =
            coerce_tool_arguments(json!(["bad"])).expect_err("array arguments should be rejected");
        assert!(matches!(err, ConfabError::InvalidArgument(_)));
    }

    #[test]
    fn single_text_part_maps_to_text() {
        let output = map_call_result(
            "weather",
            call_result(json!({ "content": [{ "type": "text", "text": "sunny" }] })),
        )
        .expect("text result should map");
        assert_eq!(output, ToolOutput::text("sunny"));
    }

    #[test]
    fn two_text_parts_map_to_ordered_sequence() {
        let output = map_call_result(
            "search",
            call_result(json!({
                "content": [
                    { "type": "text", "text": "first" },
                    { "type": "text", "text": "second" }
                ],
                "isError": false
            })),
        )
        .expect("text parts should map");
        assert_eq!(
            output,
            ToolOutput::Parts(vec!["first".into(), "second".into()])
        );
    }

    #[test]
    fn image_content_is_unsupported() {
        let err = map_call_result(
            "render",
            call_result(json!({
                "content": [
                    { "type": "text", "text": "caption" },
                    { "type": "image", "data": "aGVsbG8=", "mimeType": "image/png" }
                ]
            })),
        )
        .expect_err("image content should fail");
        assert!(matches!(
            err,
            ConfabError::UnsupportedContent { tool_name, content_type }
            if tool_name == "render" && content_type == "image"
        ));
    }

    #[test]
    fn error_envelope_maps_to_tool_execution() {
        let err = map_call_result(
            "search_docs",
            call_result(json!({
                "content": [{ "type": "text", "text": "tool failed at runtime" }],
                "isError": true
            })),
        )
        .expect_err("error result should map to tool execution error");
        assert!(matches!(
            err,
            ConfabError::ToolExecution { tool_name, message }
            if tool_name == "search_docs" && message.contains("failed at runtime")
        ));
    }

    #[tokio::test]
    async fn initialize_bootstraps_session_from_transport() {
        let transport = MockBootstrapTransport::new(vec![Ok(scripted_running_service(
            MockSessionBehavior::ListTools {
                tool_name: "weather".into(),
            },
        ))]);
        let attempted = transport.attempted_protocols();
        let mut client = MCPClient::new(Box::new(transport));

        client
            .initialize()
            .await
            .expect("initialize should bootstrap from transport");

        assert!(client.is_initialized());
        let attempted = attempted.lock().expect("protocol mutex should lock");
        assert_eq!(attempted.as_slice(), &[ProtocolVersion::LATEST]);
    }

    #[tokio::test]
    async fn initialize_falls_back_to_legacy_protocol_version() {
        let transport = MockBootstrapTransport::new(vec![
            Err(ClientInitializeError::JsonRpcError(
                rmcp::model::ErrorData::invalid_request("unsupported protocol version", None),
            )),
            Ok(scripted_running_service(MockSessionBehavior::ListTools {
                tool_name: "weather".into(),
            })),
        ]);
        let attempted = transport.attempted_protocols();
        let mut client = MCPClient::new(Box::new(transport));

        client
            .initialize()
            .await
            .expect("initialize should retry with fallback protocol");

        let attempted = attempted.lock().expect("protocol mutex should lock");
        assert_eq!(attempted.len(), 2);
        assert_eq!(attempted[0], ProtocolVersion::LATEST);
        assert_eq!(attempted[1], ProtocolVersion::V_2024_11_05);
    }

    #[tokio::test]
    async fn handshake_failure_is_provider_unavailable() {
        let mut client = MCPClient::new(Box::new(MockBootstrapTransport::new(vec![Err(
            ClientInitializeError::ConnectionClosed("refused".into()),
        )])));
        let err = client
            .initialize()
            .await
            .expect_err("closed connection should fail");
        assert!(matches!(
            err,
            ConfabError::ProviderUnavailable { provider, message }
            if provider == "mock" && message.contains("refused")
        ));
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let mut client = MCPClient::new(Box::new(HangingTransport))
            .with_connect_timeout(Duration::from_millis(50));
        let err = client
            .initialize()
            .await
            .expect_err("handshake never completes");
        assert!(matches!(err, ConfabError::Timeout(50)));
        assert_eq!(client.connection_state(), MCPConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_runs_a_fresh_handshake() {
        let transport = MockBootstrapTransport::new(vec![
            Ok(scripted_running_service(MockSessionBehavior::ListTools {
                tool_name: "weather".into(),
            })),
            Ok(scripted_running_service(MockSessionBehavior::ListTools {
                tool_name: "forecast".into(),
            })),
        ]);
        let attempted = transport.attempted_protocols();
        let mut client = MCPClient::new(Box::new(transport));

        client.initialize().await.expect("initialize should succeed");
        client.initialize().await.expect("second initialize is a no-op");
        assert_eq!(attempted.lock().expect("protocol mutex should lock").len(), 1);

        client.reconnect().await.expect("reconnect should succeed");
        assert_eq!(attempted.lock().expect("protocol mutex should lock").len(), 2);
        let tools = client.list_tools().await.expect("list after reconnect");
        assert_eq!(tools[0].name, "forecast");
    }

    #[tokio::test]
    async fn call_tool_returns_parts_in_order() {
        let transport = MockBootstrapTransport::new(vec![Ok(scripted_running_service(
            MockSessionBehavior::CallTool {
                content: json!([
                    { "type": "text", "text": "one" },
                    { "type": "text", "text": "two" }
                ]),
            },
        ))]);
        let mut client = MCPClient::new(Box::new(transport));
        client.initialize().await.expect("initialize should succeed");

        let output = client
            .call_tool("lookup", json!({ "q": "rust" }))
            .await
            .expect("call_tool should succeed");
        assert_eq!(output, ToolOutput::Parts(vec!["one".into(), "two".into()]));
    }

    #[tokio::test]
    async fn list_tools_reconnects_when_session_disconnects() {
        let transport = MockBootstrapTransport::new(vec![
            Ok(scripted_running_service(
                MockSessionBehavior::DisconnectOnListTools,
            )),
            Ok(scripted_running_service(MockSessionBehavior::ListTools {
                tool_name: "weather".into(),
            })),
        ]);
        let attempted = transport.attempted_protocols();
        let mut client = MCPClient::new(Box::new(transport));

        client.initialize().await.expect("initialize should succeed");
        let tools = client
            .list_tools()
            .await
            .expect("list_tools should reconnect and retry");

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "weather");
        assert_eq!(attempted.lock().expect("protocol mutex should lock").len(), 2);
    }

    #[tokio::test]
    async fn call_tool_reconnects_when_session_disconnects() {
        let transport = MockBootstrapTransport::new(vec![
            Ok(scripted_running_service(
                MockSessionBehavior::DisconnectOnCallTool,
            )),
            Ok(scripted_running_service(MockSessionBehavior::CallTool {
                content: json!([{ "type": "text", "text": "tool ok" }]),
            })),
        ]);
        let mut client = MCPClient::new(Box::new(transport));

        client.initialize().await.expect("initialize should succeed");
        let output = client
            .call_tool("echo", json!({"message": "hello"}))
            .await
            .expect("call_tool should reconnect and retry");
        assert_eq!(output, ToolOutput::text("tool ok"));
    }

    #[tokio::test]
    async fn list_tools_requires_initialize() {
        let mut client = MCPClient::new(Box::new(MockBootstrapTransport::new(Vec::new())));
        let err = client
            .list_tools()
            .await
            .expect_err("listing tools should require initialize");
        assert!(matches!(err, ConfabError::InvalidState(_)));
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let mut client = MCPClient::from_running_service(scripted_running_service(
            MockSessionBehavior::ListTools {
                tool_name: "weather".into(),
            },
        ));
        client.close().await.expect("close should succeed");
        assert_eq!(client.connection_state(), MCPConnectionState::Closed);
        let err = client
            .initialize()
            .await
            .expect_err("closed client should not reinitialize");
        assert!(matches!(err, ConfabError::InvalidState(_)));
    }

    #[test]
    fn map_service_error_timeout_maps_to_timeout_error() {
        let err = map_service_error(
            "call_tool",
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert!(matches!(err, ConfabError::Timeout(2750)));
    }

    #[test]
    fn reconnect_predicate_treats_cancelled_as_transient() {
        let cancelled = ServiceError::Cancelled {
            reason: Some("transport dropped".into()),
        };
        assert!(MCPClient::should_reconnect_after_service_error(&cancelled));
    }
}
