//! Hosted actions: tools executed by the completion backend's own tool runner.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::arguments::ToolArguments;
use super::output::ToolOutput;
use super::provider::ToolProvider;
use super::schema::{ParameterBuilder, ToolSchema};
use crate::backend::http::bearer_headers;
use crate::config::ConfabConfig;
use crate::error::{ConfabError, Result};

/// Default server-side timeout for one hosted action, in seconds.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 60;

/// A tool the backend runs on the caller's behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedAction {
    pub action_name: String,
    pub tool_name: String,
    pub schema: ToolSchema,
}

impl HostedAction {
    pub fn new(
        action_name: impl Into<String>,
        tool_name: impl Into<String>,
        schema: ToolSchema,
    ) -> Self {
        Self {
            action_name: action_name.into(),
            tool_name: tool_name.into(),
            schema,
        }
    }

    /// Name the model calls this action by.
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Evaluate a mathematical expression.
    pub fn calculator() -> Self {
        Self::new(
            "Calculator",
            "Calculator",
            ToolSchema::new(
                "calculator",
                "Evaluate a given mathematical expression",
                ParameterBuilder::new()
                    .string(
                        "input",
                        "The mathematical expression in Wolfram Language InputForm",
                        true,
                    )
                    .build(),
            ),
        )
    }

    /// Fetch title and content of web pages, PDFs or videos.
    pub fn link_reader() -> Self {
        Self::new(
            "LinkReader",
            "LinkReader",
            ToolSchema::new(
                "link_reader",
                "Read the title and content behind one or more links",
                ParameterBuilder::new()
                    .string_array("url_list", "Links to read, at most 3", true)
                    .build(),
            ),
        )
    }
}

/// Request body for `POST /tools/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostedActionRequest {
    pub action_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub dry_run: bool,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HostedActionResponse {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Executes hosted action requests against the backend.
#[async_trait]
pub trait HostedActionClient: Send + Sync {
    async fn execute(&self, request: &HostedActionRequest) -> Result<HostedActionResponse>;
}

/// [`HostedActionClient`] speaking HTTP with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpHostedActionClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpHostedActionClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from resolved configuration; requires an API key.
    pub fn from_config(config: &ConfabConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| ConfabError::MissingCredential("CONFAB_API_KEY".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()?;
        Ok(Self {
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

}

#[async_trait]
impl HostedActionClient for HttpHostedActionClient {
    async fn execute(&self, request: &HostedActionRequest) -> Result<HostedActionResponse> {
        let url = format!("{}/tools/execute", self.base_url);
        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(request)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConfabError::api(status, body));
        }
        Ok(resp.json::<HostedActionResponse>().await?)
    }
}

/// Tool provider that forwards every call to the hosted action runner.
pub struct HostedActionProvider {
    name: String,
    actions: Vec<HostedAction>,
    client: Box<dyn HostedActionClient>,
    dry_run: bool,
    timeout_secs: u64,
}

impl HostedActionProvider {
    pub fn new(client: impl HostedActionClient + 'static) -> Self {
        Self {
            name: "hosted".into(),
            actions: Vec::new(),
            client: Box::new(client),
            dry_run: false,
            timeout_secs: DEFAULT_ACTION_TIMEOUT_SECS,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_action(mut self, action: HostedAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Ask the runner to validate calls without performing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn action(&self, name: &str) -> Option<&HostedAction> {
        self.actions.iter().find(|action| action.name() == name)
    }
}

#[async_trait]
impl ToolProvider for HostedActionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        Ok(self.actions.iter().map(|a| a.schema.clone()).collect())
    }

    async fn refresh_tools(&self) -> Result<Vec<ToolSchema>> {
        self.list_tools().await
    }

    async fn execute_tool(&self, name: &str, arguments: &ToolArguments) -> Result<ToolOutput> {
        let action = self
            .action(name)
            .ok_or_else(|| ConfabError::UnknownTool(name.to_string()))?;

        let request = HostedActionRequest {
            action_name: action.action_name.clone(),
            tool_name: action.tool_name.clone(),
            parameters: arguments.raw().clone(),
            dry_run: self.dry_run,
            timeout: self.timeout_secs,
        };
        debug!(
            provider = %self.name,
            action = %request.action_name,
            tool = %request.tool_name,
            "executing hosted action"
        );

        let response = self
            .client
            .execute(&request)
            .await
            .map_err(|err| ConfabError::tool_execution(name, err.to_string()))?;

        if let Some(status) = response.status_code {
            if !(200..300).contains(&status) {
                let detail = response
                    .data
                    .map(|data| data.to_string())
                    .unwrap_or_default();
                return Err(ConfabError::tool_execution(
                    name,
                    format!("hosted action returned status {status}: {detail}"),
                ));
            }
        }

        Ok(ToolOutput::from_value(
            response.data.unwrap_or(serde_json::Value::Null),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingClient {
        response: HostedActionResponse,
        requests: Mutex<Vec<HostedActionRequest>>,
    }

    impl RecordingClient {
        fn returning(response: HostedActionResponse) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HostedActionClient for std::sync::Arc<RecordingClient> {
        async fn execute(&self, request: &HostedActionRequest) -> Result<HostedActionResponse> {
            self.requests
                .lock()
                .expect("requests mutex should lock")
                .push(request.clone());
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn execute_builds_action_request() {
        let client = std::sync::Arc::new(RecordingClient::returning(HostedActionResponse {
            status_code: Some(200),
            data: Some(json!("42")),
        }));
        let provider = HostedActionProvider::new(std::sync::Arc::clone(&client))
            .with_action(HostedAction::calculator());

        let output = provider
            .execute_tool("calculator", &ToolArguments::new(json!({ "input": "6*7" })))
            .await
            .expect("hosted call should succeed");
        assert_eq!(output, ToolOutput::text("42"));

        let requests = client.requests.lock().expect("requests mutex should lock");
        assert_eq!(
            requests[0],
            HostedActionRequest {
                action_name: "Calculator".into(),
                tool_name: "Calculator".into(),
                parameters: json!({ "input": "6*7" }),
                dry_run: false,
                timeout: DEFAULT_ACTION_TIMEOUT_SECS,
            }
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_tool_error() {
        let client = std::sync::Arc::new(RecordingClient::returning(HostedActionResponse {
            status_code: Some(500),
            data: Some(json!({ "message": "runner down" })),
        }));
        let provider = HostedActionProvider::new(client).with_action(HostedAction::link_reader());

        let err = provider
            .execute_tool(
                "link_reader",
                &ToolArguments::new(json!({ "url_list": ["a.com"] })),
            )
            .await
            .expect_err("500 should fail");
        assert!(matches!(
            err,
            ConfabError::ToolExecution { tool_name, message }
            if tool_name == "link_reader" && message.contains("runner down")
        ));
    }

    #[tokio::test]
    async fn lists_configured_actions_in_order() {
        let client = std::sync::Arc::new(RecordingClient::returning(Default::default()));
        let provider = HostedActionProvider::new(client)
            .with_action(HostedAction::calculator())
            .with_action(HostedAction::link_reader());
        let names: Vec<_> = provider
            .list_tools()
            .await
            .expect("list should succeed")
            .into_iter()
            .map(|schema| schema.function.name)
            .collect();
        assert_eq!(names, vec!["calculator", "link_reader"]);
    }
}
