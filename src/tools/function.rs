//! In-process function tools.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::arguments::ToolArguments;
use super::output::ToolOutput;
use super::provider::ToolProvider;
use super::schema::{fill_param_descriptions, ToolSchema};
use crate::error::{ConfabError, Result};

type FunctionHandler =
    dyn Fn(ToolArguments) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync;

/// A named async function with its parameter schema.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    handler: Arc<FunctionHandler>,
}

impl FunctionTool {
    /// Create a tool from a closure over raw arguments.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    /// Create a tool whose arguments deserialize into `A` and whose return
    /// value serializes from `R`.
    pub fn typed<A, R, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(name, description, parameters, move |args: ToolArguments| {
            let handler = Arc::clone(&handler);
            async move {
                let input: A = args.deserialize()?;
                let output = handler(input).await?;
                Ok(serde_json::to_value(output)?)
            }
        })
    }

    /// Supply descriptions for properties whose schema omits one.
    pub fn param_descriptions<I, K, V>(mut self, descriptions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let descriptions: HashMap<String, String> = descriptions
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        fill_param_descriptions(&mut self.parameters, &descriptions);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        )
    }

    /// Run the function and normalize its return value.
    ///
    /// Any failure is reported as [`ConfabError::ToolExecution`] for this tool.
    pub async fn call(&self, arguments: ToolArguments) -> Result<ToolOutput> {
        match (self.handler)(arguments).await {
            Ok(value) => Ok(ToolOutput::from_value(value)),
            Err(err @ ConfabError::ToolExecution { .. }) => Err(err),
            Err(err) => Err(ConfabError::tool_execution(&self.name, err.to_string())),
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Instance-owned registry of function tools, in registration order.
#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    tools: Vec<FunctionTool>,
    index: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name is rejected.
    pub fn register(&mut self, tool: FunctionTool) -> Result<()> {
        if self.index.contains_key(tool.name()) {
            return Err(ConfabError::Configuration(format!(
                "function tool '{}' is already registered",
                tool.name()
            )));
        }
        self.index.insert(tool.name().to_string(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: FunctionTool) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionTool> {
        self.index.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionTool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(FunctionTool::schema).collect()
    }
}

/// Tool provider backed by a [`FunctionRegistry`].
#[derive(Debug)]
pub struct FunctionToolProvider {
    name: String,
    registry: FunctionRegistry,
}

impl FunctionToolProvider {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self::named("functions", registry)
    }

    pub fn named(name: impl Into<String>, registry: FunctionRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolProvider for FunctionToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        debug!(
            provider = %self.name,
            tools = self.registry.len(),
            "function provider ready"
        );
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>> {
        Ok(self.registry.schemas())
    }

    async fn refresh_tools(&self) -> Result<Vec<ToolSchema>> {
        Ok(self.registry.schemas())
    }

    async fn execute_tool(&self, name: &str, arguments: &ToolArguments) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ConfabError::UnknownTool(name.to_string()))?;
        tool.call(arguments.clone()).await
    }
}
