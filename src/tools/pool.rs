//! Aggregation of tool providers behind one name lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::output::ToolOutput;
use super::provider::ToolProvider;
use super::schema::ToolSchema;
use crate::error::{ConfabError, Result};

/// A tool hidden by an earlier provider exposing the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedTool {
    pub tool_name: String,
    /// Provider whose tool is routed.
    pub winner: String,
    /// Provider whose tool is ignored.
    pub shadowed: String,
}

/// Routes tool calls to the provider that owns each tool name.
///
/// Providers are consulted in registration order; when two expose the same
/// name, the first-registered one wins and the collision is recorded in
/// [`ToolPool::shadowed_tools`].
#[derive(Default)]
pub struct ToolPool {
    providers: Vec<Arc<dyn ToolProvider>>,
    schemas: Vec<ToolSchema>,
    routes: HashMap<String, usize>,
    shadowed: Vec<ShadowedTool>,
    connected: bool,
}

impl ToolPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Takes effect on the next `connect` or `refresh_tools`.
    pub fn with_provider(mut self, provider: impl ToolProvider + 'static) -> Self {
        self.add_provider(Arc::new(provider));
        self
    }

    pub fn add_provider(&mut self, provider: Arc<dyn ToolProvider>) {
        self.providers.push(provider);
    }

    pub fn providers(&self) -> &[Arc<dyn ToolProvider>] {
        &self.providers
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect every provider in order and build the routing table.
    ///
    /// The first provider that fails aborts the whole pool with
    /// [`ConfabError::ProviderUnavailable`].
    pub async fn connect(&mut self) -> Result<()> {
        for provider in &self.providers {
            provider
                .connect()
                .await
                .map_err(|err| unavailable(provider.name(), err))?;
        }

        let mut listings = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let tools = provider
                .list_tools()
                .await
                .map_err(|err| unavailable(provider.name(), err))?;
            listings.push(tools);
        }
        self.rebuild(listings);
        self.connected = true;
        Ok(())
    }

    /// Re-list every provider's tools and rebuild routing.
    pub async fn refresh_tools(&mut self) -> Result<&[ToolSchema]> {
        let mut listings = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            listings.push(provider.refresh_tools().await?);
        }
        self.rebuild(listings);
        Ok(&self.schemas)
    }

    /// The merged schema snapshot from the last connect or refresh.
    pub fn list_tools(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolSchema> {
        self.schemas.iter().find(|schema| schema.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Name of the provider that owns `name`.
    pub fn provider_for(&self, name: &str) -> Option<&str> {
        self.routes
            .get(name)
            .map(|&idx| self.providers[idx].name())
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.schemas.iter().map(ToolSchema::name).collect()
    }

    pub fn shadowed_tools(&self) -> &[ShadowedTool] {
        &self.shadowed
    }

    /// Execute a tool by name on its owning provider.
    pub async fn execute_tool(&self, name: &str, arguments: &ToolArguments) -> Result<ToolOutput> {
        let idx = *self
            .routes
            .get(name)
            .ok_or_else(|| ConfabError::UnknownTool(name.to_string()))?;
        let provider = &self.providers[idx];
        debug!(tool = name, provider = provider.name(), "routing tool call");
        provider.execute_tool(name, arguments).await
    }

    /// Close every provider, continuing past failures; returns the first error.
    pub async fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for provider in &self.providers {
            if let Err(err) = provider.close().await {
                warn!(provider = provider.name(), error = %err, "failed to close tool provider");
                first_error.get_or_insert(err);
            }
        }
        self.connected = false;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rebuild(&mut self, listings: Vec<Vec<ToolSchema>>) {
        let mut schemas = Vec::new();
        let mut routes = HashMap::new();
        let mut shadowed = Vec::new();

        for (idx, tools) in listings.into_iter().enumerate() {
            for schema in tools {
                let name = schema.name().to_string();
                if let Some(&owner) = routes.get(&name) {
                    let winner: &Arc<dyn ToolProvider> = &self.providers[owner];
                    warn!(
                        tool = %name,
                        winner = winner.name(),
                        shadowed = self.providers[idx].name(),
                        "duplicate tool name; keeping first-registered provider"
                    );
                    shadowed.push(ShadowedTool {
                        tool_name: name,
                        winner: winner.name().to_string(),
                        shadowed: self.providers[idx].name().to_string(),
                    });
                    continue;
                }
                routes.insert(name, idx);
                schemas.push(schema);
            }
        }

        self.schemas = schemas;
        self.routes = routes;
        self.shadowed = shadowed;
    }
}

impl std::fmt::Debug for ToolPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPool")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("tools", &self.tool_names())
            .field("connected", &self.connected)
            .finish()
    }
}

fn unavailable(provider: &str, err: ConfabError) -> ConfabError {
    match err {
        ConfabError::ProviderUnavailable { .. } | ConfabError::Configuration(_) => err,
        other => ConfabError::ProviderUnavailable {
            provider: provider.to_string(),
            message: other.to_string(),
        },
    }
}
