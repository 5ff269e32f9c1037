//! MCP schema types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tools::schema::{fill_param_descriptions, ToolSchema};

/// Schema for a tool exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MCPToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl MCPToolSchema {
    /// Normalize into the canonical manifest, filling missing property
    /// descriptions from `param_descriptions`.
    pub fn into_tool_schema(self, param_descriptions: &HashMap<String, String>) -> ToolSchema {
        let mut parameters = self.input_schema;
        fill_param_descriptions(&mut parameters, param_descriptions);
        ToolSchema::new(self.name, self.description.unwrap_or_default(), parameters)
    }
}

impl From<rmcp::model::Tool> for MCPToolSchema {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        }
    }
}
