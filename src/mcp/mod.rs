//! Model Context Protocol (MCP) client and tool provider.

pub mod bridge;
pub mod client;
pub mod schema;
pub mod transport;

pub use bridge::{MCPConnectOptions, MCPToolProvider, DEFAULT_READ_TIMEOUT};
pub use client::{MCPClient, MCPConnectionState, ServerIdentity, DEFAULT_CONNECT_TIMEOUT};
pub use schema::MCPToolSchema;
pub use transport::{MCPTransport, StdioTransport, StreamableHttpTransport};
