//! Tool-call surface (MCP-style JSON-RPC over stdio)

mod protocol;
mod tools;

pub use protocol::{
    methods, InitializeResult, McpError, McpHandler, McpRequest, McpResponse, McpServer,
    ServerInfo, ToolCallResult, ToolContent, ToolDefinition,
};
pub use tools::{get_tool_definitions, McpToolHandler};
