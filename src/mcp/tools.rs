//! Tool definitions and dispatch
//!
//! Exposes the same operations as the HTTP surface as named tools with JSON
//! payloads identical to the HTTP bodies.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult,
    ToolDefinition,
};
use crate::api::{combined_search, AppState};
use crate::error::{MemoryError, Result};
use crate::hydrate::hydrate;
use crate::tasks::Task;
use crate::types::{
    AckResponse, CreateLongTermMemoryRequest, GetSessionsQuery, MemoryPromptRequest,
    MemoryPromptResponse, SearchRequest, SessionListResponse, WorkingMemory,
};

/// Definitions advertised by `tools/list`
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    let session_props = json!({
        "session_id": {"type": "string"},
        "namespace": {"type": "string"}
    });

    vec![
        ToolDefinition {
            name: "get_working_memory".to_string(),
            description: "Read a session's working memory: messages, pending memories, and summary"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": session_props,
                "required": ["session_id"]
            }),
        },
        ToolDefinition {
            name: "put_working_memory".to_string(),
            description: "Replace a session's working memory; triggers summarization and promotion"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string"},
                    "namespace": {"type": "string"},
                    "memory": {"type": "object"},
                    "version": {"type": "integer"}
                },
                "required": ["session_id", "memory"]
            }),
        },
        ToolDefinition {
            name: "delete_working_memory".to_string(),
            description: "Delete a session's working memory".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": session_props,
                "required": ["session_id"]
            }),
        },
        ToolDefinition {
            name: "list_sessions".to_string(),
            description: "List session ids with pagination".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string"},
                    "user_id": {"type": "string"},
                    "limit": {"type": "integer"},
                    "offset": {"type": "integer"}
                }
            }),
        },
        ToolDefinition {
            name: "create_long_term_memory".to_string(),
            description: "Store discrete memories in long-term storage (indexed in the background)"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "memories": {"type": "array", "items": {"type": "object"}}
                },
                "required": ["memories"]
            }),
        },
        ToolDefinition {
            name: "search_long_term_memory".to_string(),
            description: "Semantic search over long-term memory with structured filters"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "limit": {"type": "integer"},
                    "offset": {"type": "integer"},
                    "distance_threshold": {"type": "number"}
                }
            }),
        },
        ToolDefinition {
            name: "search_memory".to_string(),
            description: "Search working and long-term memory together, tagging each hit's origin"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "limit": {"type": "integer"},
                    "offset": {"type": "integer"}
                }
            }),
        },
        ToolDefinition {
            name: "memory_prompt".to_string(),
            description: "Hydrate a query into LLM-ready messages from session and long-term memory"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "session": {"type": "object"},
                    "long_term_search": {"type": "object"}
                },
                "required": ["query"]
            }),
        },
    ]
}

#[derive(Deserialize)]
struct SessionParams {
    session_id: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct PutParams {
    session_id: String,
    #[serde(default)]
    namespace: Option<String>,
    memory: WorkingMemory,
    #[serde(default)]
    version: Option<u64>,
}

/// Dispatches tool calls against the shared application state
pub struct McpToolHandler {
    state: AppState,
}

impl McpToolHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<ToolCallResult> {
        match name {
            "get_working_memory" => {
                let p: SessionParams = parse_params(params)?;
                let (memory, version) = self
                    .state
                    .working
                    .get(p.namespace.as_deref(), &p.session_id)
                    .ok_or_else(|| {
                        MemoryError::NotFound(format!("session {}", p.session_id))
                    })?;
                Ok(ToolCallResult::json(&self.state.working.build_response(
                    memory, version, None, None,
                )))
            }
            "put_working_memory" => {
                let p: PutParams = parse_params(params)?;
                let (memory, version) = self.state.working.put(
                    p.namespace.as_deref(),
                    &p.session_id,
                    p.memory,
                    p.version,
                )?;
                Ok(ToolCallResult::json(&self.state.working.build_response(
                    memory, version, None, None,
                )))
            }
            "delete_working_memory" => {
                let p: SessionParams = parse_params(params)?;
                self.state
                    .working
                    .delete(p.namespace.as_deref(), &p.session_id);
                Ok(ToolCallResult::json(&AckResponse::ok()))
            }
            "list_sessions" => {
                let p: GetSessionsQuery = parse_params(params)?;
                let (sessions, total) = self.state.working.list(
                    p.namespace.as_deref(),
                    p.user_id.as_deref(),
                    p.limit,
                    p.offset,
                );
                Ok(ToolCallResult::json(&SessionListResponse {
                    sessions,
                    total,
                }))
            }
            "create_long_term_memory" => {
                let p: CreateLongTermMemoryRequest = parse_params(params)?;
                if !self.state.settings.long_term_enabled {
                    return Err(MemoryError::InvalidInput(
                        "long-term memory is disabled".to_string(),
                    ));
                }
                self.state.scheduler.schedule(Task::Index {
                    records: p.memories,
                    deduplicate: true,
                })?;
                Ok(ToolCallResult::json(&AckResponse::ok()))
            }
            "search_long_term_memory" => {
                let p: SearchRequest = parse_params(params)?;
                Ok(ToolCallResult::json(&self.state.engine.search(p).await?))
            }
            "search_memory" => {
                let p: SearchRequest = parse_params(params)?;
                Ok(ToolCallResult::json(
                    &combined_search(&self.state, p).await?,
                ))
            }
            "memory_prompt" => {
                let p: MemoryPromptRequest = parse_params(params)?;
                let messages = hydrate(&self.state.working, &self.state.engine, p).await?;
                Ok(ToolCallResult::json(&MemoryPromptResponse { messages }))
            }
            _ => Err(MemoryError::InvalidInput(format!("unknown tool: {}", name))),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    let params = match params {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(params)
        .map_err(|e| MemoryError::InvalidInput(format!("invalid tool arguments: {}", e)))
}

#[async_trait]
impl McpHandler for McpToolHandler {
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => McpResponse::success(
                request.id,
                serde_json::to_value(InitializeResult::default()).unwrap_or_default(),
            ),
            methods::LIST_TOOLS => McpResponse::success(
                request.id,
                json!({"tools": get_tool_definitions()}),
            ),
            methods::CALL_TOOL => {
                let name = request.params["name"].as_str().unwrap_or_default().to_string();
                let arguments = request.params["arguments"].clone();
                match self.call_tool(&name, arguments).await {
                    Ok(result) => McpResponse::success(
                        request.id,
                        serde_json::to_value(result).unwrap_or_default(),
                    ),
                    Err(err) => McpResponse::from_error(request.id, err),
                }
            }
            other => McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", other),
            ),
        }
    }
}
