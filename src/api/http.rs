//! HTTP surface
//!
//! REST API over the working-memory store and the long-term engine. Writes
//! that fan out background work return as soon as the work is enqueued.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::{combined_search, AppState};
use crate::error::MemoryError;
use crate::hydrate::hydrate;
use crate::tasks::Task;
use crate::types::{
    AckResponse, CreateLongTermMemoryRequest, GetSessionMemoryQuery, GetSessionsQuery,
    HealthCheckResponse, MemoryPromptRequest, MemoryPromptResponse, MemoryRecordResults,
    NamespaceQuery, PutWorkingMemoryRequest, SearchRequest, SessionListResponse,
    WorkingMemoryResponse,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/", get(list_sessions))
        .route(
            "/sessions/:id/memory",
            get(get_session_memory)
                .put(put_session_memory)
                .delete(delete_session_memory),
        )
        .route("/long-term-memory", post(create_long_term_memory))
        .route("/long-term-memory/search", post(search_long_term_memory))
        .route("/memory/search", post(search_combined))
        .route("/memory-prompt", post(memory_prompt))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        now: Utc::now().timestamp_millis(),
    })
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<GetSessionsQuery>,
) -> ApiResult<SessionListResponse> {
    let (sessions, total) = state.working.list(
        query.namespace.as_deref(),
        query.user_id.as_deref(),
        query.limit,
        query.offset,
    );
    Ok(Json(SessionListResponse { sessions, total }))
}

async fn get_session_memory(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<GetSessionMemoryQuery>,
) -> ApiResult<WorkingMemoryResponse> {
    let (mut memory, version) = state
        .working
        .get(query.namespace.as_deref(), &session_id)
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", session_id)))?;

    if let Some(window) = query.window_size {
        let skip = memory.messages.len().saturating_sub(window);
        memory.messages.drain(..skip);
    }

    Ok(Json(state.working.build_response(
        memory,
        version,
        query.model_name.as_deref(),
        query.context_window_max,
    )))
}

async fn put_session_memory(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<NamespaceQuery>,
    Json(body): Json<PutWorkingMemoryRequest>,
) -> ApiResult<WorkingMemoryResponse> {
    let (memory, version) = state.working.put(
        query.namespace.as_deref(),
        &session_id,
        body.memory,
        body.version,
    )?;
    Ok(Json(state.working.build_response(memory, version, None, None)))
}

async fn delete_session_memory(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> ApiResult<AckResponse> {
    state.working.delete(query.namespace.as_deref(), &session_id);
    Ok(Json(AckResponse::ok()))
}

async fn create_long_term_memory(
    State(state): State<AppState>,
    Json(body): Json<CreateLongTermMemoryRequest>,
) -> ApiResult<AckResponse> {
    if !state.settings.long_term_enabled {
        return Err(MemoryError::InvalidInput("long-term memory is disabled".to_string()).into());
    }
    if body.memories.is_empty() {
        return Err(
            MemoryError::InvalidInput("memories must be non-empty".to_string()).into(),
        );
    }

    // indexing happens in the background; the handler returns after enqueue
    state.scheduler.schedule(Task::Index {
        records: body.memories,
        deduplicate: true,
    })?;
    Ok(Json(AckResponse::ok()))
}

async fn search_long_term_memory(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<MemoryRecordResults> {
    Ok(Json(state.engine.search(request).await?))
}

async fn search_combined(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<MemoryRecordResults> {
    Ok(Json(combined_search(&state, request).await?))
}

async fn memory_prompt(
    State(state): State<AppState>,
    Json(request): Json<MemoryPromptRequest>,
) -> ApiResult<MemoryPromptResponse> {
    let messages = hydrate(&state.working, &state.engine, request).await?;
    Ok(Json(MemoryPromptResponse { messages }))
}
