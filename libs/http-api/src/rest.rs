use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use sentiment_api::RecordQuery;
use topic_engine::TopicQuery;

use crate::{status_for, AppState};

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/records?limit=&order=
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> Response {
    let Some(store) = state.store.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match store.list(&query).await {
        Ok(records) => axum::Json(records).into_response(),
        Err(e) => {
            tracing::error!(store = store.name(), error = %e, "list records failed");
            (status_for(&e), e.to_string()).into_response()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_topics(State(state): State<AppState>) -> Response {
    match state.topics.as_ref() {
        Some(topics) => axum::Json(topics.topics()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics/{name}?from=&to=&limit=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct TopicQueryParams {
    from: Option<i64>,
    to: Option<i64>,
    limit: Option<usize>,
}

pub(crate) async fn handle_query_topic(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<TopicQueryParams>,
) -> Response {
    let Some(topics) = state.topics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let query = TopicQuery {
        from_ms: params.from,
        to_ms: params.to,
        limit: params.limit,
    };

    match topics.query(&name, &query).await {
        Ok(messages) => axum::Json(messages).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, format!("error: {e}")).into_response(),
    }
}

pub(crate) async fn handle_dead_letters(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let Some(topics) = state.topics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match topics.dead_letters(&name) {
        Ok(letters) => axum::Json(letters).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, format!("error: {e}")).into_response(),
    }
}
