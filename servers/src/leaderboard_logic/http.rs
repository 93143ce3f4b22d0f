//! HTTP surface of the leaderboard service: the /api/v1 routes, health
//! probes, the websocket upgrade endpoint, and the response envelope.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use lib_ranking::models::{BatchScoreSubmission, CreateLeaderboardRequest, RankingError, ScoreSubmission};

use crate::leaderboard_logic::state::AppState;
use crate::leaderboard_logic::ws;

/// Standard response envelope. Every endpoint answers with this shape.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

/// Error half of the envelope, carrying the HTTP status derived from the
/// error taxonomy.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RankingError> for ApiError {
    fn from(err: RankingError) -> Self {
        let status = match &err {
            RankingError::PlayerNotFound | RankingError::LeaderboardNotFound => {
                StatusCode::NOT_FOUND
            }
            RankingError::LeaderboardExists => StatusCode::CONFLICT,
            RankingError::InvalidScore
            | RankingError::InvalidLeaderboard
            | RankingError::InvalidRequest => StatusCode::BAD_REQUEST,
            RankingError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RankingError::Cache(_) | RankingError::Database(_) | RankingError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("internal error: {err}");
        }
        ApiError {
            status,
            message: err.public_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(self.message),
            }),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/ws", get(ws::ws_handler))
        .route("/api/v1/scores", post(submit_score))
        .route("/api/v1/scores/batch", post(submit_batch))
        .route(
            "/api/v1/leaderboards",
            post(create_leaderboard).get(list_leaderboards),
        )
        .route(
            "/api/v1/leaderboards/{leaderboard_id}",
            get(get_leaderboard).delete(delete_leaderboard),
        )
        .route("/api/v1/leaderboards/{leaderboard_id}/reset", post(reset_leaderboard))
        .route("/api/v1/leaderboards/{leaderboard_id}/stats", get(get_stats))
        .route("/api/v1/leaderboards/{leaderboard_id}/top", get(get_top))
        .route("/api/v1/leaderboards/{leaderboard_id}/range", get(get_range))
        .route(
            "/api/v1/leaderboards/{leaderboard_id}/around/{player_id}",
            get(get_around),
        )
        .route(
            "/api/v1/leaderboards/{leaderboard_id}/player/{player_id}",
            get(get_player_rank).delete(remove_player),
        )
        .route("/api/v1/ws/stats", get(ws_stats))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Response {
    ok(json!({"status": "healthy"}))
}

async fn ready() -> Response {
    ok(json!({"status": "ready"}))
}

async fn ws_stats(State(state): State<AppState>) -> Response {
    ok(json!({"total_connections": state.hub.total_connections()}))
}

async fn submit_score(
    State(state): State<AppState>,
    body: Result<Json<ScoreSubmission>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(submission) = body.map_err(|_| RankingError::InvalidRequest)?;
    if !submission.is_valid() {
        return Err(RankingError::InvalidRequest.into());
    }
    state.service.submit_score(submission).await?;
    Ok(ok(json!({"status": "accepted"})))
}

async fn submit_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchScoreSubmission>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(batch) = body.map_err(|_| RankingError::InvalidRequest)?;
    if batch.scores.is_empty() {
        return Err(RankingError::InvalidRequest.into());
    }
    let received = batch.scores.len();
    let outcome = state.service.submit_batch(batch).await;
    Ok(ok(json!({
        "status": "accepted",
        "received": received,
        "submitted": outcome.submitted,
        "failed": outcome.failed,
    })))
}

async fn create_leaderboard(
    State(state): State<AppState>,
    body: Result<Json<CreateLeaderboardRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|_| RankingError::InvalidRequest)?;
    let config = state.service.create_leaderboard(request).await?;
    Ok(created(config))
}

async fn list_leaderboards(State(state): State<AppState>) -> Result<Response, ApiError> {
    let configs = state.service.list_leaderboards().await?;
    Ok(ok(configs))
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
) -> Result<Response, ApiError> {
    let config = state.service.get_leaderboard(&leaderboard_id).await?;
    Ok(ok(config))
}

async fn delete_leaderboard(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
) -> Result<Response, ApiError> {
    state.service.delete_leaderboard(&leaderboard_id).await?;
    Ok(ok(json!({"status": "deleted"})))
}

async fn reset_leaderboard(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
) -> Result<Response, ApiError> {
    state.service.reset_leaderboard(&leaderboard_id).await?;
    Ok(ok(json!({"status": "reset"})))
}

async fn get_stats(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
) -> Result<Response, ApiError> {
    let stats = state.service.stats(&leaderboard_id).await?;
    Ok(ok(stats))
}

async fn get_top(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let limit = parse_param(&params, "limit");
    let entries = state.service.top(&leaderboard_id, limit).await?;
    Ok(ok(entries))
}

async fn get_range(
    State(state): State<AppState>,
    Path(leaderboard_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let start = parse_param(&params, "start").unwrap_or(0);
    let end = parse_param(&params, "end").unwrap_or(10);
    let entries = state.service.range(&leaderboard_id, start, end).await?;
    Ok(ok(entries))
}

async fn get_around(
    State(state): State<AppState>,
    Path((leaderboard_id, player_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let radius = parse_param(&params, "range");
    let entries = state
        .service
        .around(&leaderboard_id, &player_id, radius)
        .await?;
    Ok(ok(entries))
}

async fn get_player_rank(
    State(state): State<AppState>,
    Path((leaderboard_id, player_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let entry = state.service.player_rank(&leaderboard_id, &player_id).await?;
    Ok(ok(entry))
}

async fn remove_player(
    State(state): State<AppState>,
    Path((leaderboard_id, player_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state
        .service
        .remove_player(&leaderboard_id, &player_id)
        .await?;
    Ok(ok(json!({"status": "removed"})))
}

/// Query parameters are parsed leniently: absent or unparseable values fall
/// back to the handler's default instead of rejecting the request.
fn parse_param(params: &HashMap<String, String>, name: &str) -> Option<i64> {
    params.get(name).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        let cases = [
            (RankingError::PlayerNotFound, StatusCode::NOT_FOUND),
            (RankingError::LeaderboardNotFound, StatusCode::NOT_FOUND),
            (RankingError::LeaderboardExists, StatusCode::CONFLICT),
            (RankingError::InvalidLeaderboard, StatusCode::BAD_REQUEST),
            (RankingError::InvalidRequest, StatusCode::BAD_REQUEST),
            (RankingError::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn envelope_shape() {
        let body = serde_json::to_value(ApiResponse {
            success: true,
            data: Some(json!({"status": "accepted"})),
            error: None,
        })
        .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "accepted");
        assert!(body.get("error").is_none());

        let failure = serde_json::to_value(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some("leaderboard already exists".into()),
        })
        .unwrap();
        assert_eq!(failure["success"], false);
        assert_eq!(failure["error"], "leaderboard already exists");
    }

    #[test]
    fn lenient_query_parsing() {
        let mut params = HashMap::new();
        params.insert("limit".to_string(), "25".to_string());
        params.insert("range".to_string(), "bogus".to_string());
        assert_eq!(parse_param(&params, "limit"), Some(25));
        assert_eq!(parse_param(&params, "range"), None);
        assert_eq!(parse_param(&params, "missing"), None);
    }
}
