// HTTP façade over StationService
//
// Every failure body is `{"message": ...}`; the status code carries the kind
// (400 for bad ids or bodies, 500 for store failures). A missing station is not
// an error: lookups answer `null`, update/delete answer zero counts.

use crate::error::StationError;
use crate::service::StationService;
use crate::station::{DeleteAck, Station, StationUpdate, UpdateAck};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::path::Path as FsPath;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: StationService,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(StationError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<StationError> for ApiError {
    fn from(err: StationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Station request failed");
        } else {
            tracing::debug!(error = %self.0, "Rejected station request");
        }

        let body = MessageBody {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim().parse::<i64>().map_err(|_| {
        ApiError(StationError::InvalidInput(format!(
            "station id must be an integer, got {:?}",
            raw
        )))
    })
}

// ============================================================================
// Station handlers
// ============================================================================

/// GET /stations - ids of all stations
async fn list_stations(State(state): State<AppState>) -> ApiResult<Vec<i64>> {
    Ok(Json(state.service.list_ids()?))
}

/// GET /stations/add - create one random station
async fn add_station(State(state): State<AppState>) -> ApiResult<Station> {
    let station = state.service.create()?;
    tracing::debug!(station_id = station.id, "Station created");
    Ok(Json(station))
}

/// GET /stations/:id - one station or null
async fn view_station(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Option<Station>> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.service.get(id)?))
}

/// PATCH /stations/:id - set actual (and date)
async fn update_station(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<StationUpdate>, JsonRejection>,
) -> ApiResult<UpdateAck> {
    let id = parse_id(&raw_id)?;
    let Json(update) =
        payload.map_err(|rejection| StationError::InvalidInput(rejection.body_text()))?;

    Ok(Json(state.service.update(id, update)?))
}

/// GET /stations/delete/:id and DELETE /stations/:id
async fn delete_station(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<DeleteAck> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.service.delete(id)?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

// ============================================================================
// Pages
// ============================================================================

/// GET / - overview page
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

/// GET /1/ - station list page
async fn serve_page_one() -> impl IntoResponse {
    Html(include_str!("../web/1/indexOne.html"))
}

/// GET /2/ - station editor page
async fn serve_page_two() -> impl IntoResponse {
    Html(include_str!("../web/2/indexTwo.html"))
}

// ============================================================================
// Router
// ============================================================================

/// Station routes and pages, without middleware
pub fn create_router(service: StationService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/", get(serve_index))
        .route("/1", get(serve_page_one))
        .route("/1/", get(serve_page_one))
        .route("/2", get(serve_page_two))
        .route("/2/", get(serve_page_two))
        .route("/health", get(health_check))
        .route("/stations", get(list_stations))
        .route("/stations/", get(list_stations))
        .route("/stations/add", get(add_station))
        .route("/stations/delete/:id", get(delete_station))
        .route(
            "/stations/:id",
            get(view_station).patch(update_station).delete(delete_station),
        )
        .with_state(state)
}

/// Full application: routes, static assets and middleware
pub fn create_app(service: StationService, static_dir: &FsPath, request_timeout: Duration) -> Router {
    create_router(service)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
