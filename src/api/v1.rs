#![allow(dead_code)]
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::{error::ApiError, response::ApiResponse},
    auth::AuthBearer,
    config::Config,
    controller::AppState,
    domain::station::{FleetTotals, StationSnapshot},
    manager::TestProfileScenario,
    ocpp::messages::{ChargingProfile, ChargingRateUnit, ClearChargingProfileRequest},
};

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .route("/stations", get(list_stations))
        .route("/stations/scale", post(scale_fleet))
        .route("/stations/start-all", post(start_all))
        .route("/stations/stop-all", post(stop_all))
        .route("/stations/:id/start", post(start_station))
        .route("/stations/:id/stop", post(stop_station))
        .route("/stations/:id/logs", get(station_logs))
        .route(
            "/stations/:id/charging-profile",
            post(send_charging_profile),
        )
        .route(
            "/stations/:id/composite-schedule",
            get(composite_schedule),
        )
        .route(
            "/stations/:id/clear-charging-profile",
            post(clear_charging_profile),
        )
        .route("/stations/:id/test-profile", post(send_test_profile))
        .route("/price", get(get_price).post(set_price))
        .route("/totals", get(get_totals))
        .with_state(state)
        .layer(crate::auth::auth_layer(cfg.auth.token.clone()))
}

// -- fleet-wide -----------------------------------------------------------

async fn list_stations(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
) -> Result<Json<ApiResponse<Vec<StationSnapshot>>>, ApiError> {
    Ok(Json(ApiResponse::success(st.manager.get_snapshot())))
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub count: usize,
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScaleResponse {
    pub station_count: usize,
}

async fn scale_fleet(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Json(req): Json<ScaleRequest>,
) -> Result<Json<ApiResponse<ScaleResponse>>, ApiError> {
    let profile = req.profile.unwrap_or_else(|| st.cfg.fleet.default_profile.clone());
    let station_count = st.manager.scale(req.count, &profile).await?;
    Ok(Json(ApiResponse::success(ScaleResponse { station_count })))
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub affected: usize,
}

async fn start_all(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
) -> Json<ApiResponse<BatchResult>> {
    Json(ApiResponse::success(BatchResult { affected: st.manager.start_all().await }))
}

async fn stop_all(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
) -> Json<ApiResponse<BatchResult>> {
    Json(ApiResponse::success(BatchResult { affected: st.manager.stop_all().await }))
}

async fn get_totals(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
) -> Json<ApiResponse<FleetTotals>> {
    Json(ApiResponse::success(st.manager.get_totals()))
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub price: f64,
}

async fn get_price(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
) -> Json<ApiResponse<PriceResponse>> {
    Json(ApiResponse::success(PriceResponse { price: st.manager.get_price() }))
}

#[derive(Debug, Deserialize)]
pub struct SetPriceRequest {
    pub price: f64,
}

async fn set_price(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Json(req): Json<SetPriceRequest>,
) -> Result<Json<ApiResponse<PriceResponse>>, ApiError> {
    let price = st.manager.set_price(req.price)?;
    Ok(Json(ApiResponse::success(PriceResponse { price })))
}

// -- per-station ------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct StartStationRequest {
    #[serde(default)]
    pub profile: Option<String>,
}

async fn start_station(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
    Json(req): Json<StartStationRequest>,
) -> Result<Json<ApiResponse<StationSnapshot>>, ApiError> {
    let snapshot = st.manager.start_station(&id, req.profile.as_deref()).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn stop_station(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<StationSnapshot>>, ApiError> {
    let snapshot = st.manager.stop_station(&id).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn station_logs(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    Ok(Json(ApiResponse::success(st.manager.get_station_logs(&id)?)))
}

#[derive(Debug, Deserialize)]
pub struct SendChargingProfileRequest {
    pub connector_id: i32,
    pub profile: ChargingProfile,
}

async fn send_charging_profile(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
    Json(req): Json<SendChargingProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = st
        .manager
        .send_charging_profile(&id, req.connector_id, req.profile)
        .await?;
    Ok(Json(ApiResponse::success(resp)))
}

#[derive(Debug, Deserialize)]
pub struct CompositeScheduleQuery {
    pub connector_id: i32,
    pub duration: i64,
    #[serde(default)]
    pub unit: Option<ChargingRateUnit>,
}

async fn composite_schedule(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
    Query(q): Query<CompositeScheduleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = st
        .manager
        .get_composite_schedule(&id, q.connector_id, q.duration, q.unit)
        .await?;
    Ok(Json(ApiResponse::success(resp)))
}

async fn clear_charging_profile(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
    Json(filter): Json<ClearChargingProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = st.manager.clear_charging_profile(&id, filter).await?;
    Ok(Json(ApiResponse::success(resp)))
}

async fn send_test_profile(
    State(st): State<AppState>,
    AuthBearer: AuthBearer,
    Path(id): Path<String>,
    Json(scenario): Json<TestProfileScenario>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = st.manager.send_test_profile(&id, scenario).await?;
    Ok(Json(ApiResponse::success(resp)))
}
