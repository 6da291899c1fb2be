use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::{AppState, CycleOutcome};

/// Service fee applied to plan prices and conversions.
pub const FEE_MULTIPLIER: f64 = 1.08;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RateResponse {
    #[serde(rename = "bcv")]
    pub rate: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlansResponse {
    pub price_20: f64,
    pub price_25: f64,
    pub price_30: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversionResponse {
    pub conversion: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    /// Tier the rate came from: today, fetched, latest_known or unknown
    pub source: String,
    pub rate: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConvertParams {
    /// Amount in foreign currency to convert
    pub amount: Option<String>,
}

/// Rounds to cents.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn priced(amount: f64, rate: f64) -> f64 {
    round2(amount * rate * FEE_MULTIPLIER)
}

fn current_rate(state: &AppState) -> Result<f64, (StatusCode, String)> {
    let rate = state.cache.get();
    if rate > 0.0 {
        Ok(rate)
    } else {
        warn!("rate requested before any rate was established");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "rate not yet available".to_string(),
        ))
    }
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = OK, description = "Current published rate", body = RateResponse),
        (status = SERVICE_UNAVAILABLE, description = "No rate has been established yet")
    ))]
pub async fn get_rate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RateResponse>, (StatusCode, String)> {
    let rate = current_rate(&state)?;
    Ok(Json(RateResponse { rate }))
}

#[utoipa::path(
    get,
    path = "/plans",
    responses(
        (status = OK, description = "Plan prices at the current rate, fee included", body = PlansResponse),
        (status = SERVICE_UNAVAILABLE, description = "No rate has been established yet")
    ))]
pub async fn get_plans(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlansResponse>, (StatusCode, String)> {
    let rate = current_rate(&state)?;
    Ok(Json(PlansResponse {
        price_20: priced(20.0, rate),
        price_25: priced(25.0, rate),
        price_30: priced(30.0, rate),
    }))
}

#[utoipa::path(
    get,
    path = "/convert",
    params(ConvertParams),
    responses(
        (status = OK, description = "Amount converted at the current rate, fee included", body = ConversionResponse),
        (status = BAD_REQUEST, description = "Invalid amount parameter"),
        (status = SERVICE_UNAVAILABLE, description = "No rate has been established yet")
    ))]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConvertParams>,
) -> Result<Json<ConversionResponse>, (StatusCode, String)> {
    let amount = params
        .amount
        .as_deref()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|amount| amount.is_finite() && *amount >= 0.0)
        .ok_or((
            StatusCode::BAD_REQUEST,
            "Invalid amount parameter".to_string(),
        ))?;

    let rate = current_rate(&state)?;
    Ok(Json(ConversionResponse {
        conversion: priced(amount, rate),
    }))
}

#[utoipa::path(
    post,
    path = "/rate/refresh",
    responses(
        (status = OK, description = "Ran one update cycle", body = RefreshResponse),
        (status = CONFLICT, description = "An update cycle is already running"),
        (status = INTERNAL_SERVER_ERROR, description = "The update task failed")
    ))]
pub async fn refresh_rate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    // A dropped request must not abandon the cycle halfway through.
    let updater = state.updater.clone();
    let outcome = tokio::spawn(async move { updater.run_cycle().await })
        .await
        .map_err(|e| {
            error!("manual refresh task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "rate update failed".to_string(),
            )
        })?;

    match outcome {
        CycleOutcome::Resolved(resolution) => {
            info!("manual refresh resolved from {}", resolution.source());
            Ok(Json(RefreshResponse {
                source: resolution.source().to_string(),
                rate: resolution.value(),
            }))
        }
        CycleOutcome::Skipped => Err((
            StatusCode::CONFLICT,
            "a rate update is already running".to_string(),
        )),
    }
}
