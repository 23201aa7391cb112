use crate::api::AppState;
use crate::domain::{Decimal, ExitState, OrderIntent, TimeMs};
use crate::error::AppError;
use crate::orchestration::{ManualExitRequest, PositionStateView};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtrUpdate {
    /// ATR as a fraction of price; `null` clears it.
    pub atr: Option<Decimal>,
}

pub async fn get_state(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PositionStateView>, AppError> {
    Ok(Json(state.admin.position_state(&id, TimeMs::now()).await?))
}

pub async fn put_atr(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<AtrUpdate>,
) -> Result<Json<ExitState>, AppError> {
    Ok(Json(
        state
            .admin
            .set_cached_atr(&id, update.atr, TimeMs::now())
            .await?,
    ))
}

pub async fn list_intents(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<OrderIntent>>, AppError> {
    Ok(Json(state.admin.list_intents(&id).await?))
}

pub async fn create_exit(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ManualExitRequest>,
) -> Result<(StatusCode, Json<OrderIntent>), AppError> {
    let intent = state
        .admin
        .create_manual_intent(&id, &request, TimeMs::now())
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}
