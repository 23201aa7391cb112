use crate::api::AppState;
use crate::domain::{OrderIntent, TimeMs};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;

/// PENDING_APPROVAL -> NEW, after which the intent poller submits it.
pub async fn approve(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OrderIntent>, AppError> {
    Ok(Json(state.admin.approve_intent(&id, TimeMs::now()).await?))
}

/// Only unsubmitted intents can be cancelled.
pub async fn cancel(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<OrderIntent>, AppError> {
    Ok(Json(state.admin.cancel_intent(&id, TimeMs::now()).await?))
}
