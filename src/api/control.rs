use crate::api::AppState;
use crate::domain::{ExitControl, TimeMs};
use crate::error::AppError;
use crate::orchestration::ControlUpdate;
use axum::extract::State;
use axum::Json;

pub async fn get_control(State(state): State<AppState>) -> Result<Json<ExitControl>, AppError> {
    Ok(Json(state.admin.get_control().await?))
}

pub async fn put_control(
    State(state): State<AppState>,
    Json(update): Json<ControlUpdate>,
) -> Result<Json<ExitControl>, AppError> {
    Ok(Json(state.admin.set_control(update, TimeMs::now()).await?))
}
