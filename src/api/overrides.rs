use crate::api::AppState;
use crate::domain::{Symbol, SymbolExitOverride, TimeMs};
use crate::error::AppError;
use crate::orchestration::OverrideUpdate;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

pub async fn list_overrides(
    State(state): State<AppState>,
) -> Result<Json<Vec<SymbolExitOverride>>, AppError> {
    Ok(Json(state.admin.list_overrides().await?))
}

pub async fn get_override(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SymbolExitOverride>, AppError> {
    Ok(Json(state.admin.get_override(&Symbol::new(symbol)).await?))
}

pub async fn put_override(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<OverrideUpdate>,
) -> Result<Json<SymbolExitOverride>, AppError> {
    let ov = state
        .admin
        .put_override(Symbol::new(symbol), update, TimeMs::now())
        .await?;
    Ok(Json(ov))
}

pub async fn delete_override(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.admin.delete_override(&Symbol::new(symbol)).await?;
    Ok(StatusCode::NO_CONTENT)
}
