use crate::api::AppState;
use crate::domain::{ExitProfile, TimeMs};
use crate::error::AppError;
use crate::orchestration::ProfileUpdate;
use axum::extract::{Path, State};
use axum::Json;

pub async fn list_profiles(State(state): State<AppState>) -> Result<Json<Vec<ExitProfile>>, AppError> {
    Ok(Json(state.admin.list_profiles().await?))
}

pub async fn get_profile(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ExitProfile>, AppError> {
    Ok(Json(state.admin.get_profile(&id).await?))
}

/// Create or replace a profile. The config is validated before it is stored.
pub async fn put_profile(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ExitProfile>, AppError> {
    Ok(Json(state.admin.put_profile(&id, update, TimeMs::now()).await?))
}
