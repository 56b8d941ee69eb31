use axum::{
    extract::{Json, Path, State},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::store_setting::{self, CATEGORY_IDENTITY, CATEGORY_OPERATIONAL};
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/settings", put(upsert_setting))
        .route("/settings/:category", get(list_settings))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpsertSettingRequest {
    #[validate(length(min = 1, max = 100))]
    pub key: String,
    #[validate(length(max = 10_000))]
    pub value: String,
    /// "identity" or "operational"
    #[schema(example = "operational")]
    pub category: String,
}

/// List settings in a category
#[utoipa::path(
    get,
    path = "/api/v1/settings/{category}",
    params(("category" = String, Path, description = "Setting category")),
    responses(
        (status = 200, description = "Settings in category"),
        (status = 400, description = "Unknown category", body = crate::errors::ErrorResponse)
    ),
    tag = "Settings"
)]
pub async fn list_settings(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<ApiResponse<Vec<store_setting::Model>>>, ServiceError> {
    validate_category(&category)?;
    let rows = state.settings.list_category(&category).await?;
    Ok(Json(ApiResponse::success(rows)))
}

/// Create or update a setting
#[utoipa::path(
    put,
    path = "/api/v1/settings",
    request_body = UpsertSettingRequest,
    responses(
        (status = 200, description = "Setting stored"),
        (status = 400, description = "Invalid setting", body = crate::errors::ErrorResponse)
    ),
    tag = "Settings"
)]
pub async fn upsert_setting(
    State(state): State<AppState>,
    Json(request): Json<UpsertSettingRequest>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    request
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
    validate_category(&request.category)?;

    state
        .settings
        .set(&request.key, &request.value, &request.category)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

fn validate_category(category: &str) -> Result<(), ServiceError> {
    if matches!(category, CATEGORY_IDENTITY | CATEGORY_OPERATIONAL) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "Unknown settings category: {}",
            category
        )))
    }
}
