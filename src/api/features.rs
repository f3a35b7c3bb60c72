//! Feature field updates.

use axum::extract::{Path, State};
use axum::routing::patch;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;

use super::{AppState, CurrentUser};
use crate::error::ApiError;

/// PATCH /api/v0/features/{id}
///
/// Body is an object of `{field: new_value}`. Every field is validated
/// before anything is saved.
async fn update_feature(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(feature_id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let email = user.require()?;
    let mut feature = state
        .db
        .get_feature(feature_id)
        .await?
        .filter(|f| !f.deleted)
        .ok_or_else(|| ApiError::NotFound(format!("Feature {feature_id} not found")))?;
    if !state.permissions.can_edit(&feature, email) {
        return Err(ApiError::Forbidden("User may not edit this feature".into()));
    }

    let Value::Object(updates) = body else {
        return Err(ApiError::BadRequest("Expected an object of field updates".into()));
    };

    let mut changes = Vec::with_capacity(updates.len());
    for (field, value) in &updates {
        let change = feature
            .apply_update(field, value)
            .map_err(ApiError::BadRequest)?;
        changes.push(change);
    }

    feature.updated = Utc::now();
    state.db.update_feature(&feature).await?;

    let activity = state
        .recorder
        .record_changes(&feature, &changes, Some(email), true)
        .await?;

    tracing::info!(
        feature_id,
        fields = changes.len(),
        recorded = activity.is_some(),
        "Feature updated"
    );
    Ok(Json(serde_json::json!({
        "message": "Done",
        "activity_id": activity.map(|a| a.id),
    })))
}

pub fn feature_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v0/features/{id}", patch(update_feature))
        .with_state(state)
}
