//! Intent preview pages.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use super::{AppState, CurrentUser};
use crate::error::ApiError;
use crate::features::IntentStage;
use crate::preview::{PreviewError, PreviewRequest, render_intent_preview, template_data};

#[derive(Debug, Default, Deserialize)]
struct PreviewQuery {
    gate_id: Option<i64>,
}

/// 302 to the login page, continuing back to the full requested URL.
fn login_redirect(login_url: &str, uri: &Uri) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, login_location(login_url, uri))]).into_response()
}

fn login_location(login_url: &str, uri: &Uri) -> String {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{login_url}?continue={}", urlencoding::encode(target))
}

async fn render(state: &AppState, user: &CurrentUser, uri: &Uri, req: PreviewRequest) -> Response {
    let result = template_data(
        state.db.as_ref(),
        &state.permissions,
        &state.config.site_url,
        user.email(),
        req,
    )
    .await;
    match result {
        Ok(data) => Html(render_intent_preview(&data)).into_response(),
        Err(PreviewError::LoginRequired) => login_redirect(&state.config.login_url, uri),
        Err(PreviewError::Api(e)) => e.into_response(),
    }
}

/// GET /admin/features/launch/{feature_id}?gate_id=
async fn preview_feature(
    State(state): State<AppState>,
    user: CurrentUser,
    uri: Uri,
    Path(feature_id): Path<i64>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let req = PreviewRequest {
        feature_id,
        intent_stage: None,
        gate_id: query.gate_id,
    };
    render(&state, &user, &uri, req).await
}

/// GET /admin/features/launch/{intent_stage}/{feature_id}?intent&gate_id=
async fn preview_intent_stage(
    State(state): State<AppState>,
    user: CurrentUser,
    uri: Uri,
    Path((intent_stage, feature_id)): Path<(i64, i64)>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let Some(intent_stage) = IntentStage::from_id(intent_stage) else {
        return ApiError::BadRequest(format!("Unknown intent stage {intent_stage}")).into_response();
    };
    let req = PreviewRequest {
        feature_id,
        intent_stage: Some(intent_stage),
        gate_id: query.gate_id,
    };
    render(&state, &user, &uri, req).await
}

/// GET /feature/{feature_id}/gate/{gate_id}/intent
async fn preview_gate(
    State(state): State<AppState>,
    user: CurrentUser,
    uri: Uri,
    Path((feature_id, gate_id)): Path<(i64, i64)>,
) -> Response {
    let req = PreviewRequest {
        feature_id,
        intent_stage: None,
        gate_id: Some(gate_id),
    };
    render(&state, &user, &uri, req).await
}

pub fn preview_routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/features/launch/{feature_id}", get(preview_feature))
        .route(
            "/admin/features/launch/{intent_stage}/{feature_id}",
            get(preview_intent_stage),
        )
        .route("/feature/{feature_id}/gate/{gate_id}/intent", get(preview_gate))
        .with_state(state)
}
