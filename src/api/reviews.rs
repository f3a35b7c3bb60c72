//! Reviews API: votes, gates, xfn gates, activities, and review comments.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AppState, CurrentUser, done};
use crate::error::ApiError;
use crate::features::FeatureEntry;
use crate::review::xfn::add_missing_xfn_gates;
use crate::review::{Gate, Vote, VoteState};

async fn load_feature(state: &AppState, feature_id: i64) -> Result<FeatureEntry, ApiError> {
    state
        .db
        .get_feature(feature_id)
        .await?
        .filter(|f| !f.deleted)
        .ok_or_else(|| ApiError::NotFound(format!("Feature {feature_id} not found")))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    include_deleted: Option<String>,
}

impl ListQuery {
    fn include_deleted(&self) -> bool {
        matches!(self.include_deleted.as_deref(), Some("1" | "true"))
    }
}

/// Whether listings for `feature_id` should return anything. Unknown
/// features are 404; deleted ones list nothing unless `include_deleted`.
async fn listable(state: &AppState, feature_id: i64, query: &ListQuery) -> Result<bool, ApiError> {
    let feature = state
        .db
        .get_feature(feature_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Feature {feature_id} not found")))?;
    Ok(!feature.deleted || query.include_deleted())
}

/// Load a gate and check it belongs to `feature`.
async fn load_gate(state: &AppState, feature: &FeatureEntry, gate_id: i64) -> Result<Gate, ApiError> {
    let gate = state
        .db
        .get_gate(gate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Gate {gate_id} not found")))?;
    if gate.feature_id != feature.id {
        return Err(ApiError::BadRequest(format!(
            "Gate {gate_id} does not belong to feature {}",
            feature.id
        )));
    }
    Ok(gate)
}

/// GET /api/v0/features/{id}/votes
async fn list_votes(
    State(state): State<AppState>,
    Path(feature_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let votes = if listable(&state, feature_id, &query).await? {
        state.db.votes_for_feature(feature_id, None).await?
    } else {
        Vec::new()
    };
    Ok(Json(serde_json::json!({ "votes": votes })))
}

/// GET /api/v0/features/{id}/votes/{gate_id}
async fn list_gate_votes(
    State(state): State<AppState>,
    Path((feature_id, gate_id)): Path<(i64, i64)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let votes = if listable(&state, feature_id, &query).await? {
        state.db.votes_for_feature(feature_id, Some(gate_id)).await?
    } else {
        Vec::new()
    };
    Ok(Json(serde_json::json!({ "votes": votes })))
}

/// POST /api/v0/features/{id}/votes/{gate_id}
///
/// Owners and editors may only request a review (or an N/A), or self-certify
/// N/A on gates that allow it; every other state needs a reviewer or admin.
async fn set_vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((feature_id, gate_id)): Path<(i64, i64)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut feature = load_feature(&state, feature_id).await?;
    let new_state = body
        .get("state")
        .and_then(Value::as_i64)
        .and_then(VoteState::from_id)
        .ok_or_else(|| ApiError::BadRequest("Parameter 'state' is not a valid vote state".into()))?;
    let mut gate = load_gate(&state, &feature, gate_id).await?;

    let email = user.require()?;
    let allowed = state.permissions.can_review(email)
        || (gate.owner_may_set(new_state) && state.permissions.can_edit(&feature, email));
    if !allowed {
        return Err(ApiError::Forbidden(format!(
            "User may not set state {new_state} on gate {gate_id}"
        )));
    }

    let old_state = state
        .db
        .get_vote(gate.id, email)
        .await?
        .map(|v| v.state)
        .unwrap_or(VoteState::NoResponse);

    let now = Utc::now();
    let vote = Vote {
        feature_id: feature.id,
        gate_id: gate.id,
        gate_type: gate.gate_type,
        set_by: email.to_string(),
        set_on: now,
        state: new_state,
    };
    let prior_gate = gate.clone();
    gate.apply_vote(new_state, now);
    feature.updated = now;
    state.db.save_vote(&vote, &gate, &feature).await?;

    if new_state == VoteState::ReviewRequested {
        state
            .recorder
            .notify_approvers_of_review(&feature, &prior_gate, new_state, email)
            .await?;
    } else {
        state
            .recorder
            .record_vote_change(&feature, &prior_gate, email, new_state, old_state)
            .await?;
    }

    if let Some(stage) = state.db.get_stage(gate.stage_id).await? {
        state.approvals.check_approvals(&feature, &stage, &gate).await?;
    }

    tracing::info!(
        feature_id,
        gate_id,
        user = %email,
        state = %new_state,
        "Vote recorded"
    );
    Ok(done())
}

/// A gate with its display names.
#[derive(Serialize)]
struct GateView {
    #[serde(flatten)]
    gate: Gate,
    team_name: &'static str,
    gate_name: &'static str,
}

/// GET /api/v0/features/{id}/gates
async fn list_gates(
    State(state): State<AppState>,
    Path(feature_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    if !listable(&state, feature_id, &query).await? {
        return Ok(Json(serde_json::json!({ "gates": [] })));
    }
    let gates: Vec<GateView> = state
        .db
        .gates_for_feature(feature_id)
        .await?
        .into_iter()
        .map(|gate| GateView {
            team_name: gate.team_name(),
            gate_name: gate.name(),
            gate,
        })
        .collect();
    Ok(Json(serde_json::json!({ "gates": gates })))
}

/// GET /api/v0/features/{id}/activities
async fn list_activities(
    State(state): State<AppState>,
    Path(feature_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let activities = if listable(&state, feature_id, &query).await? {
        state.db.activities_for_feature(feature_id).await?
    } else {
        Vec::new()
    };
    Ok(Json(serde_json::json!({ "activities": activities })))
}

/// POST /api/v0/features/{id}/stages/{stage_id}/addXfnGates
async fn add_xfn_gates(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((feature_id, stage_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, ApiError> {
    let feature = load_feature(&state, feature_id).await?;
    let stage = state
        .db
        .get_stage(stage_id)
        .await?
        .filter(|s| s.feature_id == feature.id)
        .ok_or_else(|| ApiError::NotFound(format!("Stage {stage_id} not found")))?;

    let email = user.require()?;
    if !state.permissions.can_edit(&feature, email) && !state.permissions.can_review(email) {
        return Err(ApiError::Forbidden(format!(
            "User may not add gates to feature {feature_id}"
        )));
    }

    let created = add_missing_xfn_gates(state.db.as_ref(), &stage).await?;
    Ok(Json(serde_json::json!({
        "message": format!("Created {} gates", created.len())
    })))
}

/// POST /api/v0/features/{id}/comments/{gate_id}
async fn post_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((feature_id, gate_id)): Path<(i64, i64)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let email = user.require()?;
    let feature = load_feature(&state, feature_id).await?;
    let gate = load_gate(&state, &feature, gate_id).await?;
    let comment = body
        .get("comment")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::missing_param("comment"))?;

    state
        .recorder
        .record_comment(&feature, Some(&gate), email, comment)
        .await?;
    Ok(done())
}

pub fn review_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v0/features/{id}/votes", get(list_votes))
        .route(
            "/api/v0/features/{id}/votes/{gate_id}",
            get(list_gate_votes).post(set_vote),
        )
        .route("/api/v0/features/{id}/gates", get(list_gates))
        .route("/api/v0/features/{id}/activities", get(list_activities))
        .route("/api/v0/features/{id}/comments/{gate_id}", post(post_comment))
        .route(
            "/api/v0/features/{id}/stages/{stage_id}/addXfnGates",
            post(add_xfn_gates),
        )
        .with_state(state)
}
