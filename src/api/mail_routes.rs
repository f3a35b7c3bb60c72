//! Mail endpoints: the outbound-email task handler, inbound mail, bounces.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::{AppState, done};
use crate::error::ApiError;
use crate::mail::bounce::{BounceReport, process_bounce};
use crate::mail::inbound::handle_incoming;
use crate::mail::{MailBody, OutboundEmail};

/// A single address or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutboundTask {
    to: Option<OneOrMany>,
    cc: Option<OneOrMany>,
    subject: Option<String>,
    html: Option<String>,
    references: Option<String>,
    reply_to: Option<String>,
    from_user: Option<String>,
}

impl OutboundTask {
    fn into_email(self) -> Result<OutboundEmail, ApiError> {
        let to = self
            .to
            .map(OneOrMany::into_vec)
            .filter(|to| !to.is_empty())
            .ok_or_else(|| ApiError::missing_param("to"))?;
        let subject = self.subject.ok_or_else(|| ApiError::missing_param("subject"))?;
        let html = self.html.ok_or_else(|| ApiError::missing_param("html"))?;
        Ok(OutboundEmail {
            to,
            cc: self.cc.map(OneOrMany::into_vec).unwrap_or_default(),
            subject,
            body: MailBody::Html(html),
            references: self.references,
            reply_to: self.reply_to,
            from_user: self.from_user,
        })
    }
}

/// POST /tasks/outbound-email
async fn outbound_email(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let task: OutboundTask = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid outbound email task: {e}")))?;
    let email = task.into_email()?;
    let dispatched = state.dispatcher.send(&email).await?;
    tracing::info!(
        subject = %email.subject,
        recipients = dispatched.recipients.to.len(),
        sent = dispatched.sent,
        "Outbound email handled"
    );
    Ok(done())
}

/// POST /_ah/mail/{addr}
async fn inbound_mail(
    State(state): State<AppState>,
    Path(addr): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let outcome = handle_incoming(&addr, &body, state.dispatcher.settings(), state.tasks.as_ref()).await?;
    Ok(Json(serde_json::json!({ "message": outcome.message() })))
}

/// POST /_ah/bounce
async fn bounce(
    State(state): State<AppState>,
    Json(report): Json<BounceReport>,
) -> Result<Json<Value>, ApiError> {
    if report.recipient().is_none() {
        return Err(ApiError::missing_param("original.to"));
    }
    process_bounce(&report, state.db.as_ref(), &state.dispatcher).await?;
    Ok(done())
}

pub fn mail_routes(state: AppState) -> Router {
    Router::new()
        .route("/tasks/outbound-email", post(outbound_email))
        .route("/_ah/mail/{addr}", post(inbound_mail))
        .route("/_ah/bounce", post(bounce))
        .with_state(state)
}
