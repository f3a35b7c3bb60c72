//! HTTP surface: task handlers, mail webhooks, reviews API, intent previews.

pub mod features;
pub mod mail_routes;
pub mod preview;
pub mod reviews;

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::mail::{MailDispatcher, MailTransport};
use crate::notifier::{ActivityRecorder, ApprovalNotifier};
use crate::permissions::Permissions;
use crate::store::Database;
use crate::tasks::TaskQueue;

/// Prefix some identity proxies put in front of the email address.
const ACCOUNT_PREFIX: &str = "accounts.google.com:";

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<dyn Database>,
    pub tasks: Arc<dyn TaskQueue>,
    pub dispatcher: MailDispatcher,
    pub recorder: ActivityRecorder,
    pub approvals: Arc<ApprovalNotifier>,
    pub permissions: Arc<Permissions>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Arc<dyn Database>,
        tasks: Arc<dyn TaskQueue>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let dispatcher = MailDispatcher::new(config.mail.clone(), transport);
        let recorder = ActivityRecorder::new(db.clone(), tasks.clone(), config.site_url.clone());
        let approvals = Arc::new(ApprovalNotifier::new(db.clone(), tasks.clone()));
        let permissions = Arc::new(Permissions::new(
            config.admin_emails.clone(),
            config.reviewer_emails.clone(),
        ));
        Self {
            config: Arc::new(config),
            db,
            tasks,
            dispatcher,
            recorder,
            approvals,
            permissions,
        }
    }
}

/// The signed-in user, as asserted by the authenticating proxy.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<String>);

impl CurrentUser {
    pub fn email(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// The user's email, or 403 for anonymous requests.
    pub fn require(&self) -> Result<&str, ApiError> {
        self.email()
            .ok_or_else(|| ApiError::Forbidden("User must be signed in".into()))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get(state.config.auth_user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim())
            .map(|v| v.strip_prefix(ACCOUNT_PREFIX).unwrap_or(v))
            .filter(|v| !v.is_empty())
            .map(|v| v.to_lowercase());
        Ok(CurrentUser(email))
    }
}

/// `{"message": "Done"}`, the standard success body.
pub(crate) fn done() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Done" }))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the full application router.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(mail_routes::mail_routes(state.clone()))
        .merge(reviews::review_routes(state.clone()))
        .merge(features::feature_routes(state.clone()))
        .merge(preview::preview_routes(state))
        .layer(TraceLayer::new_for_http())
}
