//! Integration tests for the HTTP surface.
//!
//! Each test spins up the full router on a random port with an in-memory
//! database, task queue, and mail transport, then drives it over HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use launch_notify::api::{AppState, app_routes};
use launch_notify::config::AppConfig;
use launch_notify::error::TaskError;
use launch_notify::features::{FeatureEntry, Stage, stage_types};
use launch_notify::mail::MemoryMailTransport;
use launch_notify::review::{Gate, VoteState, gate_types};
use launch_notify::store::{Database, LibSqlBackend};
use launch_notify::tasks::{MemoryTaskQueue, TaskQueue};

const USER_HEADER: &str = "x-authenticated-user-email";
const OWNER: &str = "owner@example.com";
const REVIEWER: &str = "reviewer1@example.com";
const INBOUND_ADDR: &str = "chromestatus@cr-status-staging.appspotmail.com";

struct TestServer {
    base: String,
    client: reqwest::Client,
    db: Arc<LibSqlBackend>,
    queue: Arc<MemoryTaskQueue>,
    transport: Arc<MemoryMailTransport>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn get(&self, path: &str, user: Option<&str>) -> reqwest::RequestBuilder {
        let req = self.client.get(self.url(path));
        match user {
            Some(u) => req.header(USER_HEADER, u),
            None => req,
        }
    }

    fn post(&self, path: &str, user: Option<&str>) -> reqwest::RequestBuilder {
        let req = self.client.post(self.url(path));
        match user {
            Some(u) => req.header(USER_HEADER, u),
            None => req,
        }
    }
}

/// A task queue whose every enqueue fails.
struct FailingTaskQueue;

#[async_trait]
impl TaskQueue for FailingTaskQueue {
    async fn enqueue(&self, path: &str, _payload: Value) -> Result<(), TaskError> {
        Err(TaskError::EnqueueFailed {
            path: path.to_string(),
            reason: "queue unavailable".into(),
        })
    }
}

/// Start the app on a random port.
async fn start_server() -> TestServer {
    let queue = Arc::new(MemoryTaskQueue::new());
    start_server_with(queue.clone(), queue).await
}

/// Start the app with `tasks` as its queue; `queue` is kept for assertions.
async fn start_server_with(tasks: Arc<dyn TaskQueue>, queue: Arc<MemoryTaskQueue>) -> TestServer {
    let vars: HashMap<String, String> = [
        ("APP_ID", "cr-status-staging"),
        ("SEND_EMAIL", "true"),
        ("SITE_URL", "http://localhost"),
        ("ADMIN_EMAILS", "admin@example.com"),
        ("REVIEWER_EMAILS", REVIEWER),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let config = AppConfig::from_map(&vars).unwrap();

    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let transport = Arc::new(MemoryMailTransport::new());
    let state = AppState::new(config, db.clone(), tasks, transport.clone());
    let app = app_routes(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        client,
        db,
        queue,
        transport,
    }
}

/// Feature owned by `OWNER` with an origin-trial stage and one API gate.
async fn seed_feature(db: &LibSqlBackend) -> (i64, i64) {
    let feature = FeatureEntry::new("feature one", "sum", 1).with_owners(&[OWNER]);
    let feature_id = db.insert_feature(&feature).await.unwrap();

    let mut proto = Stage::new(feature_id, stage_types::BLINK_PROTOTYPE);
    proto.intent_thread_url = Some("https://groups.example/i2p".into());
    db.insert_stage(&proto).await.unwrap();

    let stage_id = db
        .insert_stage(&Stage::new(feature_id, stage_types::BLINK_ORIGIN_TRIAL))
        .await
        .unwrap();
    let gate_id = db
        .insert_gate(&Gate::new(feature_id, stage_id, gate_types::API_ORIGIN_TRIAL))
        .await
        .unwrap();
    (feature_id, gate_id)
}

#[tokio::test]
async fn health_reports_ok() {
    let server = start_server().await;
    let resp = server.get("/health", None).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn outbound_email_is_rewritten_on_staging() {
    let server = start_server().await;
    let resp = server
        .post("/tasks/outbound-email", None)
        .json(&json!({"to": "user@example.com", "subject": "hi", "html": "<b>hi</b>"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Done");

    let sent = server.transport.sent();
    assert_eq!(sent.len(), 1);
    let to: Vec<String> = sent[0].envelope().to().iter().map(|a| a.to_string()).collect();
    assert_eq!(to, vec!["cr-status-staging-emails+user+example.com@google.com"]);
}

#[tokio::test]
async fn outbound_email_requires_subject() {
    let server = start_server().await;
    let resp = server
        .post("/tasks/outbound-email", None)
        .json(&json!({"to": "user@example.com", "html": "<b>hi</b>"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Missing parameter 'subject'");
    assert!(server.transport.sent().is_empty());
}

#[tokio::test]
async fn inbound_mail_is_classified() {
    let server = start_server().await;
    let raw = "From: Someone <someone@example.com>\r\n\
               To: chromestatus@cr-status-staging.appspotmail.com\r\n\
               Subject: Intent to Ship: Thing\r\n\
               \r\n\
               LGTM\r\n";

    let resp = server
        .post(&format!("/_ah/mail/{INBOUND_ADDR}"), None)
        .body(raw)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Done");
    let tasks = server.queue.tasks_for("/tasks/detect-intent");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload["from_addr"], "someone@example.com");

    let resp = server
        .post("/_ah/mail/someone-else@example.com", None)
        .body(raw)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Wrong address");
    assert_eq!(server.queue.tasks_for("/tasks/detect-intent").len(), 1);
}

#[tokio::test]
async fn bounce_marks_user_and_escalates() {
    let server = start_server().await;
    let resp = server
        .post("/_ah/bounce", None)
        .json(&json!({
            "original": {"to": "starrer@example.com", "from": "sender", "subject": "s", "text": "t"}
        }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Done");

    let pref = server.db.get_user_pref("starrer@example.com").await.unwrap().unwrap();
    assert!(pref.bounced);
    let sent = server.transport.sent();
    assert_eq!(sent.len(), 1);
    let to: Vec<String> = sent[0].envelope().to().iter().map(|a| a.to_string()).collect();
    assert_eq!(to, vec!["cr-status-bounces@google.com"]);
}

#[tokio::test]
async fn reviewer_vote_records_activity_and_approval() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;
    let before = server.db.get_feature(feature_id).await.unwrap().unwrap().updated;

    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{gate_id}"), Some(REVIEWER))
        .json(&json!({"state": VoteState::Approved.id()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let votes: Value = server
        .get(&format!("/api/v0/features/{feature_id}/votes"), None)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let votes = votes["votes"].as_array().unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0]["set_by"], REVIEWER);
    assert_eq!(votes[0]["state"], VoteState::Approved.id());

    let activities: Value = server
        .get(&format!("/api/v0/features/{feature_id}/activities"), None)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let amendment = &activities["activities"][0]["amendments"][0];
    assert_eq!(amendment["field_name"], "review_status");
    assert_eq!(amendment["old_value"], "no_response");
    assert_eq!(amendment["new_value"], "approved");

    assert_eq!(server.queue.tasks_for("/tasks/email-subscribers").len(), 1);
    assert_eq!(
        server
            .queue
            .tasks_for("/tasks/email-ot-creation-request-approved")
            .len(),
        1
    );

    let gates: Value = server
        .get(&format!("/api/v0/features/{feature_id}/gates"), None)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(gates["gates"][0]["team_name"], "API Owners");
    assert_eq!(gates["gates"][0]["state"], VoteState::Approved.id());

    let after = server.db.get_feature(feature_id).await.unwrap().unwrap().updated;
    assert!(after > before);
}

#[tokio::test]
async fn vote_validation_and_permissions() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;
    let (other_feature, _) = seed_feature(&server.db).await;
    let path = format!("/api/v0/features/{feature_id}/votes/{gate_id}");
    let approved = json!({"state": VoteState::Approved.id()});

    let status = |resp: reqwest::Response| resp.status();

    let resp = server.post(&path, None).json(&approved).send().await.unwrap();
    assert_eq!(status(resp), StatusCode::FORBIDDEN);

    let resp = server.post(&path, Some(OWNER)).json(&approved).send().await.unwrap();
    assert_eq!(status(resp), StatusCode::FORBIDDEN);

    let resp = server
        .post(&path, Some(REVIEWER))
        .json(&json!({"state": 999}))
        .send()
        .await
        .unwrap();
    assert_eq!(status(resp), StatusCode::BAD_REQUEST);

    let resp = server
        .post(&format!("/api/v0/features/{}/votes/{gate_id}", feature_id + 100), Some(REVIEWER))
        .json(&approved)
        .send()
        .await
        .unwrap();
    assert_eq!(status(resp), StatusCode::NOT_FOUND);

    let resp = server
        .post(&format!("/api/v0/features/{other_feature}/votes/{gate_id}"), Some(REVIEWER))
        .json(&approved)
        .send()
        .await
        .unwrap();
    assert_eq!(status(resp), StatusCode::BAD_REQUEST);

    let resp = server
        .post(&path, Some("user7@example.com"))
        .json(&json!({"state": VoteState::ReviewRequested.id()}))
        .send()
        .await
        .unwrap();
    assert_eq!(status(resp), StatusCode::FORBIDDEN);

    assert!(server.db.votes_for_feature(feature_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn owner_review_request_notifies_reviewers() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;

    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{gate_id}"), Some(OWNER))
        .json(&json!({"state": VoteState::ReviewRequested.id()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let tasks = server.queue.tasks_for("/tasks/email-reviewers");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload["gate_id"], json!(gate_id));
    assert!(server.queue.tasks_for("/tasks/email-subscribers").is_empty());

    let gate = server.db.get_gate(gate_id).await.unwrap().unwrap();
    assert_eq!(gate.state, VoteState::ReviewRequested);
    assert!(gate.requested_on.is_some());
}

#[tokio::test]
async fn comments_are_recorded() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;
    let path = format!("/api/v0/features/{feature_id}/comments/{gate_id}");

    let resp = server.post(&path, Some("user7@example.com")).json(&json!({})).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .post(&path, Some("user7@example.com"))
        .json(&json!({"comment": "Looks good"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let activities = server.db.activities_for_feature(feature_id).await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].content.as_deref(), Some("Looks good"));
    assert_eq!(server.queue.tasks_for("/tasks/email-subscribers").len(), 1);
}

#[tokio::test]
async fn feature_update_records_changes() {
    let server = start_server().await;
    let (feature_id, _) = seed_feature(&server.db).await;
    let path = format!("/api/v0/features/{feature_id}");

    let resp = server
        .client
        .patch(server.url(&path))
        .header(USER_HEADER, "user7@example.com")
        .json(&json!({"summary": "new summary"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .patch(server.url(&path))
        .header(USER_HEADER, OWNER)
        .json(&json!({"summary": "new summary"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert!(body["activity_id"].is_string());

    let feature = server.db.get_feature(feature_id).await.unwrap().unwrap();
    assert_eq!(feature.summary, "new summary");
    let activities = server.db.activities_for_feature(feature_id).await.unwrap();
    assert_eq!(activities[0].amendments[0].field_name, "summary");
    assert_eq!(activities[0].amendments[0].old_value, "sum");
    assert_eq!(activities[0].amendments[0].new_value, "new summary");
}

#[tokio::test]
async fn intent_preview_outcomes() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;

    let resp = server
        .get(&format!("/admin/features/launch/{feature_id}?gate_id={gate_id}"), None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp.headers()[reqwest::header::LOCATION].to_str().unwrap();
    assert_eq!(
        location,
        format!("/_ah/login?continue=%2Fadmin%2Ffeatures%2Flaunch%2F{feature_id}%3Fgate_id%3D{gate_id}")
    );

    let resp = server
        .get(&format!("/admin/features/launch/{}", feature_id + 100), Some(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server
        .get(&format!("/admin/features/launch/{feature_id}"), Some(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .get(&format!("/admin/features/launch/1/{feature_id}?intent"), Some(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains("Intent to Prototype: feature one"));

    let resp = server
        .get(&format!("/feature/{feature_id}/gate/{gate_id}/intent"), Some(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains("Intent to Experiment: feature one"));
    assert!(html.contains("https://groups.example/i2p"));
}

#[tokio::test]
async fn outbound_email_with_bad_address_is_rejected() {
    let server = start_server().await;
    let resp = server
        .post("/tasks/outbound-email", None)
        .json(&json!({"to": "user@@example.com", "subject": "hi", "html": "<b>hi</b>"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid address"));
    assert!(server.transport.sent().is_empty());
}

#[tokio::test]
async fn bounce_without_recipient_is_rejected() {
    let server = start_server().await;
    let resp = server
        .post("/_ah/bounce", None)
        .json(&json!({"original": {"from": "sender", "subject": "s", "text": "t"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Missing parameter 'original.to'");
    assert!(server.db.get_user_pref("").await.unwrap().is_none());
    assert!(server.transport.sent().is_empty());
}

#[tokio::test]
async fn vote_is_stored_consistently_when_notifications_fail() {
    let server = start_server_with(Arc::new(FailingTaskQueue), Arc::new(MemoryTaskQueue::new())).await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;
    let before = server.db.get_feature(feature_id).await.unwrap().unwrap().updated;

    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{gate_id}"), Some(REVIEWER))
        .json(&json!({"state": VoteState::Approved.id()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let vote = server.db.get_vote(gate_id, REVIEWER).await.unwrap().unwrap();
    assert_eq!(vote.state, VoteState::Approved);
    let gate = server.db.get_gate(gate_id).await.unwrap().unwrap();
    assert_eq!(gate.state, VoteState::Approved);
    assert!(gate.responded_on.is_some());
    let after = server.db.get_feature(feature_id).await.unwrap().unwrap().updated;
    assert!(after > before);
}

#[tokio::test]
async fn deleted_features_list_nothing_unless_asked() {
    let server = start_server().await;
    let (feature_id, gate_id) = seed_feature(&server.db).await;
    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{gate_id}"), Some(REVIEWER))
        .json(&json!({"state": VoteState::Approved.id()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut feature = server.db.get_feature(feature_id).await.unwrap().unwrap();
    feature.deleted = true;
    server.db.update_feature(&feature).await.unwrap();

    let lists = [
        ("votes", format!("/api/v0/features/{feature_id}/votes")),
        ("votes", format!("/api/v0/features/{feature_id}/votes/{gate_id}")),
        ("gates", format!("/api/v0/features/{feature_id}/gates")),
        ("activities", format!("/api/v0/features/{feature_id}/activities")),
    ];
    for (key, path) in &lists {
        let body: Value = server.get(path, None).send().await.unwrap().json().await.unwrap();
        assert_eq!(body[key], json!([]), "{path}");

        let body: Value = server
            .get(&format!("{path}?include_deleted=1"), None)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!body[key].as_array().unwrap().is_empty(), "{path}");
    }

    let resp = server
        .get(&format!("/api/v0/features/{}/gates", feature_id + 100), None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

/// Feature owned by `OWNER` with a shipping stage and one API gate.
async fn seed_shipping(db: &LibSqlBackend) -> (i64, i64, i64) {
    let feature = FeatureEntry::new("feature two", "sum", 1).with_owners(&[OWNER]);
    let feature_id = db.insert_feature(&feature).await.unwrap();
    let stage_id = db
        .insert_stage(&Stage::new(feature_id, stage_types::BLINK_SHIPPING))
        .await
        .unwrap();
    let gate_id = db
        .insert_gate(&Gate::new(feature_id, stage_id, gate_types::API_SHIP))
        .await
        .unwrap();
    (feature_id, stage_id, gate_id)
}

#[tokio::test]
async fn add_xfn_gates_creates_missing_gates() {
    let server = start_server().await;
    let (feature_id, stage_id, _) = seed_shipping(&server.db).await;
    let (other_feature, _) = seed_feature(&server.db).await;
    let path = format!("/api/v0/features/{feature_id}/stages/{stage_id}/addXfnGates");

    let resp = server.post(&path, None).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = server.post(&path, Some("user7@example.com")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .post(
            &format!("/api/v0/features/{}/stages/{stage_id}/addXfnGates", feature_id + 100),
            Some(OWNER),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/stages/9999/addXfnGates"), Some(OWNER))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = server
        .post(
            &format!("/api/v0/features/{other_feature}/stages/{stage_id}/addXfnGates"),
            Some(REVIEWER),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = server.post(&path, Some(OWNER)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Created 5 gates");

    let resp = server.post(&path, Some(REVIEWER)).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Created 0 gates");

    let types: Vec<i64> = server
        .db
        .gates_for_stage(stage_id)
        .await
        .unwrap()
        .iter()
        .map(|g| g.gate_type)
        .collect();
    assert_eq!(types.len(), 6);
    assert!(types.contains(&gate_types::PRIVACY_SHIP));
    assert!(types.contains(&gate_types::TESTING_SHIP));
}

#[tokio::test]
async fn owner_self_certifies_eligible_gates_only() {
    let server = start_server().await;
    let (feature_id, stage_id, api_gate) = seed_shipping(&server.db).await;
    let privacy_gate = server
        .db
        .insert_gate(&Gate::new(feature_id, stage_id, gate_types::PRIVACY_SHIP))
        .await
        .unwrap();
    let na_self = json!({"state": VoteState::NaSelf.id()});

    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{privacy_gate}"), Some(OWNER))
        .json(&na_self)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let gate = server.db.get_gate(privacy_gate).await.unwrap().unwrap();
    assert_eq!(gate.state, VoteState::NaSelf);

    let resp = server
        .post(&format!("/api/v0/features/{feature_id}/votes/{api_gate}"), Some(OWNER))
        .json(&na_self)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(server.db.get_vote(api_gate, OWNER).await.unwrap().is_none());
}
