//! Activity recording and subscriber notification.
//!
//! Every edit to a feature or gate ends up here. Changes that do not alter
//! the rendered value are dropped; whatever survives becomes one `Activity`
//! and one task for the subscriber mailer.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Error;
use crate::features::FeatureEntry;
use crate::review::activity::{Activity, FieldChange, amendments_from_changes};
use crate::review::{Gate, VoteState};
use crate::store::Database;
use crate::tasks::{self, TaskQueue};

/// Process note attached to "needs work" notifications.
pub const NEEDS_WORK_NOTE: &str = "Feature owners must press the \"Re-request review\" button after requested changes have been completed.";

/// One entry in a subscriber notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropChange {
    pub prop_name: String,
    pub old_val: String,
    pub new_val: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubscriberTask<'a> {
    changes: Vec<PropChange>,
    is_update: bool,
    triggering_user_email: Option<&'a str>,
    feature: &'a FeatureEntry,
}

#[derive(Debug, Serialize)]
struct ReviewerTask<'a> {
    feature: &'a FeatureEntry,
    gate_id: i64,
    gate_type: i64,
    gate_name: &'a str,
    team_name: &'a str,
    gate_url: String,
    new_state: VoteState,
    triggering_user_email: &'a str,
}

/// Records activities and enqueues the matching notifications.
#[derive(Clone)]
pub struct ActivityRecorder {
    db: Arc<dyn Database>,
    tasks: Arc<dyn TaskQueue>,
    site_url: String,
}

impl ActivityRecorder {
    pub fn new(db: Arc<dyn Database>, tasks: Arc<dyn TaskQueue>, site_url: impl Into<String>) -> Self {
        Self {
            db,
            tasks,
            site_url: site_url.into(),
        }
    }

    /// Link to a gate on the feature page.
    pub fn gate_url(&self, feature_id: i64, gate_id: i64) -> String {
        format!("{}/feature/{feature_id}?gate={gate_id}", self.site_url)
    }

    /// Store the meaningful subset of `changes` and notify subscribers.
    ///
    /// Returns `None` when nothing survived filtering; in that case nothing
    /// is stored or enqueued.
    pub async fn record_changes(
        &self,
        feature: &FeatureEntry,
        changes: &[FieldChange],
        author: Option<&str>,
        is_update: bool,
    ) -> Result<Option<Activity>, Error> {
        let amendments = amendments_from_changes(changes);
        if amendments.is_empty() {
            tracing::debug!(feature_id = feature.id, "No effective changes to record");
            return Ok(None);
        }

        let activity = Activity::new(feature.id, None, author).with_amendments(amendments);
        self.db.insert_activity(&activity).await?;

        let prop_changes = activity
            .amendments
            .iter()
            .map(|a| PropChange {
                prop_name: a.field_name.clone(),
                old_val: a.old_value.clone(),
                new_val: a.new_value.clone(),
                note: None,
            })
            .collect();
        self.notify_subscribers(feature, prop_changes, author, is_update)
            .await?;

        Ok(Some(activity))
    }

    /// Record a reviewer's vote as a `review_status` amendment.
    pub async fn record_vote_change(
        &self,
        feature: &FeatureEntry,
        gate: &Gate,
        author: &str,
        new_state: VoteState,
        old_state: VoteState,
    ) -> Result<Option<Activity>, Error> {
        let change = FieldChange::new(
            "review_status",
            old_state.name().into(),
            new_state.name().into(),
        );
        let amendments = amendments_from_changes(std::slice::from_ref(&change));
        if amendments.is_empty() {
            return Ok(None);
        }

        let stage_name = match self.db.get_stage(gate.stage_id).await? {
            Some(stage) => stage.intent_stage().display_name(),
            None => "None",
        };
        tracing::info!(
            feature_id = feature.id,
            gate_id = gate.id,
            "{author} set review status for stage: {stage_name}, gate: {} to {}.",
            gate.name(),
            new_state.name()
        );

        let activity = Activity::new(feature.id, Some(gate.id), Some(author)).with_amendments(amendments);
        self.db.insert_activity(&activity).await?;

        let prop_change = PropChange {
            prop_name: format!(
                "{} review status {}",
                gate.team_name(),
                self.gate_url(feature.id, gate.id)
            ),
            old_val: old_state.name().to_string(),
            new_val: new_state.name().to_string(),
            note: (new_state == VoteState::NeedsWork).then(|| NEEDS_WORK_NOTE.to_string()),
        };
        self.notify_subscribers(feature, vec![prop_change], Some(author), true)
            .await?;

        Ok(Some(activity))
    }

    /// Store a review comment and notify subscribers about it.
    pub async fn record_comment(
        &self,
        feature: &FeatureEntry,
        gate: Option<&Gate>,
        author: &str,
        comment: &str,
    ) -> Result<Activity, Error> {
        let activity = Activity::new(feature.id, gate.map(|g| g.id), Some(author)).with_content(comment);
        self.db.insert_activity(&activity).await?;

        let prop_name = match gate {
            Some(gate) => format!(
                "New review comment for {} {}",
                gate.name(),
                self.gate_url(feature.id, gate.id)
            ),
            None => "New comment".to_string(),
        };
        let change = PropChange {
            prop_name,
            old_val: "na".into(),
            new_val: comment.to_string(),
            note: None,
        };
        self.notify_subscribers(feature, vec![change], Some(author), true)
            .await?;

        Ok(activity)
    }

    /// Tell the gate's reviewers that a review was requested.
    pub async fn notify_approvers_of_review(
        &self,
        feature: &FeatureEntry,
        gate: &Gate,
        new_state: VoteState,
        author: &str,
    ) -> Result<Option<Activity>, Error> {
        let change = FieldChange::new(
            "review_status",
            gate.state.name().into(),
            new_state.name().into(),
        );
        let amendments = amendments_from_changes(std::slice::from_ref(&change));
        let activity = if amendments.is_empty() {
            None
        } else {
            let activity = Activity::new(feature.id, Some(gate.id), Some(author)).with_amendments(amendments);
            self.db.insert_activity(&activity).await?;
            Some(activity)
        };

        let task = ReviewerTask {
            feature,
            gate_id: gate.id,
            gate_type: gate.gate_type,
            gate_name: gate.name(),
            team_name: gate.team_name(),
            gate_url: self.gate_url(feature.id, gate.id),
            new_state,
            triggering_user_email: author,
        };
        tasks::enqueue_json(self.tasks.as_ref(), tasks::EMAIL_REVIEWERS, &task).await?;
        tracing::info!(
            feature_id = feature.id,
            gate_id = gate.id,
            team = gate.team_name(),
            "Reviewers notified of review request"
        );

        Ok(activity)
    }

    async fn notify_subscribers(
        &self,
        feature: &FeatureEntry,
        changes: Vec<PropChange>,
        author: Option<&str>,
        is_update: bool,
    ) -> Result<(), Error> {
        let task = SubscriberTask {
            changes,
            is_update,
            triggering_user_email: author,
            feature,
        };
        tasks::enqueue_json(self.tasks.as_ref(), tasks::EMAIL_SUBSCRIBERS, &task).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::features::{MilestoneSet, Stage, stage_types};
    use crate::review::gate_types;
    use crate::store::LibSqlBackend;
    use crate::tasks::MemoryTaskQueue;

    struct Fixture {
        db: Arc<LibSqlBackend>,
        queue: Arc<MemoryTaskQueue>,
        recorder: ActivityRecorder,
        feature: FeatureEntry,
        gate: Gate,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(MemoryTaskQueue::new());
        let recorder = ActivityRecorder::new(db.clone(), queue.clone(), "http://127.0.0.1:7777");

        let mut feature =
            FeatureEntry::new("feature a", "sum", 1).with_owners(&["feature_owner@example.com"]);
        feature.id = db.insert_feature(&feature).await.unwrap();

        let stage = Stage::new(feature.id, stage_types::BLINK_PROTOTYPE).with_milestones(MilestoneSet {
            desktop_first: Some(99),
            ..Default::default()
        });
        let stage_id = db.insert_stage(&stage).await.unwrap();
        let mut gate = Gate::new(feature.id, stage_id, gate_types::API_PROTOTYPE);
        gate.id = db.insert_gate(&gate).await.unwrap();

        Fixture {
            db,
            queue,
            recorder,
            feature,
            gate,
        }
    }

    #[tokio::test]
    async fn changes_create_one_activity_each_call() {
        let f = fixture().await;
        let changes_1 = vec![
            FieldChange::new("name", json!("feature a"), json!("feature Z")),
            FieldChange::new("summary", json!("sum"), json!("A new and more accurate summary.")),
            FieldChange::new("shipped_milestone", json!(1), json!(100)),
        ];
        let changes_2 = vec![FieldChange::new("category", json!(1), json!(2))];
        f.recorder
            .record_changes(&f.feature, &changes_1, Some("one@example.com"), true)
            .await
            .unwrap();
        f.recorder
            .record_changes(&f.feature, &changes_2, Some("one@example.com"), true)
            .await
            .unwrap();

        let activities = f.db.activities_for_feature(f.feature.id).await.unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].amendments.len(), 3);
        assert_eq!(activities[1].amendments.len(), 1);
        assert_eq!(activities[0].amendments[2].field_name, "shipped_milestone");
        assert_eq!(activities[0].amendments[2].old_value, "1");
        assert_eq!(activities[0].amendments[2].new_value, "100");

        let tasks = f.queue.tasks_for(tasks::EMAIL_SUBSCRIBERS);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].payload["changes"][0]["prop_name"], "name");
        assert_eq!(tasks[0].payload["triggering_user_email"], "one@example.com");
    }

    #[tokio::test]
    async fn no_changes_records_nothing() {
        let f = fixture().await;
        let none = f.recorder.record_changes(&f.feature, &[], None, true).await.unwrap();
        assert!(none.is_none());

        let empty_list = vec![FieldChange::new("editor_emails", serde_json::Value::Null, json!([]))];
        let none = f
            .recorder
            .record_changes(&f.feature, &empty_list, None, true)
            .await
            .unwrap();
        assert!(none.is_none());

        assert!(f.db.activities_for_feature(f.feature.id).await.unwrap().is_empty());
        assert!(f.queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn vote_change_is_recorded() {
        let f = fixture().await;
        f.recorder
            .record_vote_change(&f.feature, &f.gate, "abc@example.com", VoteState::Denied, VoteState::Na)
            .await
            .unwrap();

        let activities = f.db.activities_for_feature(f.feature.id).await.unwrap();
        assert_eq!(activities.len(), 1);
        let activity = &activities[0];
        assert_eq!(activity.gate_id, Some(f.gate.id));
        assert_eq!(activity.author.as_deref(), Some("abc@example.com"));
        assert!(activity.content.is_none());
        assert_eq!(activity.amendments.len(), 1);
        assert_eq!(activity.amendments[0].field_name, "review_status");
        assert_eq!(activity.amendments[0].old_value, "na");
        assert_eq!(activity.amendments[0].new_value, "denied");
        assert_eq!(f.queue.tasks().len(), 1);
    }

    #[tokio::test]
    async fn needs_work_carries_process_note() {
        let f = fixture().await;
        f.recorder
            .record_vote_change(&f.feature, &f.gate, "abc@example.com", VoteState::NeedsWork, VoteState::Na)
            .await
            .unwrap();

        let tasks = f.queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "/tasks/email-subscribers");
        let payload = &tasks[0].payload;
        assert_eq!(
            payload["changes"],
            json!([{
                "prop_name": format!(
                    "API Owners review status http://127.0.0.1:7777/feature/{}?gate={}",
                    f.feature.id, f.gate.id
                ),
                "old_val": "na",
                "new_val": "needs_work",
                "note": NEEDS_WORK_NOTE,
            }])
        );
        assert_eq!(payload["is_update"], json!(true));
        assert_eq!(payload["triggering_user_email"], json!("abc@example.com"));
        assert_eq!(payload["feature"]["name"], json!("feature a"));
    }

    #[tokio::test]
    async fn unchanged_vote_is_ignored() {
        let f = fixture().await;
        let out = f
            .recorder
            .record_vote_change(&f.feature, &f.gate, "abc@example.com", VoteState::Approved, VoteState::Approved)
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(f.queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn comments_are_stored_and_announced() {
        let f = fixture().await;
        let activity = f
            .recorder
            .record_comment(&f.feature, Some(&f.gate), "abc@example.com", "fake comments")
            .await
            .unwrap();
        assert_eq!(activity.content.as_deref(), Some("fake comments"));
        assert_eq!(activity.gate_id, Some(f.gate.id));
        assert_eq!(f.queue.tasks_for(tasks::EMAIL_SUBSCRIBERS).len(), 1);
    }

    #[tokio::test]
    async fn review_request_goes_to_reviewers() {
        let f = fixture().await;
        f.recorder
            .notify_approvers_of_review(&f.feature, &f.gate, VoteState::ReviewRequested, "feature_owner@example.com")
            .await
            .unwrap();

        let tasks = f.queue.tasks_for(tasks::EMAIL_REVIEWERS);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].payload["team_name"], json!("API Owners"));
        assert_eq!(tasks[0].payload["new_state"], json!(2));
        let activities = f.db.activities_for_feature(f.feature.id).await.unwrap();
        assert_eq!(activities[0].amendments[0].new_value, "review_requested");
    }
}
