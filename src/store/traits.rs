//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::features::{FeatureEntry, Stage};
use crate::review::{Activity, Gate, Vote};
use crate::users::UserPref;

/// Backend-agnostic database trait covering features, review, and users.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Features ────────────────────────────────────────────────────

    /// Insert a feature. Returns the assigned id.
    async fn insert_feature(&self, feature: &FeatureEntry) -> Result<i64, DatabaseError>;

    async fn get_feature(&self, id: i64) -> Result<Option<FeatureEntry>, DatabaseError>;

    /// Overwrite every column of an existing feature.
    async fn update_feature(&self, feature: &FeatureEntry) -> Result<(), DatabaseError>;

    // ── Stages ──────────────────────────────────────────────────────

    /// Insert a stage. Returns the assigned id.
    async fn insert_stage(&self, stage: &Stage) -> Result<i64, DatabaseError>;

    async fn get_stage(&self, id: i64) -> Result<Option<Stage>, DatabaseError>;

    /// All stages of a feature, by id.
    async fn stages_for_feature(&self, feature_id: i64) -> Result<Vec<Stage>, DatabaseError>;

    // ── Gates ───────────────────────────────────────────────────────

    /// Insert a gate. Returns the assigned id.
    async fn insert_gate(&self, gate: &Gate) -> Result<i64, DatabaseError>;

    async fn get_gate(&self, id: i64) -> Result<Option<Gate>, DatabaseError>;

    async fn gates_for_feature(&self, feature_id: i64) -> Result<Vec<Gate>, DatabaseError>;

    /// All gates referencing a stage.
    async fn gates_for_stage(&self, stage_id: i64) -> Result<Vec<Gate>, DatabaseError>;

    // ── Votes ───────────────────────────────────────────────────────

    async fn get_vote(&self, gate_id: i64, set_by: &str) -> Result<Option<Vote>, DatabaseError>;

    /// Insert or replace the vote of `vote.set_by` on `vote.gate_id`, together
    /// with the gate state and feature `updated` time it produces. Either all
    /// three writes land or none do.
    async fn save_vote(
        &self,
        vote: &Vote,
        gate: &Gate,
        feature: &FeatureEntry,
    ) -> Result<(), DatabaseError>;

    /// Votes on a feature, optionally limited to one gate, oldest first.
    async fn votes_for_feature(
        &self,
        feature_id: i64,
        gate_id: Option<i64>,
    ) -> Result<Vec<Vote>, DatabaseError>;

    // ── Activities ──────────────────────────────────────────────────

    async fn insert_activity(&self, activity: &Activity) -> Result<(), DatabaseError>;

    /// Activities on a feature, oldest first.
    async fn activities_for_feature(&self, feature_id: i64)
    -> Result<Vec<Activity>, DatabaseError>;

    // ── User preferences ────────────────────────────────────────────

    async fn get_user_pref(&self, email: &str) -> Result<Option<UserPref>, DatabaseError>;

    /// Insert or overwrite a preference record.
    async fn put_user_pref(&self, pref: &UserPref) -> Result<(), DatabaseError>;

    /// Create or update the preference for `email` with `bounced = true`.
    ///
    /// An existing `notify_as_starrer` value is left as it was.
    async fn mark_bounced(&self, email: &str) -> Result<UserPref, DatabaseError>;
}
