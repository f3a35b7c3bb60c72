//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::features::{FeatureEntry, FeatureType, IntentStage, MilestoneSet, Stage};
use crate::review::{Activity, Amendment, Gate, Vote, VoteState};
use crate::store::migrations;
use crate::store::traits::Database;
use crate::users::UserPref;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes transactions on the shared connection.
    tx_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            tx_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run an `INSERT ... RETURNING id` and hand back the id.
    async fn insert_returning_id(
        &self,
        op: &str,
        sql: &str,
        values: Vec<libsql::Value>,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op} id parse: {e}"))),
            Ok(None) => Err(DatabaseError::Query(format!("{op}: no id returned"))),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn email_list(s: Option<String>) -> Vec<String> {
    s.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

/// Map a libsql Row to a FeatureEntry. Column order matches FEATURE_COLUMNS.
fn row_to_feature(row: &libsql::Row) -> Result<FeatureEntry, libsql::Error> {
    let feature_type = FeatureType::try_from(row.get::<i64>(4).unwrap_or(0)).unwrap_or_default();
    let intent_stage = IntentStage::try_from(row.get::<i64>(5).unwrap_or(0)).unwrap_or_default();
    let created_str: String = row.get(13)?;
    let updated_str: String = row.get(14)?;

    Ok(FeatureEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        summary: row.get::<String>(2).unwrap_or_default(),
        category: row.get::<i64>(3).unwrap_or(0),
        feature_type,
        intent_stage,
        owner_emails: email_list(row.get(6).ok()),
        editor_emails: email_list(row.get(7).ok()),
        cc_emails: email_list(row.get(8).ok()),
        motivation: row.get(9).ok(),
        spec_link: row.get(10).ok(),
        bug_url: row.get(11).ok(),
        deleted: row.get::<i64>(12).unwrap_or(0) != 0,
        created: parse_datetime(&created_str),
        updated: parse_datetime(&updated_str),
    })
}

fn row_to_stage(row: &libsql::Row) -> Result<Stage, libsql::Error> {
    let milestones: MilestoneSet = row
        .get::<String>(3)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(Stage {
        id: row.get(0)?,
        feature_id: row.get(1)?,
        stage_type: row.get(2)?,
        milestones,
        intent_thread_url: row.get(4).ok(),
        experiment_goals: row.get(5).ok(),
        experiment_risks: row.get(6).ok(),
        experiment_extension_reason: row.get(7).ok(),
        announcement_url: row.get(8).ok(),
        ot_display_name: row.get(9).ok(),
        rollout_url: row.get(10).ok(),
    })
}

fn row_to_gate(row: &libsql::Row) -> Result<Gate, libsql::Error> {
    let state = VoteState::from_id(row.get::<i64>(4)?).unwrap_or(VoteState::Na);
    let requested: Option<String> = row.get(5).ok();
    let responded: Option<String> = row.get(6).ok();

    Ok(Gate {
        id: row.get(0)?,
        feature_id: row.get(1)?,
        stage_id: row.get(2)?,
        gate_type: row.get(3)?,
        state,
        requested_on: parse_optional_datetime(&requested),
        responded_on: parse_optional_datetime(&responded),
        assignee_emails: email_list(row.get(7).ok()),
    })
}

fn row_to_vote(row: &libsql::Row) -> Result<Vote, libsql::Error> {
    let set_on: String = row.get(4)?;
    Ok(Vote {
        feature_id: row.get(0)?,
        gate_id: row.get(1)?,
        gate_type: row.get(2)?,
        set_by: row.get(3)?,
        set_on: parse_datetime(&set_on),
        state: VoteState::from_id(row.get::<i64>(5)?).unwrap_or(VoteState::NoResponse),
    })
}

fn row_to_activity(row: &libsql::Row) -> Result<Activity, libsql::Error> {
    let id_str: String = row.get(0)?;
    let amendments: Vec<Amendment> = row
        .get::<String>(5)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let created_str: String = row.get(6)?;

    Ok(Activity {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        feature_id: row.get(1)?,
        gate_id: row.get::<i64>(2).ok(),
        author: row.get(3).ok(),
        content: row.get(4).ok(),
        amendments,
        created: parse_datetime(&created_str),
    })
}

fn row_to_user_pref(row: &libsql::Row) -> Result<UserPref, libsql::Error> {
    Ok(UserPref {
        email: row.get(0)?,
        notify_as_starrer: row.get::<i64>(1).unwrap_or(1) != 0,
        bounced: row.get::<i64>(2).unwrap_or(0) != 0,
    })
}

const UPSERT_VOTE_SQL: &str = "INSERT INTO votes (feature_id, gate_id, gate_type, set_by, set_on, state)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(gate_id, set_by) DO UPDATE SET
        set_on = excluded.set_on,
        state = excluded.state";

const UPDATE_GATE_SQL: &str =
    "UPDATE gates SET state = ?1, requested_on = ?2, responded_on = ?3, assignee_emails = ?4 WHERE id = ?5";

fn vote_values(vote: &Vote) -> Vec<libsql::Value> {
    vec![
        vote.feature_id.into(),
        vote.gate_id.into(),
        vote.gate_type.into(),
        vote.set_by.clone().into(),
        vote.set_on.to_rfc3339().into(),
        vote.state.id().into(),
    ]
}

fn gate_values(gate: &Gate) -> Result<Vec<libsql::Value>, DatabaseError> {
    Ok(vec![
        gate.state.id().into(),
        opt_datetime(gate.requested_on),
        opt_datetime(gate.responded_on),
        to_json(&gate.assignee_emails)?.into(),
        libsql::Value::Integer(gate.id),
    ])
}

// ── Trait implementation ────────────────────────────────────────────

const FEATURE_COLUMNS: &str = "id, name, summary, category, feature_type, intent_stage, owner_emails, editor_emails, cc_emails, motivation, spec_link, bug_url, deleted, created_at, updated_at";

const STAGE_COLUMNS: &str = "id, feature_id, stage_type, milestones, intent_thread_url, experiment_goals, experiment_risks, experiment_extension_reason, announcement_url, ot_display_name, rollout_url";

const GATE_COLUMNS: &str =
    "id, feature_id, stage_id, gate_type, state, requested_on, responded_on, assignee_emails";

const VOTE_COLUMNS: &str = "feature_id, gate_id, gate_type, set_by, set_on, state";

const ACTIVITY_COLUMNS: &str = "id, feature_id, gate_id, author, content, amendments, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Features ────────────────────────────────────────────────────

    async fn insert_feature(&self, feature: &FeatureEntry) -> Result<i64, DatabaseError> {
        let id = self
            .insert_returning_id(
                "insert_feature",
                "INSERT INTO features (name, summary, category, feature_type, intent_stage, owner_emails, editor_emails, cc_emails, motivation, spec_link, bug_url, deleted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) RETURNING id",
                vec![
                    feature.name.clone().into(),
                    feature.summary.clone().into(),
                    feature.category.into(),
                    feature.feature_type.id().into(),
                    feature.intent_stage.id().into(),
                    to_json(&feature.owner_emails)?.into(),
                    to_json(&feature.editor_emails)?.into(),
                    to_json(&feature.cc_emails)?.into(),
                    opt_text(feature.motivation.as_deref()),
                    opt_text(feature.spec_link.as_deref()),
                    opt_text(feature.bug_url.as_deref()),
                    i64::from(feature.deleted).into(),
                    feature.created.to_rfc3339().into(),
                    feature.updated.to_rfc3339().into(),
                ],
            )
            .await?;

        debug!(feature_id = id, name = %feature.name, "Feature inserted");
        Ok(id)
    }

    async fn get_feature(&self, id: i64) -> Result<Option<FeatureEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_feature: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_feature(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_feature row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_feature: {e}"))),
        }
    }

    async fn update_feature(&self, feature: &FeatureEntry) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE features SET name = ?1, summary = ?2, category = ?3, feature_type = ?4, intent_stage = ?5,
                    owner_emails = ?6, editor_emails = ?7, cc_emails = ?8, motivation = ?9, spec_link = ?10,
                    bug_url = ?11, deleted = ?12, updated_at = ?13
                 WHERE id = ?14",
                vec![
                    feature.name.clone().into(),
                    feature.summary.clone().into(),
                    feature.category.into(),
                    feature.feature_type.id().into(),
                    feature.intent_stage.id().into(),
                    to_json(&feature.owner_emails)?.into(),
                    to_json(&feature.editor_emails)?.into(),
                    to_json(&feature.cc_emails)?.into(),
                    opt_text(feature.motivation.as_deref()),
                    opt_text(feature.spec_link.as_deref()),
                    opt_text(feature.bug_url.as_deref()),
                    i64::from(feature.deleted).into(),
                    feature.updated.to_rfc3339().into(),
                    libsql::Value::Integer(feature.id),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_feature: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "feature".into(),
                id: feature.id.to_string(),
            });
        }
        Ok(())
    }

    // ── Stages ──────────────────────────────────────────────────────

    async fn insert_stage(&self, stage: &Stage) -> Result<i64, DatabaseError> {
        self.insert_returning_id(
            "insert_stage",
            "INSERT INTO stages (feature_id, stage_type, milestones, intent_thread_url, experiment_goals, experiment_risks, experiment_extension_reason, announcement_url, ot_display_name, rollout_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) RETURNING id",
            vec![
                stage.feature_id.into(),
                stage.stage_type.into(),
                to_json(&stage.milestones)?.into(),
                opt_text(stage.intent_thread_url.as_deref()),
                opt_text(stage.experiment_goals.as_deref()),
                opt_text(stage.experiment_risks.as_deref()),
                opt_text(stage.experiment_extension_reason.as_deref()),
                opt_text(stage.announcement_url.as_deref()),
                opt_text(stage.ot_display_name.as_deref()),
                opt_text(stage.rollout_url.as_deref()),
            ],
        )
        .await
    }

    async fn get_stage(&self, id: i64) -> Result<Option<Stage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_stage: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_stage(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_stage row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_stage: {e}"))),
        }
    }

    async fn stages_for_feature(&self, feature_id: i64) -> Result<Vec<Stage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE feature_id = ?1 ORDER BY id"),
                params![feature_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("stages_for_feature: {e}")))?;

        let mut stages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("stages_for_feature next: {e}")))?
        {
            stages.push(
                row_to_stage(&row)
                    .map_err(|e| DatabaseError::Query(format!("stages_for_feature row: {e}")))?,
            );
        }
        Ok(stages)
    }

    // ── Gates ───────────────────────────────────────────────────────

    async fn insert_gate(&self, gate: &Gate) -> Result<i64, DatabaseError> {
        self.insert_returning_id(
            "insert_gate",
            "INSERT INTO gates (feature_id, stage_id, gate_type, state, requested_on, responded_on, assignee_emails)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
            vec![
                gate.feature_id.into(),
                gate.stage_id.into(),
                gate.gate_type.into(),
                gate.state.id().into(),
                opt_datetime(gate.requested_on),
                opt_datetime(gate.responded_on),
                to_json(&gate.assignee_emails)?.into(),
            ],
        )
        .await
    }

    async fn get_gate(&self, id: i64) -> Result<Option<Gate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {GATE_COLUMNS} FROM gates WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_gate: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_gate(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_gate row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_gate: {e}"))),
        }
    }

    async fn gates_for_feature(&self, feature_id: i64) -> Result<Vec<Gate>, DatabaseError> {
        self.query_gates("gates_for_feature", "feature_id", feature_id)
            .await
    }

    async fn gates_for_stage(&self, stage_id: i64) -> Result<Vec<Gate>, DatabaseError> {
        self.query_gates("gates_for_stage", "stage_id", stage_id).await
    }

    // ── Votes ───────────────────────────────────────────────────────

    async fn save_vote(
        &self,
        vote: &Vote,
        gate: &Gate,
        feature: &FeatureEntry,
    ) -> Result<(), DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_vote begin: {e}")))?;

        let writes = async {
            tx.execute(UPSERT_VOTE_SQL, vote_values(vote))
                .await
                .map_err(|e| DatabaseError::Query(format!("save_vote vote: {e}")))?;

            let gates = tx
                .execute(UPDATE_GATE_SQL, gate_values(gate)?)
                .await
                .map_err(|e| DatabaseError::Query(format!("save_vote gate: {e}")))?;
            if gates == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "gate".into(),
                    id: gate.id.to_string(),
                });
            }

            let features = tx
                .execute(
                    "UPDATE features SET updated_at = ?1 WHERE id = ?2",
                    params![feature.updated.to_rfc3339(), feature.id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("save_vote feature: {e}")))?;
            if features == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "feature".into(),
                    id: feature.id.to_string(),
                });
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        match writes {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("save_vote commit: {e}")))?;
                debug!(gate_id = gate.id, set_by = %vote.set_by, state = %vote.state, "Vote saved");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "save_vote rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_vote(&self, gate_id: i64, set_by: &str) -> Result<Option<Vote>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {VOTE_COLUMNS} FROM votes WHERE gate_id = ?1 AND set_by = ?2"),
                params![gate_id, set_by],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_vote: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_vote(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_vote row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_vote: {e}"))),
        }
    }

    async fn votes_for_feature(
        &self,
        feature_id: i64,
        gate_id: Option<i64>,
    ) -> Result<Vec<Vote>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VOTE_COLUMNS} FROM votes
                     WHERE feature_id = ?1 AND (?2 IS NULL OR gate_id = ?2)
                     ORDER BY set_on, gate_id"
                ),
                vec![libsql::Value::Integer(feature_id), opt_int(gate_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("votes_for_feature: {e}")))?;

        let mut votes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("votes_for_feature next: {e}")))?
        {
            votes.push(
                row_to_vote(&row)
                    .map_err(|e| DatabaseError::Query(format!("votes_for_feature row: {e}")))?,
            );
        }
        Ok(votes)
    }

    // ── Activities ──────────────────────────────────────────────────

    async fn insert_activity(&self, activity: &Activity) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO activities (id, feature_id, gate_id, author, content, amendments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                vec![
                    activity.id.to_string().into(),
                    activity.feature_id.into(),
                    opt_int(activity.gate_id),
                    opt_text(activity.author.as_deref()),
                    opt_text(activity.content.as_deref()),
                    to_json(&activity.amendments)?.into(),
                    activity.created.to_rfc3339().into(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_activity: {e}")))?;

        debug!(
            activity_id = %activity.id,
            feature_id = activity.feature_id,
            amendments = activity.amendments.len(),
            "Activity stored"
        );
        Ok(())
    }

    async fn activities_for_feature(
        &self,
        feature_id: i64,
    ) -> Result<Vec<Activity>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE feature_id = ?1 ORDER BY created_at, rowid"
                ),
                params![feature_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("activities_for_feature: {e}")))?;

        let mut activities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("activities_for_feature next: {e}")))?
        {
            activities.push(
                row_to_activity(&row)
                    .map_err(|e| DatabaseError::Query(format!("activities_for_feature row: {e}")))?,
            );
        }
        Ok(activities)
    }

    // ── User preferences ────────────────────────────────────────────

    async fn get_user_pref(&self, email: &str) -> Result<Option<UserPref>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email, notify_as_starrer, bounced FROM user_prefs WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_pref: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user_pref(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user_pref row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_pref: {e}"))),
        }
    }

    async fn put_user_pref(&self, pref: &UserPref) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_prefs (email, notify_as_starrer, bounced) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO UPDATE SET
                    notify_as_starrer = excluded.notify_as_starrer,
                    bounced = excluded.bounced",
                params![
                    pref.email.clone(),
                    i64::from(pref.notify_as_starrer),
                    i64::from(pref.bounced)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_user_pref: {e}")))?;
        Ok(())
    }

    async fn mark_bounced(&self, email: &str) -> Result<UserPref, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_prefs (email, notify_as_starrer, bounced) VALUES (?1, 1, 1)
                 ON CONFLICT(email) DO UPDATE SET bounced = 1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_bounced: {e}")))?;

        self.get_user_pref(email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user_pref".into(),
                id: email.to_string(),
            })
    }
}

impl LibSqlBackend {
    async fn query_gates(
        &self,
        op: &str,
        column: &str,
        value: i64,
    ) -> Result<Vec<Gate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {GATE_COLUMNS} FROM gates WHERE {column} = ?1 ORDER BY id"),
                params![value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut gates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} next: {e}")))?
        {
            gates.push(row_to_gate(&row).map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?);
        }
        Ok(gates)
    }
}
