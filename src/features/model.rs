//! Feature data model: entries, stages, milestone sets, and the
//! intent-stage / stage-type enumerations that drive review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::review::activity::FieldChange;

/// What kind of launch a feature follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "i64", try_from = "i64")]
pub enum FeatureType {
    /// New feature incubation.
    #[default]
    Incubate,
    /// Existing feature implementation.
    Existing,
    /// Web developer facing code change (PSA only).
    CodeChange,
    /// Feature deprecation.
    Deprecation,
    /// Enterprise rollout.
    Enterprise,
}

impl FeatureType {
    pub fn id(self) -> i64 {
        match self {
            Self::Incubate => 0,
            Self::Existing => 1,
            Self::CodeChange => 2,
            Self::Deprecation => 3,
            Self::Enterprise => 4,
        }
    }
}

impl From<FeatureType> for i64 {
    fn from(t: FeatureType) -> Self {
        t.id()
    }
}

impl TryFrom<i64> for FeatureType {
    type Error = String;
    fn try_from(id: i64) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::Incubate),
            1 => Ok(Self::Existing),
            2 => Ok(Self::CodeChange),
            3 => Ok(Self::Deprecation),
            4 => Ok(Self::Enterprise),
            _ => Err(format!("Unknown feature type: {id}")),
        }
    }
}

/// Process step an intent email is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "i64", try_from = "i64")]
pub enum IntentStage {
    #[default]
    None,
    Incubate,
    Implement,
    Experiment,
    ImplementShip,
    OriginTrial,
    ExtendOriginTrial,
    Ship,
    Removed,
    Shipped,
    Parked,
    Rollout,
}

impl IntentStage {
    pub const ALL: [IntentStage; 12] = [
        Self::None,
        Self::Incubate,
        Self::Implement,
        Self::Experiment,
        Self::ImplementShip,
        Self::OriginTrial,
        Self::ExtendOriginTrial,
        Self::Ship,
        Self::Removed,
        Self::Shipped,
        Self::Parked,
        Self::Rollout,
    ];

    pub fn id(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Implement => 1,
            Self::Experiment => 2,
            Self::ImplementShip => 3,
            Self::ExtendOriginTrial => 4,
            Self::Ship => 5,
            Self::Removed => 6,
            Self::Incubate => 7,
            Self::Shipped => 8,
            Self::Parked => 9,
            Self::Rollout => 10,
            Self::OriginTrial => 11,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Human-readable stage name shown in subjects and activity text.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Incubate => "Start incubating",
            Self::Implement => "Start prototyping",
            Self::Experiment => "Dev trials and iterate on design",
            Self::ImplementShip => "Evaluate readiness to ship",
            Self::OriginTrial => "Origin Trial",
            Self::ExtendOriginTrial => "Extend Origin Trial",
            Self::Ship => "Prepare to ship",
            Self::Removed => "Removed",
            Self::Shipped => "Shipped",
            Self::Parked => "Parked",
            Self::Rollout => "Rollout",
        }
    }
}

impl From<IntentStage> for i64 {
    fn from(s: IntentStage) -> Self {
        s.id()
    }
}

impl TryFrom<i64> for IntentStage {
    type Error = String;
    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| format!("Unknown intent stage: {id}"))
    }
}

/// Numeric stage types. The hundreds digit encodes the feature type
/// (1xx new feature, 2xx existing, 3xx code change, 4xx deprecation).
pub mod stage_types {
    pub const BLINK_INCUBATE: i64 = 110;
    pub const BLINK_PROTOTYPE: i64 = 120;
    pub const BLINK_DEV_TRIAL: i64 = 130;
    pub const BLINK_EVAL_READINESS: i64 = 140;
    pub const BLINK_ORIGIN_TRIAL: i64 = 150;
    pub const BLINK_EXTEND_ORIGIN_TRIAL: i64 = 151;
    pub const BLINK_SHIPPING: i64 = 160;

    pub const FAST_PROTOTYPE: i64 = 220;
    pub const FAST_DEV_TRIAL: i64 = 230;
    pub const FAST_ORIGIN_TRIAL: i64 = 250;
    pub const FAST_EXTEND_ORIGIN_TRIAL: i64 = 251;
    pub const FAST_SHIPPING: i64 = 260;

    pub const PSA_IMPLEMENT: i64 = 320;
    pub const PSA_DEV_TRIAL: i64 = 330;
    pub const PSA_SHIPPING: i64 = 360;

    pub const DEP_PLAN: i64 = 410;
    pub const DEP_DEV_TRIAL: i64 = 430;
    pub const DEP_DEPRECATION_TRIAL: i64 = 450;
    pub const DEP_EXTEND_DEPRECATION_TRIAL: i64 = 451;
    pub const DEP_SHIPPING: i64 = 460;

    pub const ENT_ROLLOUT: i64 = 1061;
    pub const ENT_SHIPPED: i64 = 1070;

    /// Stages whose approval creates an origin (or deprecation) trial.
    pub const ORIGIN_TRIAL: [i64; 3] = [BLINK_ORIGIN_TRIAL, FAST_ORIGIN_TRIAL, DEP_DEPRECATION_TRIAL];

    /// Stages whose approval extends an existing trial.
    pub const EXTEND_ORIGIN_TRIAL: [i64; 3] = [
        BLINK_EXTEND_ORIGIN_TRIAL,
        FAST_EXTEND_ORIGIN_TRIAL,
        DEP_EXTEND_DEPRECATION_TRIAL,
    ];

    pub fn is_origin_trial(stage_type: i64) -> bool {
        ORIGIN_TRIAL.contains(&stage_type)
    }

    pub fn is_extend_origin_trial(stage_type: i64) -> bool {
        EXTEND_ORIGIN_TRIAL.contains(&stage_type)
    }
}

/// Map a stage type to the intent stage it belongs to.
pub fn intent_stage_for(stage_type: i64) -> IntentStage {
    use stage_types::*;
    match stage_type {
        BLINK_INCUBATE => IntentStage::Incubate,
        BLINK_PROTOTYPE | FAST_PROTOTYPE | PSA_IMPLEMENT | DEP_PLAN => IntentStage::Implement,
        BLINK_DEV_TRIAL | FAST_DEV_TRIAL | PSA_DEV_TRIAL | DEP_DEV_TRIAL => IntentStage::Experiment,
        BLINK_EVAL_READINESS => IntentStage::ImplementShip,
        BLINK_ORIGIN_TRIAL | FAST_ORIGIN_TRIAL | DEP_DEPRECATION_TRIAL => IntentStage::OriginTrial,
        BLINK_EXTEND_ORIGIN_TRIAL | FAST_EXTEND_ORIGIN_TRIAL | DEP_EXTEND_DEPRECATION_TRIAL => {
            IntentStage::ExtendOriginTrial
        }
        BLINK_SHIPPING | FAST_SHIPPING | PSA_SHIPPING | DEP_SHIPPING => IntentStage::Ship,
        ENT_ROLLOUT => IntentStage::Rollout,
        ENT_SHIPPED => IntentStage::Shipped,
        _ => IntentStage::None,
    }
}

/// First/last milestones per platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop_first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop_last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webview_first: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webview_last: Option<i64>,
}

/// One phase of a feature's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub feature_id: i64,
    pub stage_type: i64,
    #[serde(default)]
    pub milestones: MilestoneSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_thread_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_goals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_risks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_extension_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ot_display_name: Option<String>,
    /// Finch / rollout URL for shipping stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout_url: Option<String>,
}

impl Stage {
    /// A stage with no id yet (assigned on insert).
    pub fn new(feature_id: i64, stage_type: i64) -> Self {
        Self {
            id: 0,
            feature_id,
            stage_type,
            milestones: MilestoneSet::default(),
            intent_thread_url: None,
            experiment_goals: None,
            experiment_risks: None,
            experiment_extension_reason: None,
            announcement_url: None,
            ot_display_name: None,
            rollout_url: None,
        }
    }

    pub fn with_milestones(mut self, milestones: MilestoneSet) -> Self {
        self.milestones = milestones;
        self
    }

    pub fn intent_stage(&self) -> IntentStage {
        intent_stage_for(self.stage_type)
    }
}

/// A tracked feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub id: i64,
    pub name: String,
    pub summary: String,
    pub category: i64,
    pub feature_type: FeatureType,
    pub intent_stage: IntentStage,
    #[serde(default)]
    pub owner_emails: Vec<String>,
    #[serde(default)]
    pub editor_emails: Vec<String>,
    #[serde(default)]
    pub cc_emails: Vec<String>,
    #[serde(default)]
    pub motivation: Option<String>,
    #[serde(default)]
    pub spec_link: Option<String>,
    #[serde(default)]
    pub bug_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Fields that can be changed through the features API.
pub const EDITABLE_FIELDS: [&str; 10] = [
    "name",
    "summary",
    "category",
    "intent_stage",
    "owner_emails",
    "editor_emails",
    "cc_emails",
    "motivation",
    "spec_link",
    "bug_url",
];

impl FeatureEntry {
    /// A new feature with no id yet (assigned on insert).
    pub fn new(name: impl Into<String>, summary: impl Into<String>, category: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            summary: summary.into(),
            category,
            feature_type: FeatureType::default(),
            intent_stage: IntentStage::default(),
            owner_emails: Vec::new(),
            editor_emails: Vec::new(),
            cc_emails: Vec::new(),
            motivation: None,
            spec_link: None,
            bug_url: None,
            deleted: false,
            created: now,
            updated: now,
        }
    }

    pub fn with_owners(mut self, owners: &[&str]) -> Self {
        self.owner_emails = owners.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_feature_type(mut self, feature_type: FeatureType) -> Self {
        self.feature_type = feature_type;
        self
    }

    pub fn with_intent_stage(mut self, intent_stage: IntentStage) -> Self {
        self.intent_stage = intent_stage;
        self
    }

    /// Whether `email` owns or edits this feature.
    pub fn is_owner_or_editor(&self, email: &str) -> bool {
        self.owner_emails
            .iter()
            .chain(self.editor_emails.iter())
            .any(|e| e.eq_ignore_ascii_case(email))
    }

    /// JSON form of an editable field's current value.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        let value = match field {
            "name" => Value::from(self.name.clone()),
            "summary" => Value::from(self.summary.clone()),
            "category" => Value::from(self.category),
            "intent_stage" => Value::from(self.intent_stage.id()),
            "owner_emails" => Value::from(self.owner_emails.clone()),
            "editor_emails" => Value::from(self.editor_emails.clone()),
            "cc_emails" => Value::from(self.cc_emails.clone()),
            "motivation" => Value::from(self.motivation.clone()),
            "spec_link" => Value::from(self.spec_link.clone()),
            "bug_url" => Value::from(self.bug_url.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// Set an editable field and report the change.
    pub fn apply_update(&mut self, field: &str, value: &Value) -> Result<FieldChange, String> {
        if !EDITABLE_FIELDS.contains(&field) {
            return Err(format!(
                "Unknown or read-only field '{field}'; editable fields are {}",
                EDITABLE_FIELDS.join(", ")
            ));
        }
        let old = self.field_value(field).unwrap_or(Value::Null);

        match field {
            "name" => self.name = expect_string(field, value)?,
            "summary" => self.summary = expect_string(field, value)?,
            "category" => self.category = expect_int(field, value)?,
            "intent_stage" => {
                self.intent_stage = IntentStage::try_from(expect_int(field, value)?)?;
            }
            "owner_emails" => self.owner_emails = expect_list(field, value)?,
            "editor_emails" => self.editor_emails = expect_list(field, value)?,
            "cc_emails" => self.cc_emails = expect_list(field, value)?,
            "motivation" => self.motivation = expect_opt_string(field, value)?,
            "spec_link" => self.spec_link = expect_opt_string(field, value)?,
            "bug_url" => self.bug_url = expect_opt_string(field, value)?,
            _ => return Err(format!("Field '{field}' cannot be updated")),
        }

        let new = self.field_value(field).unwrap_or(Value::Null);
        Ok(FieldChange::new(field, old, new))
    }
}

fn expect_string(field: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("Field '{field}' must be a string"))
}

fn expect_opt_string(field: &str, value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(format!("Field '{field}' must be a string or null")),
    }
}

fn expect_int(field: &str, value: &Value) -> Result<i64, String> {
    value
        .as_i64()
        .ok_or_else(|| format!("Field '{field}' must be an integer"))
}

fn expect_list(field: &str, value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| expect_string(field, v))
            .collect(),
        Value::String(s) => Ok(s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()),
        _ => Err(format!("Field '{field}' must be a list of strings")),
    }
}
