//! Gates, votes, and the enumerations reviewers work with.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a vote, and of the gate it was cast on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum VoteState {
    Na,
    ReviewRequested,
    ReviewStarted,
    NeedsWork,
    Approved,
    Denied,
    NoResponse,
    InternalReview,
    NaRequested,
    NaSelf,
    NaVerified,
}

impl VoteState {
    pub const ALL: [VoteState; 11] = [
        Self::Na,
        Self::ReviewRequested,
        Self::ReviewStarted,
        Self::NeedsWork,
        Self::Approved,
        Self::Denied,
        Self::NoResponse,
        Self::InternalReview,
        Self::NaRequested,
        Self::NaSelf,
        Self::NaVerified,
    ];

    pub fn id(self) -> i64 {
        match self {
            Self::Na => 1,
            Self::ReviewRequested => 2,
            Self::ReviewStarted => 3,
            Self::NeedsWork => 4,
            Self::Approved => 5,
            Self::Denied => 6,
            Self::NoResponse => 7,
            Self::InternalReview => 8,
            Self::NaRequested => 9,
            Self::NaSelf => 10,
            Self::NaVerified => 11,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Snake-case name used in activity amendments and notifications.
    pub fn name(self) -> &'static str {
        match self {
            Self::Na => "na",
            Self::ReviewRequested => "review_requested",
            Self::ReviewStarted => "review_started",
            Self::NeedsWork => "needs_work",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::NoResponse => "no_response",
            Self::InternalReview => "internal_review",
            Self::NaRequested => "na_requested",
            Self::NaSelf => "na_self",
            Self::NaVerified => "na_verified",
        }
    }

    /// States a feature owner may set without being a reviewer.
    pub fn owner_settable(self) -> bool {
        matches!(self, Self::ReviewRequested | Self::NaRequested)
    }
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<VoteState> for i64 {
    fn from(s: VoteState) -> Self {
        s.id()
    }
}

impl TryFrom<i64> for VoteState {
    type Error = String;
    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| format!("Invalid vote state: {id}"))
    }
}

/// Numeric gate types and their display metadata.
pub mod gate_types {
    pub const API_PROTOTYPE: i64 = 1;
    pub const API_ORIGIN_TRIAL: i64 = 2;
    pub const API_EXTEND_ORIGIN_TRIAL: i64 = 3;
    pub const API_SHIP: i64 = 4;
    pub const API_PLAN: i64 = 5;
    pub const PRIVACY_ORIGIN_TRIAL: i64 = 32;
    pub const PRIVACY_SHIP: i64 = 34;
    pub const SECURITY_ORIGIN_TRIAL: i64 = 42;
    pub const SECURITY_SHIP: i64 = 44;
    pub const ENTERPRISE_SHIP: i64 = 54;
    pub const DEBUGGABILITY_ORIGIN_TRIAL: i64 = 62;
    pub const DEBUGGABILITY_SHIP: i64 = 64;
    pub const TESTING_SHIP: i64 = 74;

    /// Cross-functional review gates every shipping stage carries.
    pub const XFN_SHIP: [i64; 5] = [
        PRIVACY_SHIP,
        SECURITY_SHIP,
        ENTERPRISE_SHIP,
        DEBUGGABILITY_SHIP,
        TESTING_SHIP,
    ];

    /// Gates whose team lets the feature owner mark the review N/A.
    pub fn self_certifiable(gate_type: i64) -> bool {
        matches!(
            gate_type,
            PRIVACY_ORIGIN_TRIAL
                | PRIVACY_SHIP
                | DEBUGGABILITY_ORIGIN_TRIAL
                | DEBUGGABILITY_SHIP
                | TESTING_SHIP
        )
    }

    /// Display metadata for a gate type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GateInfo {
        pub name: &'static str,
        pub team_name: &'static str,
    }

    pub fn info(gate_type: i64) -> GateInfo {
        let (name, team_name) = match gate_type {
            API_PROTOTYPE => ("Intent to Prototype", "API Owners"),
            API_ORIGIN_TRIAL => ("Intent to Experiment", "API Owners"),
            API_EXTEND_ORIGIN_TRIAL => ("Intent to Extend Experiment", "API Owners"),
            API_SHIP => ("Intent to Ship", "API Owners"),
            API_PLAN => ("Intent to Deprecate and Remove", "API Owners"),
            PRIVACY_ORIGIN_TRIAL => ("Privacy OT Review", "Privacy"),
            PRIVACY_SHIP => ("Privacy Ship Review", "Privacy"),
            SECURITY_ORIGIN_TRIAL => ("Security OT Review", "WP Security"),
            SECURITY_SHIP => ("Security Ship Review", "WP Security"),
            ENTERPRISE_SHIP => ("Enterprise Ship Review", "Enterprise"),
            DEBUGGABILITY_ORIGIN_TRIAL => ("Debuggability OT Review", "Debuggability"),
            DEBUGGABILITY_SHIP => ("Debuggability Ship Review", "Debuggability"),
            TESTING_SHIP => ("Testing Ship Review", "Testing"),
            _ => ("Unknown gate", "Unknown team"),
        };
        GateInfo { name, team_name }
    }
}

/// An approval checkpoint attached to a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub id: i64,
    pub feature_id: i64,
    pub stage_id: i64,
    pub gate_type: i64,
    pub state: VoteState,
    pub requested_on: Option<DateTime<Utc>>,
    pub responded_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_emails: Vec<String>,
}

impl Gate {
    /// A gate with no id yet (assigned on insert), starting in `NA`.
    pub fn new(feature_id: i64, stage_id: i64, gate_type: i64) -> Self {
        Self {
            id: 0,
            feature_id,
            stage_id,
            gate_type,
            state: VoteState::Na,
            requested_on: None,
            responded_on: None,
            assignee_emails: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: VoteState) -> Self {
        self.state = state;
        self
    }

    pub fn name(&self) -> &'static str {
        gate_types::info(self.gate_type).name
    }

    pub fn team_name(&self) -> &'static str {
        gate_types::info(self.gate_type).team_name
    }

    pub fn is_approved(&self) -> bool {
        self.state == VoteState::Approved
    }

    /// Whether an owner or editor (not a reviewer) may cast `state` here.
    pub fn owner_may_set(&self, state: VoteState) -> bool {
        state.owner_settable()
            || (state == VoteState::NaSelf && gate_types::self_certifiable(self.gate_type))
    }

    /// Apply a newly cast vote's state and bump request/response times.
    pub fn apply_vote(&mut self, state: VoteState, now: DateTime<Utc>) {
        match state {
            VoteState::ReviewRequested | VoteState::NaRequested => self.requested_on = Some(now),
            _ => self.responded_on = Some(now),
        }
        self.state = state;
    }
}

/// One reviewer's vote on a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub feature_id: i64,
    pub gate_id: i64,
    pub gate_type: i64,
    pub set_by: String,
    pub set_on: DateTime<Utc>,
    pub state: VoteState,
}
