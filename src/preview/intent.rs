//! What goes into an intent email: subject prefix, sections, and the data
//! the renderer needs.

use serde::Serialize;

use crate::error::ApiError;
use crate::features::{FeatureEntry, FeatureType, IntentStage, Stage};
use crate::permissions::Permissions;
use crate::review::Gate;
use crate::store::Database;

/// Subject line prefix for an intent email at `intent_stage`.
pub fn compute_subject_prefix(feature: &FeatureEntry, intent_stage: IntentStage) -> String {
    let deprecation = feature.feature_type == FeatureType::Deprecation;
    let prefix = match intent_stage {
        IntentStage::Implement if deprecation => "Intent to Deprecate and Remove",
        IntentStage::Implement => "Intent to Prototype",
        IntentStage::Experiment => "Ready for Developer Testing",
        IntentStage::OriginTrial if deprecation => "Request for Deprecation Trial",
        IntentStage::OriginTrial => "Intent to Experiment",
        IntentStage::ExtendOriginTrial if deprecation => "Intent to Extend Deprecation Trial",
        IntentStage::ExtendOriginTrial => "Intent to Extend Experiment",
        IntentStage::Ship if feature.feature_type == FeatureType::CodeChange => {
            "Web-Facing Change PSA"
        }
        IntentStage::Ship => "Intent to Ship",
        IntentStage::Removed => "Intent to Extend Deprecation Trial",
        other => return format!("Intent stage \"{}\"", other.display_name()),
    };
    prefix.to_string()
}

/// Body sections shown for an intent stage, in display order.
pub fn sections_to_show(intent_stage: IntentStage) -> Vec<&'static str> {
    match intent_stage {
        IntentStage::Implement => vec!["motivation"],
        IntentStage::Experiment => vec!["i2p_thread", "experiment"],
        IntentStage::ImplementShip => vec![
            "need_api_owners_lgtms",
            "motivation",
            "tracking_bug",
            "sample_links",
        ],
        IntentStage::OriginTrial => vec!["i2p_thread", "experiment", "experiment_risks"],
        IntentStage::ExtendOriginTrial | IntentStage::Removed => {
            vec!["i2p_thread", "experiment", "extension_reason"]
        }
        IntentStage::Ship => vec![
            "need_api_owners_lgtms",
            "i2p_thread",
            "tracking_bug",
            "sample_links",
            "ship",
        ],
        _ => Vec::new(),
    }
}

/// Per-page values shared by every preview of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageData {
    pub default_url: String,
    pub sections_to_show: Vec<&'static str>,
    pub subject_prefix: String,
}

pub fn page_data(site_url: &str, feature: &FeatureEntry, intent_stage: IntentStage) -> PageData {
    PageData {
        default_url: format!("{site_url}/feature/{}", feature.id),
        sections_to_show: sections_to_show(intent_stage),
        subject_prefix: compute_subject_prefix(feature, intent_stage),
    }
}

/// What the caller asked to preview.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewRequest {
    pub feature_id: i64,
    pub intent_stage: Option<IntentStage>,
    pub gate_id: Option<i64>,
}

/// Everything the renderer needs.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateData {
    pub feature: FeatureEntry,
    pub intent_stage: IntentStage,
    /// Stage the intent is about, when one could be determined.
    pub stage: Option<Stage>,
    pub gate: Option<Gate>,
    pub stages: Vec<Stage>,
    #[serde(flatten)]
    pub page: PageData,
}

impl TemplateData {
    /// Intent thread of the feature's prototype stage, if any.
    pub fn prototype_thread(&self) -> Option<&str> {
        self.stages
            .iter()
            .filter(|s| s.intent_stage() == IntentStage::Implement)
            .find_map(|s| s.intent_thread_url.as_deref())
    }

    /// The feature's shipping stage, if any.
    pub fn ship_stage(&self) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|s| s.intent_stage() == IntentStage::Ship)
    }
}

/// Why a preview could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Sign-in required")]
    LoginRequired,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<crate::error::DatabaseError> for PreviewError {
    fn from(e: crate::error::DatabaseError) -> Self {
        Self::Api(e.into())
    }
}

/// Load and check everything needed to preview one intent email.
///
/// Anonymous users must sign in. The feature and gate must exist and the
/// user must be able to edit the feature. The intent stage comes from the
/// gate's stage when a gate is given, otherwise from the request.
pub async fn template_data(
    db: &dyn Database,
    permissions: &Permissions,
    site_url: &str,
    user: Option<&str>,
    req: PreviewRequest,
) -> Result<TemplateData, PreviewError> {
    let Some(user) = user else {
        return Err(PreviewError::LoginRequired);
    };

    let feature = db
        .get_feature(req.feature_id)
        .await?
        .filter(|f| !f.deleted)
        .ok_or_else(|| ApiError::NotFound(format!("Feature {} not found", req.feature_id)))?;

    if !permissions.can_edit(&feature, user) {
        return Err(ApiError::Forbidden("User may not view this feature's intents".into()).into());
    }

    let stages = db.stages_for_feature(feature.id).await?;

    let gate = match req.gate_id {
        Some(gate_id) => Some(
            db.get_gate(gate_id)
                .await?
                .filter(|g| g.feature_id == feature.id)
                .ok_or_else(|| ApiError::NotFound(format!("Gate {gate_id} not found")))?,
        ),
        None => None,
    };

    let gate_stage = gate
        .as_ref()
        .and_then(|g| stages.iter().find(|s| s.id == g.stage_id).cloned());

    let (intent_stage, stage) = match (&gate_stage, req.intent_stage) {
        (Some(stage), _) => (stage.intent_stage(), Some(stage.clone())),
        (None, Some(intent)) => (
            intent,
            stages.iter().find(|s| s.intent_stage() == intent).cloned(),
        ),
        (None, None) => {
            return Err(ApiError::BadRequest("Invalid gate ID or intent stage".into()).into());
        }
    };

    let page = page_data(site_url, &feature, intent_stage);
    tracing::debug!(
        feature_id = feature.id,
        intent_stage = ?intent_stage,
        "Intent preview data assembled"
    );

    Ok(TemplateData {
        feature,
        intent_stage,
        stage,
        gate,
        stages,
        page,
    })
}
