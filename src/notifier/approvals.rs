//! Origin-trial approval notifications.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Error;
use crate::features::{FeatureEntry, Stage, stage_types};
use crate::review::Gate;
use crate::store::Database;
use crate::tasks::{self, TaskQueue};

/// Which approval notification, if any, a gate change produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalNotification {
    TrialCreationApproved,
    TrialExtensionApproved,
}

impl ApprovalNotification {
    pub fn task_path(self) -> &'static str {
        match self {
            Self::TrialCreationApproved => tasks::OT_CREATION_APPROVED,
            Self::TrialExtensionApproved => tasks::OT_EXTENSION_APPROVED,
        }
    }
}

#[derive(Serialize)]
struct ApprovalTask<'a> {
    feature: &'a FeatureEntry,
    stage: &'a Stage,
    gate_id: i64,
}

pub struct ApprovalNotifier {
    db: Arc<dyn Database>,
    tasks: Arc<dyn TaskQueue>,
}

impl ApprovalNotifier {
    pub fn new(db: Arc<dyn Database>, tasks: Arc<dyn TaskQueue>) -> Self {
        Self { db, tasks }
    }

    /// Decide whether `gate`'s new state completes a trial approval.
    ///
    /// A trial creation is approved only once every gate on its stage is
    /// approved; an extension needs just the triggering gate.
    pub async fn check_approvals(
        &self,
        feature: &FeatureEntry,
        stage: &Stage,
        gate: &Gate,
    ) -> Result<Option<ApprovalNotification>, Error> {
        let notification = if stage_types::is_origin_trial(stage.stage_type) {
            let gates = self.db.gates_for_stage(stage.id).await?;
            let all_approved = !gates.is_empty() && gates.iter().all(Gate::is_approved);
            all_approved.then_some(ApprovalNotification::TrialCreationApproved)
        } else if stage_types::is_extend_origin_trial(stage.stage_type) {
            gate.is_approved()
                .then_some(ApprovalNotification::TrialExtensionApproved)
        } else {
            None
        };

        if let Some(notification) = notification {
            let task = ApprovalTask {
                feature,
                stage,
                gate_id: gate.id,
            };
            tasks::enqueue_json(self.tasks.as_ref(), notification.task_path(), &task).await?;
            tracing::info!(
                feature_id = feature.id,
                stage_id = stage.id,
                notification = ?notification,
                "Approval notification enqueued"
            );
        }

        Ok(notification)
    }
}
