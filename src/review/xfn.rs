//! Cross-functional review gates on shipping stages.

use tracing::info;

use crate::error::DatabaseError;
use crate::features::{IntentStage, Stage};
use crate::review::{Gate, gate_types};
use crate::store::Database;

/// Gate types a stage of this kind should carry for cross-functional review.
pub fn xfn_gate_types(stage: &Stage) -> &'static [i64] {
    if stage.intent_stage() == IntentStage::Ship {
        &gate_types::XFN_SHIP
    } else {
        &[]
    }
}

/// Create whichever cross-functional gates `stage` is missing.
///
/// Existing gates of the same type are left alone, so calling this twice
/// creates nothing the second time.
pub async fn add_missing_xfn_gates(
    db: &dyn Database,
    stage: &Stage,
) -> Result<Vec<Gate>, DatabaseError> {
    let existing: Vec<i64> = db
        .gates_for_stage(stage.id)
        .await?
        .iter()
        .map(|g| g.gate_type)
        .collect();

    let mut created = Vec::new();
    for &gate_type in xfn_gate_types(stage) {
        if existing.contains(&gate_type) {
            continue;
        }
        let mut gate = Gate::new(stage.feature_id, stage.id, gate_type);
        gate.id = db.insert_gate(&gate).await?;
        created.push(gate);
    }
    info!(
        feature_id = stage.feature_id,
        stage_id = stage.id,
        created = created.len(),
        "Added missing xfn gates"
    );
    Ok(created)
}
