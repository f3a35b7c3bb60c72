//! Feature entries and their lifecycle stages.

pub mod model;

pub use model::{FeatureEntry, FeatureType, IntentStage, MilestoneSet, Stage, intent_stage_for, stage_types};
