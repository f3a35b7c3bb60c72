//! Review gates, votes, cross-functional gates, and the activity log.

pub mod activity;
pub mod model;
pub mod xfn;

pub use activity::{Activity, Amendment, FieldChange};
pub use model::{Gate, Vote, VoteState, gate_types};
