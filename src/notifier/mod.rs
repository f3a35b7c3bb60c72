//! Activity recording and approval notifications.

pub mod activity;
pub mod approvals;

pub use activity::{ActivityRecorder, NEEDS_WORK_NOTE, PropChange};
pub use approvals::{ApprovalNotification, ApprovalNotifier};
