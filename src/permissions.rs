//! Who may edit features and vote on gates.

use crate::features::FeatureEntry;

/// Admin and reviewer allowlists.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    admin_emails: Vec<String>,
    reviewer_emails: Vec<String>,
}

fn listed(list: &[String], email: &str) -> bool {
    list.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(email))
}

impl Permissions {
    pub fn new(admin_emails: Vec<String>, reviewer_emails: Vec<String>) -> Self {
        Self {
            admin_emails,
            reviewer_emails,
        }
    }

    pub fn is_admin(&self, email: &str) -> bool {
        listed(&self.admin_emails, email)
    }

    /// Owners, editors, and admins may edit a feature and preview its intents.
    pub fn can_edit(&self, feature: &FeatureEntry, email: &str) -> bool {
        self.is_admin(email) || feature.is_owner_or_editor(email)
    }

    /// Reviewers and admins may cast any vote.
    pub fn can_review(&self, email: &str) -> bool {
        self.is_admin(email) || listed(&self.reviewer_emails, email)
    }
}
