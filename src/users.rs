//! Per-user notification preferences.

use serde::{Deserialize, Serialize};

/// Notification preferences for one email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPref {
    pub email: String,
    pub notify_as_starrer: bool,
    /// Set once mail to this address has bounced.
    pub bounced: bool,
}

impl UserPref {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            notify_as_starrer: true,
            bounced: false,
        }
    }
}
