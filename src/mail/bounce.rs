//! Bounce handling: flag the recipient and tell a human.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, MailError};
use crate::mail::outbound::{MailBody, MailDispatcher, OutboundEmail};
use crate::store::Database;
use crate::users::UserPref;

/// The message that bounced, as reported by the mail service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OriginalMessage {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: String,
}

/// Bounce notification body posted to `/_ah/bounce`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BounceReport {
    #[serde(default)]
    pub original: OriginalMessage,
    #[serde(default)]
    pub notification: Option<Value>,
}

impl BounceReport {
    /// The address that bounced, if the report names one.
    pub fn recipient(&self) -> Option<&str> {
        Some(self.original.to.trim()).filter(|to| !to.is_empty())
    }
}

/// Escalation subject for a bounced address.
pub fn escalation_subject(addr: &str) -> String {
    format!("Mail to '{addr}' bounced")
}

/// Plain-text escalation body quoting the bounced message.
pub fn escalation_body(original: &OriginalMessage) -> String {
    format!(
        "The following message bounced.\n\
         =================\n\
         From: {}\n\
         To: {}\n\
         Subject: {}\n\
         \n\
         {}\n",
        original.from, original.to, original.subject, original.text
    )
}

/// Mark the bounced address and send the escalation mail.
///
/// Safe to repeat: the preference upsert converges on `bounced = true` and a
/// duplicate only produces another escalation mail. A report without a
/// recipient is rejected before anything is stored or sent.
pub async fn process_bounce(
    report: &BounceReport,
    db: &dyn Database,
    dispatcher: &MailDispatcher,
) -> Result<UserPref, Error> {
    let addr = report.recipient().ok_or_else(|| MailError::InvalidAddress {
        address: report.original.to.clone(),
        reason: "bounce report names no recipient".into(),
    })?;
    tracing::info!(to = %addr, "Mail bounced");

    let pref = db.mark_bounced(addr).await?;

    let escalation = OutboundEmail::new(
        dispatcher.settings().bounce_escalation_addr.clone(),
        escalation_subject(addr),
        MailBody::Text(escalation_body(&report.original)),
    );
    dispatcher.send_direct(&escalation).await?;

    Ok(pref)
}
