//! Inbound mail classification.
//!
//! Mail delivered to the app is checked in order (recipient, size,
//! precedence, sender) and the first failing check decides the outcome.
//! Accepted mail is handed to the detect-intent task.

use mail_parser::MessageParser;
use serde::Serialize;

use crate::config::MailSettings;
use crate::error::TaskError;
use crate::mail::address::extract_addrs;
use crate::tasks::{self, TaskQueue};

/// Result of classifying one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    WrongAddress,
    TooBig,
    WrongPrecedence,
    MissingFrom,
    Accepted(InboundMail),
}

impl InboundOutcome {
    /// Status text reported back to the mail service.
    pub fn message(&self) -> &'static str {
        match self {
            Self::WrongAddress => "Wrong address",
            Self::TooBig => "Too big",
            Self::WrongPrecedence => "Wrong precedence",
            Self::MissingFrom => "Missing From",
            Self::Accepted(_) => "Done",
        }
    }
}

/// Payload of the detect-intent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMail {
    pub to_addr: String,
    pub from_addr: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub body: String,
}

/// Raw text of the first header named `name`, unfolded.
fn raw_header(message: &mail_parser::Message<'_>, name: &str) -> Option<String> {
    let raw = message.raw_message();
    message
        .headers()
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))
        .and_then(|h| raw.get(h.offset_start as usize..h.offset_end as usize))
        .map(|bytes| {
            String::from_utf8_lossy(bytes)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|v| !v.is_empty())
}

/// Classify `raw`, addressed to `addressed_to`. Pure; nothing is enqueued.
pub fn classify(addressed_to: &str, raw: &[u8], settings: &MailSettings) -> InboundOutcome {
    if !addressed_to.eq_ignore_ascii_case(&settings.inbound_email_addr) {
        return InboundOutcome::WrongAddress;
    }
    if raw.len() > settings.max_body_size {
        return InboundOutcome::TooBig;
    }

    let Some(message) = MessageParser::default().parse(raw) else {
        return InboundOutcome::MissingFrom;
    };

    if let Some(precedence) = raw_header(&message, "Precedence")
        && ["bulk", "junk"].contains(&precedence.to_ascii_lowercase().as_str())
    {
        return InboundOutcome::WrongPrecedence;
    }

    let from_addr = ["X-Original-From", "From"]
        .iter()
        .filter_map(|name| raw_header(&message, name))
        .find_map(|value| extract_addrs(&[value]).into_iter().next());
    let Some(from_addr) = from_addr else {
        return InboundOutcome::MissingFrom;
    };

    InboundOutcome::Accepted(InboundMail {
        to_addr: addressed_to.to_string(),
        from_addr,
        subject: message.subject().unwrap_or_default().to_string(),
        in_reply_to: raw_header(&message, "In-Reply-To"),
        body: message
            .body_text(0)
            .map(|b| b.trim_end().to_string())
            .unwrap_or_default(),
    })
}

/// Classify and, when accepted, enqueue the detect-intent task.
pub async fn handle_incoming(
    addressed_to: &str,
    raw: &[u8],
    settings: &MailSettings,
    queue: &dyn TaskQueue,
) -> Result<InboundOutcome, TaskError> {
    let outcome = classify(addressed_to, raw, settings);
    match &outcome {
        InboundOutcome::Accepted(mail) => {
            tracing::info!(from = %mail.from_addr, subject = %mail.subject, "Inbound mail accepted");
            tasks::enqueue_json(queue, tasks::DETECT_INTENT, mail).await?;
        }
        rejected => {
            tracing::info!(to = %addressed_to, reason = rejected.message(), "Inbound mail rejected");
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::tasks::MemoryTaskQueue;

    fn settings() -> MailSettings {
        MailSettings::for_app("cr-status-staging", Environment::Local, false)
    }

    fn make_message(headers: &[(&str, &str)], body: &str) -> Vec<u8> {
        let mut raw = String::new();
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        raw.into_bytes()
    }

    fn header_lines(inbound: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-Original-From", "user@example.com".to_string()),
            ("From", "mailing-list@example.com".to_string()),
            ("To", inbound.to_string()),
            ("Cc", "other@chromium.org".to_string()),
            ("Subject", "Intent to Ship: Featurename".to_string()),
            ("In-Reply-To", "fake message id".to_string()),
        ]
    }

    fn as_refs<'a>(lines: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
        lines.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    #[test]
    fn wrong_address() {
        let outcome = classify("other@example.com", b"whatever", &settings());
        assert_eq!(outcome, InboundOutcome::WrongAddress);
        assert_eq!(outcome.message(), "Wrong address");
    }

    #[test]
    fn too_big() {
        let settings = settings();
        let mut data = vec![b'x'; settings.max_body_size];
        data.extend_from_slice(b" is too big");
        let outcome = classify(&settings.inbound_email_addr, &data, &settings);
        assert_eq!(outcome, InboundOutcome::TooBig);
        assert_eq!(outcome.message(), "Too big");
    }

    #[test]
    fn exactly_max_size_is_not_too_big() {
        let settings = settings();
        let data = vec![b'x'; settings.max_body_size];
        let outcome = classify(&settings.inbound_email_addr, &data, &settings);
        assert_ne!(outcome, InboundOutcome::TooBig);
    }

    #[test]
    fn junk_and_bulk_precedence() {
        let settings = settings();
        for precedence in ["Bulk", "Junk", "bulk"] {
            let mut lines = header_lines(&settings.inbound_email_addr);
            lines.push(("Precedence", precedence.to_string()));
            let raw = make_message(&as_refs(&lines), "I am on vacation!");
            let outcome = classify(&settings.inbound_email_addr, &raw, &settings);
            assert_eq!(outcome, InboundOutcome::WrongPrecedence);
            assert_eq!(outcome.message(), "Wrong precedence");
        }
    }

    #[test]
    fn unclear_from() {
        let settings = settings();
        let raw = make_message(&[("Subject", "hi")], "Guess who this is");
        let outcome = classify(&settings.inbound_email_addr, &raw, &settings);
        assert_eq!(outcome, InboundOutcome::MissingFrom);
        assert_eq!(outcome.message(), "Missing From");
    }

    #[test]
    fn prefers_original_from() {
        let settings = settings();
        let lines = header_lines(&settings.inbound_email_addr);
        let raw = make_message(&as_refs(&lines), "Please review");
        let InboundOutcome::Accepted(mail) = classify(&settings.inbound_email_addr, &raw, &settings)
        else {
            panic!("expected accepted mail");
        };
        assert_eq!(mail.to_addr, settings.inbound_email_addr);
        assert_eq!(mail.from_addr, "user@example.com");
        assert_eq!(mail.subject, "Intent to Ship: Featurename");
        assert_eq!(mail.in_reply_to.as_deref(), Some("fake message id"));
        assert_eq!(mail.body, "Please review");
    }

    #[test]
    fn falls_back_to_mailing_list_from() {
        let settings = settings();
        let lines: Vec<_> = header_lines(&settings.inbound_email_addr)
            .into_iter()
            .filter(|(k, _)| *k != "X-Original-From")
            .collect();
        let raw = make_message(&as_refs(&lines), "Please review");
        let InboundOutcome::Accepted(mail) = classify(&settings.inbound_email_addr, &raw, &settings)
        else {
            panic!("expected accepted mail");
        };
        assert_eq!(mail.from_addr, "mailing-list@example.com");
    }

    #[tokio::test]
    async fn accepted_mail_is_enqueued() {
        let settings = settings();
        let queue = MemoryTaskQueue::new();
        let lines = header_lines(&settings.inbound_email_addr);
        let raw = make_message(&as_refs(&lines), "Please review");

        let outcome = handle_incoming(&settings.inbound_email_addr, &raw, &settings, &queue)
            .await
            .unwrap();
        assert_eq!(outcome.message(), "Done");

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "/tasks/detect-intent");
        assert_eq!(
            tasks[0].payload,
            serde_json::json!({
                "to_addr": settings.inbound_email_addr,
                "from_addr": "user@example.com",
                "subject": "Intent to Ship: Featurename",
                "in_reply_to": "fake message id",
                "body": "Please review",
            })
        );
    }

    #[tokio::test]
    async fn rejected_mail_is_not_enqueued() {
        let settings = settings();
        let queue = MemoryTaskQueue::new();
        handle_incoming("other@example.com", b"x", &settings, &queue)
            .await
            .unwrap();
        assert!(queue.tasks().is_empty());
    }
}
