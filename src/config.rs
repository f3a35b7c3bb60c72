//! Configuration types, resolved from environment variables.
//!
//! Everything is read through a lookup function so tests can build a config
//! from a map instead of mutating the process environment.

use std::collections::HashMap;

use secrecy::SecretString;

use crate::error::ConfigError;

/// App id used when `APP_ID` is unset.
pub const DEFAULT_APP_ID: &str = "cr-status-staging";

/// App id of the production deployment.
pub const PRODUCTION_APP_ID: &str = "cr-status";

/// Default inbound mail size ceiling (100 KiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 100 * 1024;

/// Deployment environment, which decides how outbound mail is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Local,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "local" | "development" | "dev" | "test" => Ok(Self::Local),
            other => Err(ConfigError::InvalidValue {
                key: "APP_ENV".into(),
                message: format!("expected production, staging or local (got {other})"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Local => "local",
        }
    }
}

/// Mail addressing and inbound-handling settings.
#[derive(Debug, Clone)]
pub struct MailSettings {
    /// Deployment identifier; prefixes sender and archive addresses.
    pub app_id: String,
    pub environment: Environment,
    /// Master switch: when false, messages are built but never transmitted.
    pub send_email: bool,
    /// Optional `{user}`/`{domain}` template overriding non-production `to` rewriting.
    pub send_all_email_to: Option<String>,
    /// Domain of the monitored archive that receives non-production mail.
    pub archive_domain: String,
    /// Domain used to build the sender address (`admin@<app_id>.<mail_domain>`).
    pub mail_domain: String,
    /// Display name on the sender address.
    pub sender_name: String,
    pub inbound_email_addr: String,
    pub bounce_escalation_addr: String,
    /// Mailing list that never gets rewritten by `send_all_email_to`.
    pub review_comment_mailing_list: String,
    /// Inbound messages larger than this many bytes are rejected.
    pub max_body_size: usize,
}

impl MailSettings {
    /// Settings for a deployment with the given app id and defaults elsewhere.
    pub fn for_app(app_id: &str, environment: Environment, send_email: bool) -> Self {
        let mail_domain = "appspotmail.com".to_string();
        Self {
            app_id: app_id.to_string(),
            environment,
            send_email,
            send_all_email_to: None,
            archive_domain: "google.com".to_string(),
            inbound_email_addr: format!("chromestatus@{app_id}.{mail_domain}"),
            mail_domain,
            sender_name: "Chromestatus".to_string(),
            bounce_escalation_addr: "cr-status-bounces@google.com".to_string(),
            review_comment_mailing_list: "blink-dev@chromium.org".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Whether mail goes to its real recipients.
    pub fn is_production_sending(&self) -> bool {
        self.environment == Environment::Production && self.send_email
    }

    /// Bare sender address, e.g. `admin@cr-status.appspotmail.com`.
    pub fn sender_address(&self) -> String {
        format!("admin@{}.{}", self.app_id, self.mail_domain)
    }
}

/// SMTP relay used to actually transmit mail.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: String,
    /// Base URL used in links, e.g. `https://chromestatus.com`.
    pub site_url: String,
    /// Where anonymous users are redirected to sign in.
    pub login_url: String,
    /// Request header carrying the signed-in user's email.
    pub auth_user_header: String,
    pub admin_emails: Vec<String>,
    pub reviewer_emails: Vec<String>,
    /// Base URL of the deferred task handler; `None` logs tasks instead.
    pub tasks_base_url: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub mail: MailSettings,
}

impl AppConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from a map (tests and embedding).
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_id = get("APP_ID").unwrap_or_else(|| DEFAULT_APP_ID.to_string());
        let send_email = match get("SEND_EMAIL") {
            Some(v) => parse_bool("SEND_EMAIL", &v)?,
            None => false,
        };

        let environment = match get("APP_ENV") {
            Some(v) => Environment::parse(&v)?,
            None if app_id == PRODUCTION_APP_ID => Environment::Production,
            None if send_email => Environment::Staging,
            None => Environment::Local,
        };

        let mut mail = MailSettings::for_app(&app_id, environment, send_email);
        mail.send_all_email_to = get("SEND_ALL_EMAIL_TO").filter(|s| !s.trim().is_empty());
        if let Some(v) = get("INBOUND_EMAIL_ADDR") {
            mail.inbound_email_addr = v;
        }
        if let Some(v) = get("BOUNCE_ESCALATION_ADDR") {
            mail.bounce_escalation_addr = v;
        }
        if let Some(v) = get("REVIEW_COMMENT_MAILING_LIST") {
            mail.review_comment_mailing_list = v;
        }
        if let Some(v) = get("STAGING_ARCHIVE_DOMAIN") {
            mail.archive_domain = v;
        }
        if let Some(v) = get("MAX_BODY_SIZE") {
            mail.max_body_size = v.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "MAX_BODY_SIZE".into(),
                message: format!("{e}"),
            })?;
        }

        let port: u16 = get("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                port: get("SMTP_PORT").and_then(|s| s.parse().ok()).unwrap_or(587),
                username: get("SMTP_USERNAME").unwrap_or_default(),
                password: SecretString::from(get("SMTP_PASSWORD").unwrap_or_default()),
                host,
            }),
            None => None,
        };

        Ok(Self {
            port,
            db_path: get("LAUNCH_NOTIFY_DB_PATH")
                .unwrap_or_else(|| "./data/launch-notify.db".to_string()),
            site_url: get("SITE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://127.0.0.1:7777".to_string()),
            login_url: get("LOGIN_PAGE_URL").unwrap_or_else(|| "/_ah/login".to_string()),
            auth_user_header: get("AUTH_USER_HEADER")
                .unwrap_or_else(|| "x-authenticated-user-email".to_string())
                .to_ascii_lowercase(),
            admin_emails: split_list(get("ADMIN_EMAILS")),
            reviewer_emails: split_list(get("REVIEWER_EMAILS")),
            tasks_base_url: get("TASKS_BASE_URL").filter(|s| !s.trim().is_empty()),
            smtp,
            mail,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean (got {other})"),
        }),
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
