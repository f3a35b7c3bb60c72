//! Recipient rewriting and address-header parsing.

use crate::config::MailSettings;

/// Envelope recipients after environment rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Which envelope list an address is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    To,
    Cc,
}

/// Map logical recipients to the envelope the current deployment may use.
///
/// Production with sending enabled keeps every address. Anywhere else mail
/// goes to the monitored archive, encoded so the original recipient is still
/// readable in the archive address.
pub fn resolve(to: &[String], cc: &[String], settings: &MailSettings) -> Recipients {
    if settings.is_production_sending() {
        return Recipients {
            to: to.to_vec(),
            cc: cc.to_vec(),
        };
    }

    Recipients {
        to: to.iter().map(|a| rewrite(a, Slot::To, settings)).collect(),
        cc: cc.iter().map(|a| rewrite(a, Slot::Cc, settings)).collect(),
    }
}

fn rewrite(addr: &str, slot: Slot, settings: &MailSettings) -> String {
    let (user, domain) = split_addr(addr);

    if slot == Slot::To
        && let Some(template) = &settings.send_all_email_to
        && !addr.eq_ignore_ascii_case(&settings.review_comment_mailing_list)
    {
        return template.replace("{user}", user).replace("{domain}", domain);
    }

    let infix = match slot {
        Slot::To => "emails",
        Slot::Cc => "cc-emails",
    };
    format!(
        "{}-{infix}+{user}+{domain}@{}",
        settings.app_id, settings.archive_domain
    )
}

/// Split at the last `@`; an address without one has an empty domain.
fn split_addr(addr: &str) -> (&str, &str) {
    match addr.rsplit_once('@') {
        Some((user, domain)) => (user, domain),
        None => (addr, ""),
    }
}

/// Pull bare addresses out of address-header values.
///
/// Each value may hold several comma-separated entries of the form
/// `Display Name <addr>` or `addr`. Commas and angle brackets inside a quoted
/// display name are ignored.
pub fn extract_addrs<S: AsRef<str>>(header_values: &[S]) -> Vec<String> {
    header_values
        .iter()
        .flat_map(|v| split_entries(v.as_ref()))
        .filter_map(|entry| entry_address(&entry))
        .collect()
}

fn split_entries(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in value.chars() {
        match c {
            '"' if !in_angle => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);
    entries
}

fn entry_address(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    // The angle-bracketed part is the address, wherever the name ends.
    let mut in_quotes = false;
    let mut start = None;
    for (i, c) in entry.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => start = Some(i + 1),
            '>' if !in_quotes => {
                if let Some(s) = start {
                    let addr = entry[s..i].trim();
                    return (!addr.is_empty()).then(|| addr.to_string());
                }
            }
            _ => {}
        }
    }

    let bare = entry.trim_matches('"').trim();
    bare.contains('@').then(|| bare.to_string())
}
