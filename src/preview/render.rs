//! HTML rendering of an intent email preview.

use std::fmt::Write;

use crate::features::MilestoneSet;
use crate::preview::intent::TemplateData;

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn or_none(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => escape_html(v),
        _ => "None".to_string(),
    }
}

fn link(url: Option<&str>) -> String {
    match url {
        Some(u) if !u.trim().is_empty() => {
            let u = escape_html(u);
            format!("<a href=\"{u}\">{u}</a>")
        }
        _ => "None".to_string(),
    }
}

fn milestone_range(first: Option<i64>, last: Option<i64>) -> Option<String> {
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} to {l}")),
        (Some(f), None) => Some(f.to_string()),
        (None, Some(l)) => Some(format!("through {l}")),
        (None, None) => None,
    }
}

fn milestone_table(m: &MilestoneSet) -> String {
    let rows = [
        ("Desktop", milestone_range(m.desktop_first, m.desktop_last)),
        ("Android", milestone_range(m.android_first, m.android_last)),
        ("iOS", milestone_range(m.ios_first, m.ios_last)),
        ("Webview", milestone_range(m.webview_first, m.webview_last)),
    ];
    let mut out = String::new();
    for (platform, range) in rows {
        if let Some(range) = range {
            let _ = writeln!(out, "<tr><td>{platform}</td><td>{range}</td></tr>");
        }
    }
    if out.is_empty() {
        "<p>None</p>".to_string()
    } else {
        format!("<table>\n{out}</table>")
    }
}

fn section(out: &mut String, id: &str, heading: &str, body: &str) {
    let _ = writeln!(
        out,
        "<section id=\"{id}\">\n<h4>{heading}</h4>\n{body}\n</section>"
    );
}

fn render_section(out: &mut String, name: &str, data: &TemplateData) {
    let feature = &data.feature;
    let stage = data.stage.as_ref();
    match name {
        "motivation" => section(
            out,
            name,
            "Motivation",
            &format!("<p>{}</p>", or_none(feature.motivation.as_deref())),
        ),
        "i2p_thread" => section(
            out,
            name,
            "Blink-dev thread for the Intent to Prototype",
            &link(data.prototype_thread()),
        ),
        "experiment" => {
            let goals = or_none(stage.and_then(|s| s.experiment_goals.as_deref()));
            let milestones = stage
                .map(|s| milestone_table(&s.milestones))
                .unwrap_or_else(|| "<p>None</p>".to_string());
            section(
                out,
                name,
                "Goals for experimentation",
                &format!("<p>{goals}</p>\n<h4>Experimental timeline</h4>\n{milestones}"),
            );
        }
        "experiment_risks" => section(
            out,
            name,
            "Risks of the experiment",
            &format!(
                "<p>{}</p>",
                or_none(stage.and_then(|s| s.experiment_risks.as_deref()))
            ),
        ),
        "extension_reason" => section(
            out,
            name,
            "Reason this experiment is being extended",
            &format!(
                "<p>{}</p>",
                or_none(stage.and_then(|s| s.experiment_extension_reason.as_deref()))
            ),
        ),
        "need_api_owners_lgtms" => section(
            out,
            name,
            "API owner approval",
            "<p>This intent needs LGTMs from three API owners.</p>",
        ),
        "tracking_bug" => section(out, name, "Tracking bug", &link(feature.bug_url.as_deref())),
        "sample_links" => section(out, name, "Specification", &link(feature.spec_link.as_deref())),
        "ship" => {
            let ship = data.ship_stage();
            let milestones = ship
                .map(|s| milestone_table(&s.milestones))
                .unwrap_or_else(|| "<p>None</p>".to_string());
            let rollout = link(ship.and_then(|s| s.rollout_url.as_deref()));
            section(
                out,
                name,
                "Estimated milestones",
                &format!("{milestones}\n<p>Rollout plan: {rollout}</p>"),
            );
        }
        other => tracing::warn!(section = other, "Unknown preview section"),
    }
}

/// Render the preview page for an intent email.
pub fn render_intent_preview(data: &TemplateData) -> String {
    let feature = &data.feature;
    let name = escape_html(&feature.name);
    let prefix = escape_html(&data.page.subject_prefix);
    let contacts = if feature.owner_emails.is_empty() {
        "None".to_string()
    } else {
        escape_html(&feature.owner_emails.join(", "))
    };

    let mut body = String::new();
    section(&mut body, "contact", "Contact emails", &format!("<p>{contacts}</p>"));
    section(
        &mut body,
        "summary",
        "Summary",
        &format!("<p>{}</p>", escape_html(&feature.summary)),
    );
    for section_name in &data.page.sections_to_show {
        render_section(&mut body, section_name, data);
    }
    let url = escape_html(&data.page.default_url);
    section(
        &mut body,
        "link",
        "Link to entry on the Chrome Platform Status",
        &format!("<a href=\"{url}\">{url}</a>"),
    );

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{prefix}: {name}</title>\n</head>\n<body>\n\
         <h2 id=\"subject\">{prefix}: {name}</h2>\n{body}</body>\n</html>\n"
    )
}
