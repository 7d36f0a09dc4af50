//! Rendering lookup results as Telegram HTML.

use crate::record::{FailureKind, ParsedRecord, ResolveError};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn field(out: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(v) = value {
        out.push(format!("<b>{label}:</b> <code>{}</code>", escape_html(v)));
    }
}

pub fn format_record_html(handle: &str, rec: &ParsedRecord) -> String {
    let mut lines = vec![format!("🔎 <b>@{}</b>", escape_html(handle))];

    field(&mut lines, "Username", rec.username.as_deref());
    field(&mut lines, "ID", rec.id.as_deref());
    field(&mut lines, "Phone", rec.phone.as_deref());
    if let Some(n) = rec.viewed_by {
        lines.push(format!("<b>Viewed by:</b> {n}"));
    }

    if !rec.name_history.is_empty() {
        lines.push(String::new());
        lines.push("<b>Name history</b>".to_string());
        for e in &rec.name_history {
            let id = e
                .id
                .as_deref()
                .map(|id| format!(" (<code>{}</code>)", escape_html(id)))
                .unwrap_or_default();
            lines.push(format!(
                "• {} → @{}{id}",
                escape_html(&e.date),
                escape_html(&e.username)
            ));
        }
    }

    if lines.len() == 1 {
        lines.push("<i>The reply contained no recognizable fields.</i>".to_string());
    }
    lines.join("\n")
}

pub fn format_failure_html(handle: &str, err: &ResolveError) -> String {
    let headline = match err.kind {
        FailureKind::InvalidHandle => "❌ Invalid handle",
        FailureKind::NoIdentities => "🚫 Lookup service is not configured",
        FailureKind::NoReply => "⌛ No reply from the lookup bot",
        FailureKind::RelayFailure => "⚠️ Lookup failed",
        FailureKind::Cancelled => "⌛ Lookup took too long",
    };
    format!(
        "{headline} for <b>{}</b>\n<code>{}</code>",
        escape_html(handle),
        escape_html(&err.reason)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HistoryEntry;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn renders_present_fields_only() {
        let rec = ParsedRecord {
            success: true,
            id: Some("42".to_string()),
            viewed_by: Some(3),
            name_history: vec![HistoryEntry {
                date: "01.01.2023".to_string(),
                username: "old".to_string(),
                id: Some("1".to_string()),
            }],
            ..ParsedRecord::default()
        };
        let html = format_record_html("alice", &rec);
        assert!(html.starts_with("🔎 <b>@alice</b>"));
        assert!(html.contains("<b>ID:</b> <code>42</code>"));
        assert!(html.contains("<b>Viewed by:</b> 3"));
        assert!(html.contains("• 01.01.2023 → @old (<code>1</code>)"));
        assert!(!html.contains("Phone"));
    }

    #[test]
    fn empty_record_says_so() {
        let html = format_record_html("x", &ParsedRecord::default());
        assert!(html.contains("no recognizable fields"));
    }

    #[test]
    fn failure_escapes_reason() {
        let err = ResolveError::new(FailureKind::RelayFailure, "<boom>");
        let html = format_failure_html("a<b", &err);
        assert!(html.contains("a&lt;b"));
        assert!(html.contains("&lt;boom&gt;"));
    }
}
