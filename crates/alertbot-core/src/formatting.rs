//! Telegram HTML rendering for alert messages.

use std::collections::BTreeSet;

use crate::alerts::types::{AlertType, Snapshot, TransitionEvent, TransitionKind};

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Comma-separated labels, in the set's order.
pub fn alert_types_label(types: &BTreeSet<AlertType>) -> String {
    types
        .iter()
        .map(|t| escape_html(t.label()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Notification text for one transition.
pub fn render_transition(event: &TransitionEvent) -> String {
    let name = escape_html(&event.region_name);
    match event.kind {
        TransitionKind::Started => {
            let types = alert_types_label(&event.alert_types);
            if types.is_empty() {
                format!("🚨 УВАГА! Повітряна тривога в <b>{name}</b>!\nПрямуйте до укриття!")
            } else {
                format!(
                    "🚨 УВАГА! Повітряна тривога в <b>{name}</b>! ({types})\nПрямуйте до укриття!"
                )
            }
        }
        TransitionKind::Ended => format!("✅ Відбій повітряної тривоги в <b>{name}</b>."),
        TransitionKind::Changed => format!(
            "⚠️ Зміна тривоги в <b>{name}</b>: {}",
            alert_types_label(&event.alert_types)
        ),
    }
}

/// Overview of all currently active regions (for the "current alerts" command).
pub fn render_alert_overview(snapshot: &Snapshot) -> String {
    let mut lines = Vec::new();
    for region in snapshot.active_regions() {
        lines.push(format!(
            "• <b>{}</b>: {}",
            escape_html(&region.region_name),
            alert_types_label(&region.active_alerts)
        ));
    }

    let mut out = if lines.is_empty() {
        "✅ На даний момент повітряних тривог немає.".to_string()
    } else {
        format!(
            "🚨 Увага! Тривога оголошена в таких регіонах ({}):\n{}",
            lines.len(),
            lines.join("\n")
        )
    };

    if let Some(at) = snapshot.fetched_at {
        out.push_str(&format!("\n\n<i>Оновлено о {}</i>", at.format("%H:%M")));
    }
    out
}
