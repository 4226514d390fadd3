//! Plain-text rendering of a template name and its parameters.
//!
//! Real copy lives with the mail provider; this gives the SMTP and log
//! senders something readable.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

fn subject_for(template: &str, params: &Value) -> String {
    let title = params
        .get("listing_title")
        .and_then(Value::as_str)
        .unwrap_or("your listing");
    match template {
        "buyer-profile-reminder" => "Complete your buyer profile".into(),
        "seller-listing-draft-reminder" => format!("Finish publishing {title}"),
        "dealroom-inactivity-nudge" => format!("Your deal for {title} has gone quiet"),
        "buyer-weekly-digest" | "seller-weekly-digest" => "Your week on the marketplace".into(),
        "metric-expiration-warning" => "Verified metrics expiring soon".into(),
        other => title_case(other),
    }
}

fn title_case(template: &str) -> String {
    template
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn render(template: &str, params: &Value) -> RenderedMessage {
    let name = params
        .get("first_name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("there");

    let mut body = format!("Hi {name},\n\n");
    if let Some(map) = params.as_object() {
        for (key, value) in map {
            if key == "first_name" {
                continue;
            }
            if let Some(text) = scalar(value) {
                body.push_str(&format!("{}: {text}\n", key.replace('_', " ")));
            }
        }
        if let Some(metrics) = map.get("metrics").and_then(Value::as_array) {
            body.push('\n');
            for metric in metrics {
                let kind = metric.get("metric_type").and_then(Value::as_str).unwrap_or("metric");
                let listing = metric.get("listing_title").and_then(Value::as_str).unwrap_or("listing");
                let expires = metric.get("expires_at").and_then(Value::as_str).unwrap_or("soon");
                body.push_str(&format!("- {kind} on {listing}, expires {expires}\n"));
            }
        }
    }

    RenderedMessage {
        subject: subject_for(template, params),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_template() {
        let msg = render(
            "dealroom-inactivity-nudge",
            &json!({ "first_name": "Bea", "listing_title": "Laundromat", "days_inactive": 9 }),
        );
        assert_eq!(msg.subject, "Your deal for Laundromat has gone quiet");
        assert!(msg.body.starts_with("Hi Bea,"));
        assert!(msg.body.contains("days inactive: 9"));
    }

    #[test]
    fn test_unknown_template_and_missing_name() {
        let msg = render("seller-something-new", &json!({ "first_name": null }));
        assert_eq!(msg.subject, "Seller Something New");
        assert!(msg.body.starts_with("Hi there,"));
    }

    #[test]
    fn test_metric_list() {
        let msg = render(
            "metric-expiration-warning",
            &json!({ "metrics": [
                { "metric_type": "REVENUE", "listing_title": "Bakery", "expires_at": "2026-10-20" },
                { "metric_type": "EBITDA", "listing_title": "Bakery", "expires_at": "2026-10-21" },
            ]}),
        );
        assert!(msg.body.contains("- REVENUE on Bakery, expires 2026-10-20"));
        assert!(msg.body.contains("- EBITDA on Bakery"));
    }
}
