use crate::config::{Field, FieldValue};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Escape special characters for safe embedding in markup.
pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#039;")
}

/// Sanitize a submitted value for message bodies and logs: strip markup tags,
/// then escape the residual special characters. Deliberately lossy and
/// one-way.
pub fn sanitize(value: &str) -> String {
    escape(&TAG_PATTERN.replace_all(value, ""))
}

/// Reverse the entity escaping for outbound plain-text mail bodies. The
/// ampersand must be decoded last so `&amp;lt;` does not collapse twice.
pub fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

/// Assemble the human-readable message body from the submitted data.
///
/// Fields appear in registration order, one `label: value` section per field,
/// with a blank line between sections. Fields marked `exclude` are omitted;
/// list values are joined with a comma and a space.
pub fn build_message(fields: &[Field], data: &HashMap<String, FieldValue>) -> String {
    let mut sections = Vec::new();

    for field in fields {
        if field.exclude {
            continue;
        }

        let value = data.get(&field.name).cloned().unwrap_or_default();
        sections.push(format!(
            "{}: {}",
            field.display_label(),
            sanitize(&value.to_text())
        ));
    }

    sections.join("\n\n")
}

/// Flatten a header list into `Key: Value` lines joined by line breaks.
pub fn flatten_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, FieldValue)]) -> HashMap<String, FieldValue> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_sanitize_strips_tags_and_escapes() {
        assert_eq!(sanitize("<b>bold</b> & \"q\""), "bold &amp; &quot;q&quot;");
        assert_eq!(sanitize("<script>x()</script>"), "x()");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        let original = "a < b & c > d \"quoted\" 'single'";
        assert_eq!(unescape(&escape(original)), original);
    }

    #[test]
    fn test_build_message_order_and_exclusion() {
        let fields = vec![
            Field::new("name").label("Name"),
            Field::new("token").exclude(),
            Field::new("colours"),
        ];
        let data = data(&[
            ("name", FieldValue::Text("Ada".to_string())),
            ("token", FieldValue::Text("secret".to_string())),
            (
                "colours",
                FieldValue::Items(vec!["red".to_string(), "blue".to_string()]),
            ),
        ]);

        let message = build_message(&fields, &data);

        assert_eq!(message, "Name: Ada\n\ncolours: red, blue");
        assert!(!message.contains("secret"));
    }

    #[test]
    fn test_flatten_headers() {
        let headers = vec![
            ("From".to_string(), "no-reply@example.com".to_string()),
            ("Reply-To".to_string(), "user@example.com".to_string()),
        ];
        assert_eq!(
            flatten_headers(&headers),
            "From: no-reply@example.com\nReply-To: user@example.com"
        );
    }
}
