use std::collections::BTreeSet;

/// Replace every sensitive value in `text` with `[REDACTED]`, including the
/// escaped form a value takes inside a JSON string.
pub fn redact_sensitive(text: &str, sensitive_values: &BTreeSet<String>) -> String {
    let mut sorted: Vec<String> = sensitive_values
        .iter()
        .filter(|v| v.len() >= 3)
        .flat_map(|value| {
            let escaped = json_escaped(value).filter(|escaped| escaped != value);
            std::iter::once(value.clone()).chain(escaped)
        })
        .collect();
    sorted.sort_by_key(|value| std::cmp::Reverse(value.len()));

    let mut result = text.to_string();
    for value in sorted {
        result = result.replace(&value, "[REDACTED]");
    }
    result
}

fn json_escaped(value: &str) -> Option<String> {
    let quoted = serde_json::to_string(value).ok()?;
    quoted
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map(str::to_string)
}
