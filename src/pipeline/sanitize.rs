//! Best-effort cleanup of reasoning-service text into parseable JSON.
//!
//! Kept narrowly scoped: these functions transform strings only. The parsing
//! contract of every other component is plain `serde_json`.

/// Strip code-fence markers and cut the outermost `{...}` span.
pub fn sanitize_json_output(content: &str) -> String {
    let content = content.replace("```json", "").replace("```", "");
    let content = content.trim();

    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => content[start..=end].to_string(),
        _ => content.to_string(),
    }
}

/// Escape raw control characters inside JSON string literals.
///
/// Small models routinely emit real newlines inside string values; this walks
/// the text tracking string/escape state and re-escapes them, touching
/// nothing outside string literals.
pub fn repair_json_string(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in content.chars() {
        if escape_next {
            result.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' => {
                result.push(ch);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                result.push(ch);
            }
            '\n' if in_string => result.push_str("\\n"),
            '\r' if in_string => result.push_str("\\r"),
            '\t' if in_string => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }

    result
}
