//! JSON helpers shared by the persistence layers and the query parser.

use serde_json::Value;

/// Types that serialize to and from JSON strings with a module-specific error.
pub trait JsonSerializable<E>: serde::Serialize + for<'de> serde::de::DeserializeOwned {
    fn to_json_string(&self) -> Result<String, E>;

    fn from_json_str(s: &str) -> Result<Self, E>;
}

/// Serializes `value`, mapping failures through `error_mapper` with `context`.
pub fn serialize_with_context<T, E>(
    value: &T,
    context: &str,
    error_mapper: impl FnOnce(serde_json::Error, &str) -> E,
) -> Result<String, E>
where
    T: serde::Serialize,
{
    serde_json::to_string(value).map_err(|e| error_mapper(e, context))
}

/// Deserializes `json`, mapping failures through `error_mapper` with `context`.
pub fn deserialize_with_context<T, E>(
    json: &str,
    context: &str,
    error_mapper: impl FnOnce(serde_json::Error, &str) -> E,
) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(json).map_err(|e| error_mapper(e, context))
}

/// Returns the body of the first fenced code block in `text`, if any.
///
/// The info string after the opening fence (e.g. `json`) is dropped.
pub fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Extracts the first JSON object or array embedded in free text.
///
/// Tries the whole string, then a fenced block, then the widest
/// `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed)
        && (v.is_object() || v.is_array())
    {
        return Some(v);
    }
    if let Some(body) = strip_code_fence(trimmed)
        && let Ok(v) = serde_json::from_str::<Value>(body)
    {
        return Some(v);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(s), Some(e)) = (trimmed.find(open), trimmed.rfind(close))
            && s < e
            && let Ok(v) = serde_json::from_str::<Value>(&trimmed[s..=e])
        {
            return Some(v);
        }
    }
    None
}

/// Pulls the string elements out of a JSON array, skipping blanks and
/// non-strings.
pub fn string_items(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
