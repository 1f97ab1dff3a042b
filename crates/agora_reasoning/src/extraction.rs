//! Lenient JSON recovery from generated text.
//!
//! Generators are asked for a single JSON object but often wrap it in prose
//! or code fences. Parse directly first, then fall back to the span between
//! the first `{` and the last `}`.

use agora_core::is_meta_content;
use serde_json::{Map, Value};

/// The JSON object contained in `text`, if any.
pub fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The `message` field of a `{message}` reply, trimmed and in-world.
pub fn extract_message(text: &str) -> Option<String> {
    let map = extract_object(text)?;
    let message = map.get("message")?.as_str()?.trim();
    if message.is_empty() || is_meta_content(message) {
        return None;
    }
    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let map = extract_object(r#"{"type": "wait", "params": {}}"#).unwrap();
        assert_eq!(map["type"], "wait");
    }

    #[test]
    fn test_parse_code_block_wrapped() {
        let text = "Aquí va:\n```json\n{\"message\": \"¡Buenos días!\"}\n```";
        assert_eq!(extract_message(text).as_deref(), Some("¡Buenos días!"));
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        assert!(extract_object("no hay nada aquí").is_none());
        assert!(extract_object("} al revés {").is_none());
        assert!(extract_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_message_rejects_empty_and_meta() {
        assert!(extract_message(r#"{"message": "   "}"#).is_none());
        assert!(extract_message(r#"{"message": "Como modelo de lenguaje..."}"#).is_none());
        assert!(extract_message(r#"{"text": "hola"}"#).is_none());
    }
}
