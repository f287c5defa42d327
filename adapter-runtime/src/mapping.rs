//! Fuzzy name mapping
//!
//! Settings often carry user-maintained tables such as
//! `{ "Played Song": "e1" }` or `[{ "key": "played song", "value": "e1" }]`.
//! Lookups compare names after folding case, separators and camelCase.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

lazy_static! {
    static ref HAS_SPACE: Regex = Regex::new(r"\s").unwrap();
    static ref HAS_SEPARATOR: Regex = Regex::new(r"[_\-.:]").unwrap();
    static ref HAS_CAMEL: Regex = Regex::new(r"[a-z][A-Z]|[A-Z][a-z]").unwrap();
    static ref SEPARATOR_SPLITTER: Regex = Regex::new(r"[\W_]+(.|$)").unwrap();
    static ref CAMEL_SPLITTER: Regex = Regex::new(r"(.)([A-Z]+)").unwrap();
}

/// Fold `name` into lowercase space-separated words.
///
/// `"Played Song"`, `"played_song"` and `"playedSong"` all become
/// `"played song"`.
pub fn normalize(name: &str) -> String {
    if HAS_SPACE.is_match(name) {
        return name.to_lowercase();
    }

    if HAS_SEPARATOR.is_match(name) {
        let unseparated = SEPARATOR_SPLITTER.replace_all(name, |caps: &Captures<'_>| {
            match caps.get(1).map(|m| m.as_str()) {
                Some(next) if !next.is_empty() => format!(" {}", next),
                _ => String::new(),
            }
        });
        return unseparated.trim().to_lowercase();
    }

    if HAS_CAMEL.is_match(name) {
        let uncamelized = CAMEL_SPLITTER.replace_all(name, |caps: &Captures<'_>| {
            let uppers: Vec<String> = caps[2].chars().map(|c| c.to_lowercase().to_string()).collect();
            format!("{} {}", &caps[1], uppers.join(" "))
        });
        return uncamelized.to_lowercase();
    }

    name.to_lowercase()
}

/// Every value in `table` whose key matches `name`.
///
/// `table` is either an object (`{ key: value }`) or an array of
/// `{ "key": .., "value": .. }` pairs. Anything else maps to nothing.
pub fn map(table: &Value, name: &str) -> Vec<Value> {
    let wanted = normalize(name);

    match table {
        Value::Array(pairs) => {
            let keyed = pairs
                .first()
                .and_then(|first| first.get("key"))
                .map(is_truthy)
                .unwrap_or(false);
            if !keyed {
                return Vec::new();
            }

            pairs
                .iter()
                .filter(|pair| {
                    pair.get("key")
                        .and_then(Value::as_str)
                        .map(|key| normalize(key) == wanted)
                        .unwrap_or(false)
                })
                .map(|pair| pair.get("value").cloned().unwrap_or(Value::Null))
                .collect()
        }
        Value::Object(entries) => entries
            .iter()
            .filter(|(key, _)| normalize(key) == wanted)
            .map(|(_, value)| value.clone())
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Played Song"), "played song");
        assert_eq!(normalize("played_song"), "played song");
        assert_eq!(normalize("played-song"), "played song");
        assert_eq!(normalize("playedSong"), "played song");
        assert_eq!(normalize("PlayedSong"), "played song");
        assert_eq!(normalize("played"), "played");
    }

    #[test]
    fn test_map_object() {
        let events = json!({ "Played Song": "e1", "my_event": "a4991b88" });
        assert_eq!(map(&events, "played_song"), vec![json!("e1")]);
        assert_eq!(map(&events, "My Event"), vec![json!("a4991b88")]);
        assert!(map(&events, "whatever").is_empty());
    }

    #[test]
    fn test_map_pairs() {
        let events = json!([
            { "key": "my event", "value": "9b5eb1fa" },
            { "key": "My_Event", "value": "c0ffee" },
            { "key": "other", "value": "nope" }
        ]);
        assert_eq!(map(&events, "my_event"), vec![json!("9b5eb1fa"), json!("c0ffee")]);
        assert!(map(&events, "whatever").is_empty());
    }

    #[test]
    fn test_map_degenerate_tables() {
        assert!(map(&json!([]), "x").is_empty());
        assert!(map(&json!(42), "x").is_empty());
        assert!(map(&Value::Null, "x").is_empty());
        assert!(map(&json!([{ "value": "no key" }]), "x").is_empty());
    }
}
