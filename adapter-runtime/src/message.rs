//! Message facade
//!
//! The runtime only needs a handful of capabilities from an inbound event,
//! captured by [`Facade`]. [`Message`] is a JSON-backed implementation with the
//! typed accessors destination handlers usually reach for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Analytics call type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// identify
    Identify,
    /// track
    Track,
    /// page
    Page,
    /// screen
    Screen,
    /// group
    Group,
    /// alias
    Alias,
    /// delete (user deletion)
    Delete,
}

impl CallType {
    /// Every call type, in canonical order
    pub const ALL: [CallType; 7] = [
        CallType::Identify,
        CallType::Track,
        CallType::Page,
        CallType::Screen,
        CallType::Group,
        CallType::Alias,
        CallType::Delete,
    ];

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Identify => "identify",
            CallType::Track => "track",
            CallType::Page => "page",
            CallType::Screen => "screen",
            CallType::Group => "group",
            CallType::Alias => "alias",
            CallType::Delete => "delete",
        }
    }

    /// Parse a wire name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|call| call.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities the runtime requires from an inbound message
pub trait Facade: Send + Sync {
    /// Call type of the message
    fn call_type(&self) -> Option<CallType>;

    /// Channel the message was received on (`server`, `client`, `mobile`)
    fn channel(&self) -> Option<&str>;

    /// Whether the message allows delivery to `integration`
    fn enabled(&self, integration: &str) -> bool;

    /// Attribute lookup: direct accessor first, then nested-path lookup.
    /// Null values count as absent.
    fn attribute(&self, path: &str) -> Option<&Value>;
}

/// JSON-backed analytics message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    raw: Value,
}

impl Message {
    /// Wrap a raw event. Non-object values produce an empty message.
    pub fn new(raw: Value) -> Self {
        let raw = match raw {
            Value::Object(_) => raw,
            _ => Value::Object(Map::new()),
        };
        Self { raw }
    }

    /// Underlying JSON
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Consume into the underlying JSON
    pub fn into_raw(self) -> Value {
        self.raw
    }

    /// Top-level field, tolerant of key casing and separators
    pub fn field(&self, key: &str) -> Option<&Value> {
        lookup(&self.raw, key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Track event name
    pub fn event(&self) -> Option<&str> {
        self.str_field("event")
    }

    /// `properties` object (empty when absent)
    pub fn properties(&self) -> Map<String, Value> {
        self.field("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// `traits` object (empty when absent)
    pub fn traits(&self) -> Map<String, Value> {
        self.field("traits")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Page/screen name
    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
            .or_else(|| self.path_value("properties.name").and_then(Value::as_str))
    }

    /// Page/screen category
    pub fn category(&self) -> Option<&str> {
        self.str_field("category")
            .or_else(|| self.path_value("properties.category").and_then(Value::as_str))
    }

    /// Category and name joined by a space
    pub fn full_name(&self) -> Option<String> {
        match (self.category(), self.name()) {
            (Some(category), Some(name)) => Some(format!("{} {}", category, name)),
            (None, Some(name)) => Some(name.to_string()),
            _ => None,
        }
    }

    /// `userId`, stringified when numeric
    pub fn user_id(&self) -> Option<String> {
        self.field("userId").and_then(stringify)
    }

    /// `anonymousId`, stringified when numeric
    pub fn anonymous_id(&self) -> Option<String> {
        self.field("anonymousId").and_then(stringify)
    }

    /// `context` object
    pub fn context(&self) -> Option<&Value> {
        self.field("context")
    }

    /// `timestamp` parsed as RFC 3339
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.str_field("timestamp")
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Derive a track message from a page or screen call.
    ///
    /// `name` selects the event: `Loaded a Page` without a name,
    /// `Viewed <name> Page` with one (`Screen` for screen calls). The track's
    /// properties are the original properties plus `category` and `name`.
    pub fn to_track(&self, name: Option<&str>) -> Message {
        let noun = match self.call_type() {
            Some(CallType::Screen) => "Screen",
            _ => "Page",
        };
        let event = match name {
            Some(name) => format!("Viewed {} {}", name, noun),
            None => format!("Loaded a {}", noun),
        };

        let mut properties = self.properties();
        if let Some(category) = self.category() {
            properties.insert("category".to_string(), Value::String(category.to_string()));
        }
        if let Some(name) = self.name() {
            properties.insert("name".to_string(), Value::String(name.to_string()));
        }

        let mut raw = self.raw.as_object().cloned().unwrap_or_default();
        raw.insert("type".to_string(), Value::String(CallType::Track.to_string()));
        raw.insert("event".to_string(), Value::String(event));
        raw.insert("properties".to_string(), Value::Object(properties));

        Message::new(Value::Object(raw))
    }

    fn path_value(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.raw, |node, key| lookup(node, key))
            .filter(|value| !value.is_null())
    }
}

impl Facade for Message {
    fn call_type(&self) -> Option<CallType> {
        self.str_field("type").and_then(CallType::parse)
    }

    fn channel(&self) -> Option<&str> {
        self.str_field("channel")
    }

    fn enabled(&self, integration: &str) -> bool {
        let options = self
            .field("integrations")
            .or_else(|| self.field("options"))
            .and_then(Value::as_object);

        let Some(options) = options else {
            return true;
        };

        let all = options
            .get("All")
            .or_else(|| options.get("all"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        match options.get(integration) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::Null) | None => all,
            Some(_) => true,
        }
    }

    fn attribute(&self, path: &str) -> Option<&Value> {
        self.field(path)
            .filter(|value| !value.is_null())
            .or_else(|| self.path_value(path))
    }
}

impl From<Value> for Message {
    fn from(raw: Value) -> Self {
        Message::new(raw)
    }
}

/// Key lookup on an object: exact match first, then ignoring case and
/// non-alphanumeric characters.
fn lookup<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    let object = node.as_object()?;
    if let Some(value) = object.get(key) {
        return Some(value);
    }

    let wanted = normalize_key(key);
    object
        .iter()
        .find(|(candidate, _)| normalize_key(candidate) == wanted)
        .map(|(_, value)| value)
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
