//! Validation chain
//!
//! Rules are registered on the builder and evaluated in insertion order before
//! any network I/O. The first failing rule wins.

use crate::error::Error;
use crate::message::{CallType, Facade};
use crate::Settings;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Custom rule: returns the error to raise, if any
pub type CustomRule =
    Arc<dyn Fn(&RuleContext<'_>, &dyn Facade, &Settings) -> Option<Error> + Send + Sync>;

/// Error factory handed to custom rules
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    integration: &'a str,
}

impl<'a> RuleContext<'a> {
    /// Context for the adapter named `integration`
    pub fn new(integration: &'a str) -> Self {
        Self { integration }
    }

    /// Adapter name
    pub fn integration(&self) -> &str {
        self.integration
    }

    /// Validation error for this adapter
    pub fn invalid(&self, message: impl Into<String>) -> Error {
        Error::validation(self.integration, message)
    }

    /// Rejection for this adapter
    pub fn reject(&self, message: impl Into<String>) -> Error {
        Error::rejected(self.integration, message)
    }
}

/// What a rule checks
#[derive(Clone)]
pub enum RuleKind {
    /// Settings key must be present and non-empty
    Setting(String),
    /// Message attribute must be present and non-null
    Message(String),
    /// Declared option; checked only when required
    Option {
        /// Settings key
        name: String,
        /// Whether absence is an error
        required: bool,
    },
    /// Arbitrary predicate, optionally registered under an option name
    Custom {
        /// Option name the rule was registered under
        name: Option<String>,
        /// The predicate
        check: CustomRule,
    },
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Setting(key) => f.debug_tuple("Setting").field(key).finish(),
            RuleKind::Message(key) => f.debug_tuple("Message").field(key).finish(),
            RuleKind::Option { name, required } => f
                .debug_struct("Option")
                .field("name", name)
                .field("required", required)
                .finish(),
            RuleKind::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

/// A validation rule with an optional call-type filter
#[derive(Debug, Clone)]
pub struct Rule {
    kind: RuleKind,
    methods: Option<Vec<CallType>>,
}

impl Rule {
    /// Rule applied to every call type
    pub fn new(kind: RuleKind) -> Self {
        Self { kind, methods: None }
    }

    /// Restrict the rule to `methods`
    pub fn on(mut self, methods: impl IntoIterator<Item = CallType>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// What the rule checks
    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    fn applies_to(&self, call: Option<CallType>) -> bool {
        match (&self.methods, call) {
            (None, _) => true,
            (Some(methods), Some(call)) => methods.contains(&call),
            (Some(_), None) => false,
        }
    }

    fn check(&self, ctx: &RuleContext<'_>, message: &dyn Facade, settings: &Settings) -> Option<Error> {
        match &self.kind {
            RuleKind::Setting(key) => {
                if is_blank(setting(settings, key)) {
                    return Some(ctx.invalid(format!("setting \"{}\" is required", key)));
                }
                None
            }
            RuleKind::Message(key) => {
                if message.attribute(key).is_none() {
                    return Some(ctx.reject(format!("message attribute \"{}\" is required", key)));
                }
                None
            }
            RuleKind::Option { name, required } => {
                if *required && is_blank(setting(settings, name)) {
                    let snapshot = Value::Object(settings.clone()).to_string();
                    return Some(ctx.invalid(format!(
                        "missing required setting \"{}\" got settings \"{}\"",
                        name, snapshot
                    )));
                }
                None
            }
            RuleKind::Custom { check, .. } => check(ctx, message, settings),
        }
    }
}

/// Run `rules` in order and return the first failure
pub fn validate(
    integration: &str,
    rules: &[Rule],
    message: &dyn Facade,
    settings: &Settings,
) -> Option<Error> {
    let ctx = RuleContext::new(integration);
    let call = message.call_type();

    rules
        .iter()
        .filter(|rule| rule.applies_to(call))
        .find_map(|rule| rule.check(&ctx, message, settings))
}

fn setting<'a>(settings: &'a Settings, key: &str) -> Option<&'a Value> {
    if let Some(value) = settings.get(key) {
        return Some(value);
    }

    let mut parts = key.split('.');
    let first = settings.get(parts.next()?)?;
    parts.try_fold(first, |node, part| node.get(part))
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::Message;
    use serde_json::json;

    fn settings(value: Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_failure_wins() {
        let rules = vec![
            Rule::new(RuleKind::Setting("apiKey".to_string())),
            Rule::new(RuleKind::Message("userId".to_string())),
        ];
        let msg = Message::new(json!({ "type": "track" }));

        let err = validate("Test", &rules, &msg, &settings(json!({}))).unwrap();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidSettings));
        assert_eq!(err.to_string(), "Test: setting \"apiKey\" is required");

        let err = validate("Test", &rules, &msg, &settings(json!({ "apiKey": "k" }))).unwrap();
        assert_eq!(err.kind(), Some(ErrorKind::MessageRejected));
        assert_eq!(err.to_string(), "Test: message attribute \"userId\" is required");
    }

    #[test]
    fn test_empty_string_setting_is_missing() {
        let rules = vec![Rule::new(RuleKind::Setting("apiKey".to_string()))];
        let msg = Message::new(json!({ "type": "identify" }));

        assert!(validate("Test", &rules, &msg, &settings(json!({ "apiKey": "" }))).is_some());
        assert!(validate("Test", &rules, &msg, &settings(json!({ "apiKey": null }))).is_some());
        assert!(validate("Test", &rules, &msg, &settings(json!({ "apiKey": 0 }))).is_none());
    }

    #[test]
    fn test_call_type_filter() {
        let rules = vec![Rule::new(RuleKind::Message("event".to_string())).on([CallType::Track])];

        let identify = Message::new(json!({ "type": "identify" }));
        assert!(validate("Test", &rules, &identify, &Settings::new()).is_none());

        let track = Message::new(json!({ "type": "track" }));
        assert!(validate("Test", &rules, &track, &Settings::new()).is_some());
    }

    #[test]
    fn test_option_message_embeds_settings() {
        let rules = vec![
            Rule::new(RuleKind::Option { name: "region".to_string(), required: false }),
            Rule::new(RuleKind::Option { name: "token".to_string(), required: true }),
        ];
        let msg = Message::new(json!({ "type": "track" }));

        let err = validate("Test", &rules, &msg, &settings(json!({ "a": 1 }))).unwrap();
        assert_eq!(
            err.to_string(),
            "Test: missing required setting \"token\" got settings \"{\"a\":1}\""
        );
    }

    #[test]
    fn test_custom_rule() {
        let check: CustomRule = Arc::new(|ctx: &RuleContext<'_>, msg: &dyn Facade, _: &Settings| {
            msg.attribute("properties.revenue")
                .filter(|revenue| !revenue.is_number())
                .map(|_| ctx.reject("revenue must be numeric"))
        });
        let rules = vec![Rule::new(RuleKind::Custom { name: None, check })];

        let bad = Message::new(json!({ "type": "track", "properties": { "revenue": "ten" } }));
        let err = validate("Test", &rules, &bad, &Settings::new()).unwrap();
        assert_eq!(err.to_string(), "Test: revenue must be numeric");

        let good = Message::new(json!({ "type": "track", "properties": { "revenue": 10 } }));
        assert!(validate("Test", &rules, &good, &Settings::new()).is_none());
    }
}
