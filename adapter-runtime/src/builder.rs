//! Adapter definitions
//!
//! An [`AdapterType`] is assembled once with [`AdapterTypeBuilder`] and then
//! frozen; every [`Integration`](crate::Integration) created from it shares
//! the same routing tables, rules and HTTP client.

use crate::dispatch::{BatchHandler, BatchMapper, Dispatcher, Handler, Mapper, Method};
use crate::error::{Error, Result};
use crate::message::{CallType, Facade, Message};
use crate::request::{build_client, Agent};
use crate::retry::RetryClassifier;
use crate::validation::{Rule, RuleContext, RuleKind};
use crate::Settings;
use reqwest::{Certificate, Client};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Channel for server-side sources
pub const SERVER: &str = "server";
/// Channel for mobile SDKs
pub const MOBILE: &str = "mobile";
/// Channel for browser sources
pub const CLIENT: &str = "client";

/// Request timeout as given to [`AdapterTypeBuilder::timeout`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeout {
    /// Milliseconds
    Millis(u64),
    /// Human duration (`"10s"`, `"1m 30s"`) or a bare millisecond count
    Text(String),
}

impl Timeout {
    fn parse(&self) -> std::result::Result<Duration, String> {
        match self {
            Timeout::Millis(ms) => Ok(Duration::from_millis(*ms)),
            Timeout::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<u64>() {
                    return Ok(Duration::from_millis(ms));
                }
                humantime::parse_duration(text)
                    .map_err(|e| format!("invalid timeout \"{}\": {}", text, e))
            }
        }
    }
}

impl From<u64> for Timeout {
    fn from(ms: u64) -> Self {
        Timeout::Millis(ms)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Millis(duration.as_millis() as u64)
    }
}

impl From<&str> for Timeout {
    fn from(text: &str) -> Self {
        Timeout::Text(text.to_string())
    }
}

impl From<String> for Timeout {
    fn from(text: String) -> Self {
        Timeout::Text(text)
    }
}

/// Declared option
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionMeta {
    /// Missing or empty values fail validation
    pub required: bool,
}

/// Frozen adapter definition
pub struct AdapterType {
    name: Arc<str>,
    endpoint: Option<String>,
    timeout: Duration,
    channels: Vec<String>,
    rules: Vec<Rule>,
    options: Vec<(String, OptionMeta)>,
    mapping_keys: Vec<String>,
    dispatcher: Dispatcher,
    retry: RetryClassifier,
    agent: Agent,
    client: Client,
}

impl AdapterType {
    /// Start defining an adapter named `name`
    pub fn builder(name: impl Into<String>) -> Result<AdapterTypeBuilder> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Config("adapter name must not be empty".to_string()));
        }

        Ok(AdapterTypeBuilder::new(name))
    }

    /// Adapter name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Base URL for relative request paths
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Default request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Default request timeout in milliseconds
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Accepted channels, in registration order
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Validation rules, in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Declared options
    pub fn options(&self) -> &[(String, OptionMeta)] {
        &self.options
    }

    /// Settings keys usable with `Integration::mapping`
    pub fn mapping_keys(&self) -> &[String] {
        &self.mapping_keys
    }

    /// Routing tables
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Retry predicates
    pub fn retry_classifier(&self) -> &RetryClassifier {
        &self.retry
    }

    /// Connection reuse settings
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

impl fmt::Debug for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterType")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("channels", &self.channels)
            .field("rules", &self.rules)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Chainable adapter definition
pub struct AdapterTypeBuilder {
    name: String,
    endpoint: Option<String>,
    timeout: Timeout,
    channels: Vec<String>,
    rules: Vec<Rule>,
    options: Vec<(String, OptionMeta)>,
    mapping_keys: Vec<String>,
    handlers: HashMap<Method, Arc<dyn Handler>>,
    mappers: HashMap<Method, Mapper>,
    batch_handler: Option<Arc<dyn BatchHandler>>,
    batch_mapper: Option<BatchMapper>,
    map_to_track: HashSet<CallType>,
    retry: RetryClassifier,
    agent: Agent,
    ca: Vec<Vec<u8>>,
    errors: Vec<String>,
}

impl AdapterTypeBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            endpoint: None,
            timeout: Timeout::Millis(crate::DEFAULT_TIMEOUT_MS),
            channels: vec![SERVER.to_string()],
            rules: Vec::new(),
            options: Vec::new(),
            mapping_keys: Vec::new(),
            handlers: HashMap::new(),
            mappers: HashMap::new(),
            batch_handler: None,
            batch_mapper: None,
            map_to_track: HashSet::new(),
            retry: RetryClassifier::new(),
            agent: Agent::default(),
            ca: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Base URL prepended to relative request paths
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Default request timeout: milliseconds, a `Duration` or text like `"10s"`
    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Accept `channel` in addition to the current ones
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
        self
    }

    /// Replace the accepted channels
    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels.clear();
        for channel in channels {
            self = self.channel(channel);
        }
        self
    }

    /// Accept server-side sources
    pub fn server(self) -> Self {
        self.channel(SERVER)
    }

    /// Accept mobile sources
    pub fn mobile(self) -> Self {
        self.channel(MOBILE)
    }

    /// Accept browser sources
    pub fn client(self) -> Self {
        self.channel(CLIENT)
    }

    /// Connection reuse settings
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = agent;
        self
    }

    /// Trust the PEM-encoded certificate in addition to the system roots
    pub fn ca(mut self, pem: impl AsRef<[u8]>) -> Self {
        self.ca.push(pem.as_ref().to_vec());
        self
    }

    /// Require `settings.<key>` or `message.<key>` on every call
    pub fn ensure(self, path: &str) -> Self {
        self.ensure_rule(path, None)
    }

    /// Require `path` on calls of the given types only
    pub fn ensure_on(self, path: &str, methods: impl IntoIterator<Item = CallType>) -> Self {
        self.ensure_rule(path, Some(methods.into_iter().collect()))
    }

    fn ensure_rule(mut self, path: &str, methods: Option<Vec<CallType>>) -> Self {
        let kind = if let Some(key) = path.strip_prefix("settings.") {
            RuleKind::Setting(key.to_string())
        } else if let Some(key) = path.strip_prefix("message.") {
            RuleKind::Message(key.to_string())
        } else {
            self.errors.push(format!(
                "ensure path \"{}\" must start with \"settings.\" or \"message.\"",
                path
            ));
            return self;
        };

        let rule = match methods {
            Some(methods) => Rule::new(kind).on(methods),
            None => Rule::new(kind),
        };
        self.rules.push(rule);
        self
    }

    /// Custom validation rule
    pub fn ensure_fn<F>(mut self, check: F) -> Self
    where
        F: Fn(&RuleContext<'_>, &dyn Facade, &Settings) -> Option<Error> + Send + Sync + 'static,
    {
        self.rules.push(Rule::new(RuleKind::Custom {
            name: None,
            check: Arc::new(check),
        }));
        self
    }

    /// Declare a setting; required options fail validation when missing
    pub fn option(mut self, name: impl Into<String>, meta: OptionMeta) -> Self {
        let name = name.into();
        self.rules.push(Rule::new(RuleKind::Option {
            name: name.clone(),
            required: meta.required,
        }));
        self.options.push((name, meta));
        self
    }

    /// Declare a setting validated by `check`
    pub fn option_fn<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&RuleContext<'_>, &dyn Facade, &Settings) -> Option<Error> + Send + Sync + 'static,
    {
        let name = name.into();
        self.rules.push(Rule::new(RuleKind::Custom {
            name: Some(name.clone()),
            check: Arc::new(check),
        }));
        self.options.push((name, OptionMeta::default()));
        self
    }

    /// Declare a settings key holding a name table
    pub fn mapping(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.mapping_keys.contains(&key) {
            self.mapping_keys.push(key);
        }
        self
    }

    /// Transform messages for `method` before they reach its handler
    pub fn mapper<F>(mut self, method: Method, mapper: F) -> Self
    where
        F: Fn(&Message, &Settings) -> Result<Value> + Send + Sync + 'static,
    {
        self.mappers.insert(method, Arc::new(mapper));
        self
    }

    /// Partition batches into buckets
    pub fn batch_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(Vec<Message>, &Settings) -> Vec<Vec<Message>> + Send + Sync + 'static,
    {
        self.batch_mapper = Some(Arc::new(mapper));
        self
    }

    /// Register the handler for `method`
    pub fn handler(mut self, method: Method, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    /// Register the batch handler
    pub fn batch_handler(mut self, handler: Arc<dyn BatchHandler>) -> Self {
        self.batch_handler = Some(handler);
        self
    }

    /// Turn page and/or screen calls into track calls
    pub fn map_to_track(mut self, methods: impl IntoIterator<Item = CallType>) -> Self {
        for method in methods {
            match method {
                CallType::Page | CallType::Screen => {
                    self.map_to_track.insert(method);
                }
                other => self
                    .errors
                    .push(format!("{} calls cannot be mapped to track", other)),
            }
        }
        self
    }

    /// Additional retry predicate, evaluated after the defaults
    pub fn retry<F>(mut self, check: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry.push(Arc::new(check));
        self
    }

    /// Deprecated; retry decisions belong to [`AdapterType::retry_classifier`]
    #[deprecated(note = "retry counts have no effect; use retry() predicates instead")]
    pub fn retries(self, count: u32) -> Self {
        warn!(adapter = %self.name, count, "retries() is deprecated and has no effect");
        self
    }

    /// Freeze the definition
    pub fn build(self) -> Result<AdapterType> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(Error::Config(format!("{}: {}", self.name, first)));
        }

        let timeout = self
            .timeout
            .parse()
            .map_err(|e| Error::Config(format!("{}: {}", self.name, e)))?;

        if self.ca.iter().any(|pem| !contains(pem, PEM_CERTIFICATE)) {
            return Err(Error::Config(format!(
                "{}: CA certificate is not PEM encoded",
                self.name
            )));
        }
        let roots = self
            .ca
            .iter()
            .map(|pem| Certificate::from_pem(pem))
            .collect::<reqwest::Result<Vec<_>>>()
            .map_err(|e| Error::Config(format!("{}: invalid CA certificate: {}", self.name, e)))?;

        let client = build_client(&self.agent, &roots)
            .map_err(|e| Error::Config(format!("{}: failed to build HTTP client: {}", self.name, e)))?;

        let dispatcher = Dispatcher::new(
            self.handlers,
            self.mappers,
            self.batch_handler,
            self.batch_mapper,
            self.map_to_track,
        );

        debug!(
            adapter = %self.name,
            timeout_ms = timeout.as_millis() as u64,
            channels = ?self.channels,
            rules = self.rules.len(),
            "Adapter type built"
        );

        Ok(AdapterType {
            name: Arc::from(self.name),
            endpoint: self.endpoint,
            timeout,
            channels: self.channels,
            rules: self.rules,
            options: self.options,
            mapping_keys: self.mapping_keys,
            dispatcher,
            retry: self.retry,
            agent: self.agent,
            client,
        })
    }
}

const PEM_CERTIFICATE: &[u8] = b"-----BEGIN CERTIFICATE-----";

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_rejected() {
        assert!(matches!(AdapterType::builder("  "), Err(Error::Config(_))));
        assert!(AdapterType::builder("Test").is_ok());
    }

    #[test]
    fn test_timeout_forms() {
        let cases: Vec<(Timeout, u64)> = vec![
            ("10s".into(), 10_000),
            ("2500".into(), 2_500),
            ("1m 30s".into(), 90_000),
            (500u64.into(), 500),
            (Duration::from_secs(3).into(), 3_000),
        ];

        for (timeout, ms) in cases {
            assert_eq!(timeout.parse().unwrap(), Duration::from_millis(ms), "{:?}", timeout);
        }
        assert!(Timeout::from("soon").parse().is_err());
    }

    #[test]
    fn test_channels() {
        let builder = AdapterType::builder("Test").unwrap();
        assert_eq!(builder.channels, vec!["server"]);

        let builder = builder.channel("server").channel("mobile").channel("mobile");
        assert_eq!(builder.channels, vec!["server", "mobile"]);

        let builder = builder.channels(["client"]);
        assert_eq!(builder.channels, vec!["client"]);

        let builder = builder.server().mobile().client();
        assert_eq!(builder.channels, vec!["client", "server", "mobile"]);
    }

    #[test]
    fn test_bad_ensure_path_fails_build() {
        let err = AdapterType::builder("Test")
            .unwrap()
            .ensure("context.ip")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("context.ip"));
    }

    #[test]
    fn test_bad_timeout_fails_build() {
        let err = AdapterType::builder("Test")
            .unwrap()
            .timeout("whenever")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_map_to_track_only_page_and_screen() {
        let err = AdapterType::builder("Test")
            .unwrap()
            .map_to_track([CallType::Identify])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("identify"));
    }
}
