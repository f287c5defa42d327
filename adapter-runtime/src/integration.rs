//! Adapter instances
//!
//! An [`Integration`] binds an [`AdapterType`] to one set of settings. It is
//! cheap to clone and safe to share across concurrent calls; nothing about a
//! call is stored on it.

use crate::builder::AdapterType;
use crate::config::RuntimeConfig;
use crate::enablement::Enablement;
use crate::error::{Error, Result};
use crate::event::AdapterEvent;
use crate::lock::{self, LockStore};
use crate::mapping;
use crate::message::{CallType, Facade, Message};
use crate::metrics::ADAPTER_LOCK_ATTEMPTS_TOTAL;
use crate::request::{resolve_url, Request};
use crate::validation;
use crate::Settings;
use futures::FutureExt;
use reqwest::Method as HttpMethod;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the per-instance event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// An adapter bound to its settings
#[derive(Clone)]
pub struct Integration {
    adapter: Arc<AdapterType>,
    settings: Arc<Settings>,
    events: broadcast::Sender<AdapterEvent>,
    lock_store: Option<Arc<dyn LockStore>>,
    override_enabled: Option<bool>,
    flags: Arc<HashSet<String>>,
    lock_ttl: Duration,
}

impl Integration {
    /// Instance of `adapter` configured with `settings`
    pub fn new(adapter: Arc<AdapterType>, settings: Settings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            adapter,
            settings: Arc::new(settings),
            events,
            lock_store: None,
            override_enabled: None,
            flags: Arc::new(HashSet::new()),
            lock_ttl: Duration::from_millis(crate::DEFAULT_LOCK_TTL_MS),
        }
    }

    /// Store used by `lock`/`unlock`
    pub fn with_lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    /// Force the instance on or off regardless of message options
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.override_enabled = Some(enabled);
        self
    }

    /// Feature flags visible to handlers through [`Integration::flag`]
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = Arc::new(flags.into_iter().map(Into::into).collect());
        self
    }

    /// Apply process-wide runtime settings
    pub fn configure(mut self, config: &RuntimeConfig) -> Self {
        self.lock_ttl = Duration::from_millis(config.lock.default_ttl_ms);
        self
    }

    /// Adapter name
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Adapter definition
    pub fn adapter(&self) -> &AdapterType {
        &self.adapter
    }

    /// Settings the instance was created with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether feature `flag` is on
    pub fn flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Subscribe to request, response and unlock events
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    /// Enablement check: `None` when the message may be delivered
    pub fn enabled(&self, message: &dyn Facade) -> Option<Error> {
        Enablement {
            name: self.name(),
            channels: self.adapter.channels(),
            override_enabled: self.override_enabled,
        }
        .check(message)
    }

    /// First failing validation rule, if any
    pub fn validate(&self, message: &dyn Facade) -> Option<Error> {
        validation::validate(self.name(), self.adapter.rules(), message, &self.settings)
    }

    /// Validation error unless `present`
    pub fn ensure(&self, present: bool, field: &str) -> Result<()> {
        if present {
            return Ok(());
        }
        Err(Error::validation(
            self.name(),
            format!("\"{}\" integration requires \"{}\"", self.name(), field),
        ))
    }

    /// Whether the error is worth resubmitting
    pub fn retry(&self, err: &Error) -> bool {
        self.adapter.retry_classifier().retry(err)
    }

    /// Every value of the name table under `settings[key]` matching `name`
    pub fn mapping(&self, key: &str, name: &str) -> Vec<Value> {
        if !self.adapter.mapping_keys().iter().any(|k| k == key) {
            debug!(adapter = self.name(), key, "Mapping key was not declared");
        }

        match self.settings.get(key) {
            Some(table) => mapping::map(table, name),
            None => Vec::new(),
        }
    }

    /// identify call
    pub async fn identify(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Identify, message).await
    }

    /// track call
    pub async fn track(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Track, message).await
    }

    /// page call
    pub async fn page(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Page, message).await
    }

    /// screen call
    pub async fn screen(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Screen, message).await
    }

    /// group call
    pub async fn group(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Group, message).await
    }

    /// alias call
    pub async fn alias(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Alias, message).await
    }

    /// delete call: remove the user's data at the destination
    pub async fn delete_user(&self, message: Message) -> Result<Value> {
        self.call_as(CallType::Delete, message).await
    }

    /// Dispatch by the message's own call type.
    ///
    /// Runs enablement, then validation, then the handler. Nothing reaches
    /// the network when either check fails.
    pub async fn call(&self, message: Message) -> Result<Value> {
        if let Some(err) = self.enabled(&message) {
            return Err(err);
        }
        if let Some(err) = self.validate(&message) {
            debug!(adapter = self.name(), "Validation failed: {}", err);
            return Err(err);
        }

        self.adapter.dispatcher().dispatch(self, message).await
    }

    /// Deliver several messages through the batch handler.
    ///
    /// Messages are assumed to have been checked individually already.
    pub async fn batch(&self, messages: Vec<Message>) -> Result<Value> {
        self.adapter.dispatcher().batch(self, messages).await
    }

    async fn call_as(&self, call: CallType, message: Message) -> Result<Value> {
        let message = match message.call_type() {
            Some(existing) if existing == call => message,
            _ => {
                let mut raw = message.into_raw();
                raw["type"] = Value::String(call.to_string());
                Message::new(raw)
            }
        };
        self.call(message).await
    }

    /// Outbound request; relative paths are resolved against the endpoint
    pub fn request(&self, method: HttpMethod, path: &str) -> Request {
        Request::new(
            self.adapter.shared_name(),
            self.adapter.client(),
            method,
            resolve_url(self.adapter.endpoint(), path),
            self.adapter.timeout(),
            self.events.clone(),
        )
    }

    /// GET request
    pub fn get(&self, path: &str) -> Request {
        self.request(HttpMethod::GET, path)
    }

    /// POST request
    pub fn post(&self, path: &str) -> Request {
        self.request(HttpMethod::POST, path)
    }

    /// PUT request
    pub fn put(&self, path: &str) -> Request {
        self.request(HttpMethod::PUT, path)
    }

    /// PATCH request
    pub fn patch(&self, path: &str) -> Request {
        self.request(HttpMethod::PATCH, path)
    }

    /// DELETE request
    pub fn delete(&self, path: &str) -> Request {
        self.request(HttpMethod::DELETE, path)
    }

    /// HEAD request
    pub fn head(&self, path: &str) -> Request {
        self.request(HttpMethod::HEAD, path)
    }

    fn lock_store(&self) -> Result<&Arc<dyn LockStore>> {
        self.lock_store
            .as_ref()
            .ok_or_else(|| Error::Config(format!("{}: no lock store configured", self.name())))
    }

    /// Take `key` for the default lease
    pub async fn lock(&self, key: &str) -> Result<()> {
        self.lock_for(key, self.lock_ttl).await
    }

    /// Take `key` for `ttl`; fails with `ResourceLocked` when already held
    pub async fn lock_for(&self, key: &str, ttl: Duration) -> Result<()> {
        if ttl.as_millis() == 0 {
            return Err(Error::Config(format!(
                "{}: lock lease must be at least 1ms, got {:?}",
                self.name(),
                ttl
            )));
        }
        let store = self.lock_store()?;
        let key = lock::namespaced(self.name(), key);

        let acquired = match store.set_nx_px(&key, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                ADAPTER_LOCK_ATTEMPTS_TOTAL
                    .with_label_values(&[self.name(), "error"])
                    .inc();
                return Err(e);
            }
        };

        if !acquired {
            ADAPTER_LOCK_ATTEMPTS_TOTAL
                .with_label_values(&[self.name(), "locked"])
                .inc();
            debug!(adapter = self.name(), key = %key, "Lock is held elsewhere");
            return Err(lock::locked(self.name(), &key));
        }

        ADAPTER_LOCK_ATTEMPTS_TOTAL
            .with_label_values(&[self.name(), "acquired"])
            .inc();
        info!(adapter = self.name(), key = %key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
        Ok(())
    }

    /// Release `key`. Failures are published as [`AdapterEvent::UnlockError`].
    pub async fn unlock(&self, key: &str) -> Result<()> {
        let store = self.lock_store()?;
        let key = lock::namespaced(self.name(), key);

        if let Err(e) = store.delete(&key).await {
            warn!(adapter = self.name(), key = %key, "Failed to release lock: {}", e);
            let _ = self.events.send(AdapterEvent::UnlockError {
                adapter: self.name().to_string(),
                key,
                error: e.to_string(),
            });
            return Err(e);
        }

        Ok(())
    }

    /// Run `fut` while holding `key`.
    ///
    /// The lock is released whatever `fut` returns, and also when it panics;
    /// the panic resumes after the release. A failed release is reported on
    /// the event channel but does not change the result.
    pub async fn with_lock<F, T>(&self, key: &str, ttl: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.lock_for(key, ttl).await?;
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        let _ = self.unlock(key).await;

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                warn!(adapter = self.name(), key, "Locked work panicked");
                panic::resume_unwind(payload)
            }
        }
    }
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("name", &self.name())
            .field("override_enabled", &self.override_enabled)
            .field("flags", &self.flags)
            .field("lock_ttl", &self.lock_ttl)
            .field("lock_store", &self.lock_store.is_some())
            .finish()
    }
}
