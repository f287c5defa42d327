//! Event dispatcher
//!
//! Routes an inbound call to the handler registered for its method. Along the
//! way it applies the method's mapper, redirects ecommerce track events to
//! their dedicated handlers and fans page/screen calls out into tracks.

use crate::ecommerce::EcommerceEvent;
use crate::error::{Error, Result};
use crate::integration::Integration;
use crate::mapping::is_truthy;
use crate::message::{CallType, Facade, Message};
use crate::Settings;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Settings flag: one `Loaded a Page` track per page call
pub const TRACK_ALL_PAGES: &str = "trackAllPages";

/// Settings flag: one `Viewed <category> Page` track when a category is set
pub const TRACK_CATEGORIZED_PAGES: &str = "trackCategorizedPages";

/// Settings flag: one `Viewed <name> Page` track when a name is set
pub const TRACK_NAMED_PAGES: &str = "trackNamedPages";

/// Handler slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// identify
    Identify,
    /// track (after ecommerce routing found nothing)
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
    /// A canonical ecommerce track event
    Ecommerce(EcommerceEvent),
}

impl From<CallType> for Method {
    fn from(call: CallType) -> Self {
        match call {
            CallType::Identify => Method::Identify,
            CallType::Track => Method::Track,
            CallType::Page => Method::Page,
            CallType::Screen => Method::Screen,
            CallType::Group => Method::Group,
            CallType::Alias => Method::Alias,
            CallType::Delete => Method::Delete,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Identify => f.write_str("identify"),
            Method::Track => f.write_str("track"),
            Method::Page => f.write_str("page"),
            Method::Screen => f.write_str("screen"),
            Method::Group => f.write_str("group"),
            Method::Alias => f.write_str("alias"),
            Method::Delete => f.write_str("delete"),
            Method::Ecommerce(event) => write!(f, "track({})", event),
        }
    }
}

/// What a handler receives: the message itself, or its mapped payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No mapper registered for the method
    Message(Message),
    /// Output of the method's mapper
    Mapped(Value),
}

impl Payload {
    /// The message, when unmapped
    pub fn message(&self) -> Option<&Message> {
        match self {
            Payload::Message(msg) => Some(msg),
            Payload::Mapped(_) => None,
        }
    }

    /// Underlying JSON
    pub fn as_value(&self) -> &Value {
        match self {
            Payload::Message(msg) => msg.raw(),
            Payload::Mapped(value) => value,
        }
    }

    /// Consume into JSON
    pub fn into_value(self) -> Value {
        match self {
            Payload::Message(msg) => msg.into_raw(),
            Payload::Mapped(value) => value,
        }
    }
}

/// Per-method transform from message to destination payload
pub type Mapper = Arc<dyn Fn(&Message, &Settings) -> Result<Value> + Send + Sync>;

/// Splits a batch into buckets, each delivered separately
pub type BatchMapper = Arc<dyn Fn(Vec<Message>, &Settings) -> Vec<Vec<Message>> + Send + Sync>;

/// Destination-specific handling of one call
#[async_trait]
pub trait Handler: Send + Sync {
    /// Deliver `payload` using `integration`'s request pipeline
    async fn handle(&self, integration: &Integration, payload: Payload) -> Result<Value>;
}

/// Destination-specific handling of a bucket of calls
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Deliver one bucket
    async fn handle_batch(&self, integration: &Integration, payloads: Vec<Payload>) -> Result<Value>;
}

/// Closure-backed [`Handler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Integration, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle(&self, integration: &Integration, payload: Payload) -> Result<Value> {
        (self.0)(integration.clone(), payload).await
    }
}

/// Closure-backed [`BatchHandler`]
pub struct FnBatchHandler<F>(F);

#[async_trait]
impl<F, Fut> BatchHandler for FnBatchHandler<F>
where
    F: Fn(Integration, Vec<Payload>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn handle_batch(&self, integration: &Integration, payloads: Vec<Payload>) -> Result<Value> {
        (self.0)(integration.clone(), payloads).await
    }
}

/// Handler from an async closure
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Integration, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Batch handler from an async closure
pub fn batch_handler_fn<F, Fut>(f: F) -> Arc<dyn BatchHandler>
where
    F: Fn(Integration, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnBatchHandler(f))
}

/// Frozen routing tables of an adapter type
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<Method, Arc<dyn Handler>>,
    mappers: HashMap<Method, Mapper>,
    batch_handler: Option<Arc<dyn BatchHandler>>,
    batch_mapper: Option<BatchMapper>,
    map_to_track: HashSet<CallType>,
}

impl Dispatcher {
    /// Freeze the routing tables.
    ///
    /// When only one of page/screen is routed (by a handler or fan-out) the
    /// other borrows its route. Mappers alias the same way, independently.
    pub fn new(
        mut handlers: HashMap<Method, Arc<dyn Handler>>,
        mut mappers: HashMap<Method, Mapper>,
        batch_handler: Option<Arc<dyn BatchHandler>>,
        batch_mapper: Option<BatchMapper>,
        mut map_to_track: HashSet<CallType>,
    ) -> Self {
        for (from, to) in [(CallType::Page, CallType::Screen), (CallType::Screen, CallType::Page)] {
            let to_routed =
                handlers.contains_key(&Method::from(to)) || map_to_track.contains(&to);
            if to_routed {
                continue;
            }

            if map_to_track.contains(&from) {
                map_to_track.insert(to);
            } else if let Some(handler) = handlers.get(&Method::from(from)).cloned() {
                handlers.insert(Method::from(to), handler);
            }
        }

        for (from, to) in [(Method::Page, Method::Screen), (Method::Screen, Method::Page)] {
            if mappers.contains_key(&to) {
                continue;
            }
            if let Some(mapper) = mappers.get(&from).cloned() {
                mappers.insert(to, mapper);
            }
        }

        Self {
            handlers,
            mappers,
            batch_handler,
            batch_mapper,
            map_to_track,
        }
    }

    /// Whether calls of this type reach a handler or fan out
    pub fn routes(&self, call: CallType) -> bool {
        self.map_to_track.contains(&call) || self.handlers.contains_key(&Method::from(call))
    }

    /// Whether a handler is registered for `method` (after aliasing)
    pub fn has_handler(&self, method: Method) -> bool {
        self.handlers.contains_key(&method)
    }

    /// Whether batches are accepted
    pub fn batches(&self) -> bool {
        self.batch_handler.is_some()
    }

    /// Route `message` by its call type
    pub async fn dispatch(&self, integration: &Integration, message: Message) -> Result<Value> {
        let call = message
            .call_type()
            .ok_or_else(|| Error::rejected(integration.name(), "message has no call type"))?;

        if self.map_to_track.contains(&call) {
            return self.fan_out(integration, &message).await;
        }

        match call {
            CallType::Track => self.route_track(integration, message).await,
            other => self.invoke(integration, Method::from(other), message).await,
        }
    }

    /// Deliver a batch through the batch handler, one call per bucket
    pub async fn batch(&self, integration: &Integration, messages: Vec<Message>) -> Result<Value> {
        let handler = self
            .batch_handler
            .as_ref()
            .ok_or_else(|| Error::rejected(integration.name(), "batch calls are not supported"))?;

        let settings = integration.settings();
        let buckets = match &self.batch_mapper {
            Some(partition) => partition(messages, settings),
            None => vec![messages],
        };

        let mut results = Vec::with_capacity(buckets.len());
        for bucket in buckets.into_iter().filter(|bucket| !bucket.is_empty()) {
            let payloads = bucket
                .into_iter()
                .map(|msg| self.map_payload(msg.call_type().map(Method::from), msg, settings))
                .collect::<Result<Vec<_>>>()?;

            debug!(adapter = integration.name(), events = payloads.len(), "Delivering batch bucket");
            results.push(handler.handle_batch(integration, payloads).await?);
        }

        Ok(Value::Array(results))
    }

    async fn route_track(&self, integration: &Integration, message: Message) -> Result<Value> {
        let routed = message.event().and_then(|event| {
            EcommerceEvent::route(event)
                .map(Method::Ecommerce)
                .find(|method| self.handlers.contains_key(method))
        });

        match routed {
            Some(method) => self.invoke(integration, method, message).await,
            None => self.invoke(integration, Method::Track, message).await,
        }
    }

    async fn fan_out(&self, integration: &Integration, message: &Message) -> Result<Value> {
        let settings = integration.settings();
        let flag = |key: &str| settings.get(key).map(is_truthy).unwrap_or(false);

        let mut tracks = Vec::new();
        if flag(TRACK_ALL_PAGES) {
            tracks.push(message.to_track(None));
        }
        if let Some(category) = message.category().filter(|_| flag(TRACK_CATEGORIZED_PAGES)) {
            tracks.push(message.to_track(Some(category)));
        }
        if let Some(name) = message.full_name().filter(|_| flag(TRACK_NAMED_PAGES)) {
            tracks.push(message.to_track(Some(&name)));
        }

        debug!(adapter = integration.name(), tracks = tracks.len(), "Mapping call to tracks");
        let results = try_join_all(
            tracks
                .into_iter()
                .map(|track| self.route_track(integration, track)),
        )
        .await?;

        Ok(Value::Array(results))
    }

    async fn invoke(&self, integration: &Integration, method: Method, message: Message) -> Result<Value> {
        let handler = self.handlers.get(&method).ok_or_else(|| {
            Error::rejected(integration.name(), format!("{} calls are not supported", method))
        })?;

        let payload = self.map_payload(Some(method), message, integration.settings())?;
        handler.handle(integration, payload).await
    }

    fn map_payload(&self, method: Option<Method>, message: Message, settings: &Settings) -> Result<Payload> {
        match method.and_then(|method| self.mappers.get(&method)) {
            Some(mapper) => {
                let mapped = mapper(&message, settings)?;
                debug!(method = ?method, "Mapped message to payload");
                Ok(Payload::Mapped(mapped))
            }
            None => Ok(Payload::Message(message)),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("mappers", &self.mappers.keys().collect::<Vec<_>>())
            .field("batch", &self.batch_handler.is_some())
            .field("map_to_track", &self.map_to_track)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Arc<dyn Handler> {
        handler_fn(|_, payload: Payload| async move { Ok(payload.into_value()) })
    }

    fn mapper() -> Mapper {
        Arc::new(|msg: &Message, _: &Settings| -> Result<Value> {
            Ok(json!({ "mapped": msg.raw().clone() }))
        })
    }

    #[test]
    fn test_page_handler_aliases_screen() {
        let handlers = HashMap::from([(Method::Page, noop())]);
        let dispatcher = Dispatcher::new(handlers, HashMap::new(), None, None, HashSet::new());

        assert!(dispatcher.routes(CallType::Page));
        assert!(dispatcher.routes(CallType::Screen));
        assert!(!dispatcher.routes(CallType::Group));
    }

    #[test]
    fn test_both_routed_no_alias() {
        let handlers = HashMap::from([(Method::Screen, noop())]);
        let fan_out = HashSet::from([CallType::Page]);
        let dispatcher = Dispatcher::new(handlers, HashMap::new(), None, None, fan_out);

        assert!(dispatcher.map_to_track.contains(&CallType::Page));
        assert!(!dispatcher.map_to_track.contains(&CallType::Screen));
        assert!(!dispatcher.has_handler(Method::Page));
    }

    #[test]
    fn test_fan_out_aliases() {
        let fan_out = HashSet::from([CallType::Screen]);
        let dispatcher = Dispatcher::new(HashMap::new(), HashMap::new(), None, None, fan_out);

        assert!(dispatcher.routes(CallType::Page));
        assert!(!dispatcher.has_handler(Method::Page));
    }

    #[test]
    fn test_mappers_alias_independently() {
        let handlers = HashMap::from([(Method::Page, noop()), (Method::Screen, noop())]);
        let mappers = HashMap::from([(Method::Screen, mapper())]);
        let dispatcher = Dispatcher::new(handlers, mappers, None, None, HashSet::new());

        assert!(dispatcher.mappers.contains_key(&Method::Page));
        assert!(dispatcher.mappers.contains_key(&Method::Screen));
    }

    #[test]
    fn test_method_display() {
        assert_eq!(Method::Track.to_string(), "track");
        assert_eq!(
            Method::Ecommerce(EcommerceEvent::OrderCompleted).to_string(),
            "track(Order Completed)"
        );
    }
}
