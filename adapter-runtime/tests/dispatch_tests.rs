//! Dispatcher behaviour through the public instance API

use adapter_runtime::{
    batch_handler_fn, handler_fn, AdapterType, AdapterTypeBuilder, CallType, EcommerceEvent,
    Error, ErrorKind, Handler, Integration, Message, Method, Payload, Settings,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<(&'static str, Value)>>>;

fn recorder(label: &'static str, log: &Log) -> Arc<dyn Handler> {
    let log = log.clone();
    handler_fn(move |_, payload: Payload| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push((label, payload.as_value().clone()));
            Ok(json!(label))
        }
    })
}

fn labels(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().iter().map(|(label, _)| *label).collect()
}

fn builder() -> AdapterTypeBuilder {
    AdapterType::builder("Test").unwrap()
}

fn instance(builder: AdapterTypeBuilder, settings: Value) -> Integration {
    let settings: Settings = settings.as_object().cloned().unwrap_or_default();
    Integration::new(Arc::new(builder.build().unwrap()), settings)
}

fn message(call: &str, extra: Value) -> Message {
    let mut raw = json!({ "type": call, "channel": "server", "userId": "user-1" });
    if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
        raw.extend(extra.clone());
    }
    Message::new(raw)
}

#[tokio::test]
async fn mapper_output_reaches_the_handler() {
    let log = Log::default();
    let integration = instance(
        builder()
            .handler(Method::Track, recorder("track", &log))
            .handler(Method::Identify, recorder("identify", &log))
            .mapper(Method::Track, |msg: &Message, settings: &Settings| {
                Ok(json!({ "name": msg.event(), "key": settings.get("apiKey") }))
            }),
        json!({ "apiKey": "k" }),
    );

    integration
        .track(message("track", json!({ "event": "Signed Up" })))
        .await
        .unwrap();
    integration.identify(message("identify", json!({}))).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log[0], ("track", json!({ "name": "Signed Up", "key": "k" })));
    assert_eq!(log[1].0, "identify");
    assert_eq!(log[1].1["userId"], json!("user-1"));
}

#[tokio::test]
async fn ecommerce_variants_route_to_one_handler_once_each() {
    let log = Log::default();
    let integration = instance(
        builder()
            .handler(Method::Track, recorder("track", &log))
            .handler(
                Method::Ecommerce(EcommerceEvent::ViewedProduct),
                recorder("viewed product", &log),
            ),
        json!({}),
    );

    for event in ["Viewed Product", "viewed product", "viewed_product", "viewedProduct"] {
        let result = integration
            .track(message("track", json!({ "event": event })))
            .await
            .unwrap();
        assert_eq!(result, json!("viewed product"));
    }
    integration
        .track(message("track", json!({ "event": "Viewed Product Category" })))
        .await
        .unwrap();

    assert_eq!(
        labels(&log),
        vec!["viewed product", "viewed product", "viewed product", "viewed product", "track"]
    );
}

#[tokio::test]
async fn ecommerce_handlers_use_their_own_mapper() {
    let log = Log::default();
    let integration = instance(
        builder()
            .handler(Method::Track, recorder("track", &log))
            .handler(
                Method::Ecommerce(EcommerceEvent::OrderCompleted),
                recorder("order completed", &log),
            )
            .mapper(
                Method::Ecommerce(EcommerceEvent::OrderCompleted),
                |msg: &Message, _: &Settings| Ok(json!({ "order": msg.properties()["orderId"] })),
            ),
        json!({}),
    );

    integration
        .track(message(
            "track",
            json!({ "event": "Order Completed", "properties": { "orderId": "o-1" } }),
        ))
        .await
        .unwrap();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[("order completed", json!({ "order": "o-1" }))]
    );
}

#[tokio::test]
async fn screen_aliases_to_page() {
    let log = Log::default();
    let integration = instance(builder().handler(Method::Page, recorder("page", &log)), json!({}));

    integration
        .screen(message("screen", json!({ "name": "Home" })))
        .await
        .unwrap();

    assert_eq!(labels(&log), vec!["page"]);
}

#[tokio::test]
async fn unrouted_calls_are_rejected() {
    let log = Log::default();
    let integration = instance(builder().handler(Method::Track, recorder("track", &log)), json!({}));

    let err = integration.group(message("group", json!({ "groupId": "g" }))).await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::MessageRejected));
    assert_eq!(err.to_string(), "Test: group calls are not supported");
    assert!(!integration.retry(&err));
    assert!(labels(&log).is_empty());
}

fn fan_out(settings: Value, log: &Log) -> Integration {
    instance(
        builder()
            .handler(Method::Track, recorder("track", log))
            .map_to_track([CallType::Page]),
        settings,
    )
}

fn docs_page() -> Message {
    message(
        "page",
        json!({
            "name": "Integration",
            "category": "Docs",
            "properties": { "url": "https://example.com/docs" }
        }),
    )
}

#[tokio::test]
async fn page_fans_out_into_up_to_three_tracks() {
    let log = Log::default();
    let integration = fan_out(
        json!({ "trackAllPages": true, "trackCategorizedPages": true, "trackNamedPages": true }),
        &log,
    );

    let result = integration.page(docs_page()).await.unwrap();
    assert_eq!(result, json!(["track", "track", "track"]));

    let log = log.lock().unwrap();
    let mut events: Vec<&str> = log.iter().filter_map(|(_, v)| v["event"].as_str()).collect();
    events.sort_unstable();
    assert_eq!(
        events,
        vec!["Loaded a Page", "Viewed Docs Integration Page", "Viewed Docs Page"]
    );

    for (_, track) in log.iter() {
        assert_eq!(track["type"], json!("track"));
        assert_eq!(
            track["properties"],
            json!({ "url": "https://example.com/docs", "category": "Docs", "name": "Integration" })
        );
    }
}

#[tokio::test]
async fn fan_out_respects_flags() {
    let log = Log::default();
    let integration = fan_out(json!({ "trackNamedPages": true }), &log);
    integration.page(docs_page()).await.unwrap();
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(log.lock().unwrap()[0].1["event"], json!("Viewed Docs Integration Page"));

    let log = Log::default();
    let integration = fan_out(json!({}), &log);
    let result = integration.page(docs_page()).await.unwrap();
    assert_eq!(result, json!([]));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn screen_fan_out_is_aliased_from_page() {
    let log = Log::default();
    let integration = fan_out(json!({ "trackAllPages": true }), &log);

    integration
        .screen(message("screen", json!({ "name": "Home" })))
        .await
        .unwrap();

    assert_eq!(log.lock().unwrap()[0].1["event"], json!("Loaded a Screen"));
}

#[tokio::test]
async fn fan_out_fails_when_any_track_fails() {
    let integration = instance(
        builder()
            .handler(
                Method::Track,
                handler_fn(|integration: Integration, payload: Payload| async move {
                    match payload.as_value()["event"].as_str() {
                        Some("Loaded a Page") => Ok(json!("ok")),
                        _ => Err(Error::http_status(integration.name(), 500, "boom")),
                    }
                }),
            )
            .map_to_track([CallType::Page]),
        json!({ "trackAllPages": true, "trackNamedPages": true }),
    );

    let err = integration.page(docs_page()).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(integration.retry(&err));
}

#[tokio::test]
async fn batch_partitions_and_maps_each_event() {
    let buckets: Arc<Mutex<Vec<Vec<Value>>>> = Arc::default();
    let seen = buckets.clone();

    let integration = instance(
        builder()
            .mapper(Method::Identify, |msg: &Message, _: &Settings| {
                Ok(json!({ "id": msg.user_id() }))
            })
            .batch_mapper(|messages: Vec<Message>, _: &Settings| {
                let (identifies, rest): (Vec<_>, Vec<_>) = messages
                    .into_iter()
                    .partition(|msg| msg.raw()["type"] == json!("identify"));
                vec![identifies, rest]
            })
            .batch_handler(batch_handler_fn(move |_, payloads: Vec<Payload>| {
                let seen = seen.clone();
                async move {
                    let count = payloads.len();
                    seen.lock()
                        .unwrap()
                        .push(payloads.into_iter().map(Payload::into_value).collect());
                    Ok(json!(count))
                }
            })),
        json!({}),
    );

    let result = integration
        .batch(vec![
            message("identify", json!({})),
            message("track", json!({ "event": "A" })),
            message("identify", json!({ "userId": "user-2" })),
        ])
        .await
        .unwrap();

    assert_eq!(result, json!([2, 1]));

    let buckets = buckets.lock().unwrap();
    assert_eq!(buckets[0], vec![json!({ "id": "user-1" }), json!({ "id": "user-2" })]);
    assert_eq!(buckets[1][0]["event"], json!("A"));
}

#[tokio::test]
async fn batch_without_handler_is_rejected() {
    let integration = instance(builder(), json!({}));

    let err = integration.batch(vec![message("track", json!({}))]).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MessageRejected));
}
