//! Tests for engine module

use super::*;
use crate::context::{ConditionalContext, FieldContext};
use crate::http::{RawPage, RequestParams};
use crate::pagination::{BookmarkFilter, CursorTokenPaginator};
use crate::record::DecimalFields;
use crate::state::State;
use crate::types::JsonValue;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use tempfile::tempdir;

// ============================================================================
// Scripted transport
// ============================================================================

enum Scripted {
    Page(RawPage),
    Status(u16),
}

type Route = (String, Option<String>);

/// In-memory transport answering by (path, page_info) and recording calls
#[derive(Default)]
struct MockTransport {
    routes: StdMutex<HashMap<Route, Scripted>>,
    calls: StdMutex<Vec<(String, RequestParams)>>,
    cancel_on: StdMutex<Option<(Route, CancellationToken)>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    /// Script a page; `next` becomes a Shopify-style Link header
    fn page(self, path: &str, token: Option<&str>, body: JsonValue, next: Option<&str>) -> Self {
        let mut page = RawPage::new(body);
        if let Some(next) = next {
            let link = format!("<https://shop.test/admin/api/2024-01{path}?limit=250&page_info={next}>; rel=\"next\"");
            page = page.with_header("link", &link);
        }
        self.routes
            .lock()
            .unwrap()
            .insert((path.to_string(), token.map(str::to_string)), Scripted::Page(page));
        self
    }

    fn fail(self, path: &str, token: Option<&str>, status: u16) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert((path.to_string(), token.map(str::to_string)), Scripted::Status(status));
        self
    }

    /// Cancel `token` while serving the given route
    fn cancel_when(self, path: &str, page: Option<&str>, token: &CancellationToken) -> Self {
        *self.cancel_on.lock().unwrap() =
            Some(((path.to_string(), page.map(str::to_string)), token.clone()));
        self
    }

    fn calls(&self) -> Vec<(String, RequestParams)> {
        self.calls.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|(path, _)| path).collect()
    }

    fn calls_to(&self, path: &str) -> usize {
        self.paths().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, _method: Method, path: &str, params: &RequestParams) -> Result<RawPage> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), params.clone()));

        let key = (path.to_string(), params.get("page_info").cloned());
        if let Some((route, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if *route == key {
                token.cancel();
            }
        }
        match self.routes.lock().unwrap().get(&key) {
            Some(Scripted::Page(page)) => Ok(page.clone()),
            Some(Scripted::Status(status)) => Err(Error::http_status(*status, "scripted failure")),
            None => Ok(RawPage::new(json!({}))),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn order(id: u64, updated_at: &str, total: &str, current: &str) -> JsonValue {
    json!({
        "id": id,
        "updated_at": updated_at,
        "total_price": total,
        "current_total_price": current,
    })
}

fn orders_stream() -> StreamDescriptor {
    StreamDescriptor::new("orders", "/orders.json", "$.orders[*]")
        .with_replication_key("updated_at")
        .with_pagination(
            CursorTokenPaginator::shopify(250)
                .with_first_page_param("status", "any")
                .with_filter(BookmarkFilter::updated_at_min(None)),
        )
        .with_normalizer(DecimalFields::new(["total_price", "current_total_price"]))
        .with_context_rule(ConditionalContext::when_decimals_differ(
            "current_total_price",
            "total_price",
            FieldContext::new("order_id", "id"),
        ))
}

fn refunds_stream() -> StreamDescriptor {
    StreamDescriptor::new("refunds", "/orders/{order_id}/refunds.json", "$.refunds[*]")
        .with_replication_key("created_at")
        .with_parent("orders")
}

fn order_metafields_stream() -> StreamDescriptor {
    StreamDescriptor::new(
        "order_metafields",
        "/orders/{order_id}/metafields.json",
        "$.metafields[*]",
    )
    .with_replication_key("updated_at")
    .with_parent("orders")
    .ignoring_parent_replication_key()
}

fn customers_stream() -> StreamDescriptor {
    StreamDescriptor::new("customers", "/customers.json", "$.customers[*]")
        .with_replication_key("updated_at")
        .with_pagination(
            CursorTokenPaginator::shopify(250).with_filter(BookmarkFilter::updated_at_min(None)),
        )
        .with_context_rule(FieldContext::new("customer_id", "id"))
}

fn addresses_stream() -> StreamDescriptor {
    StreamDescriptor::new(
        "addresses",
        "/customers/{customer_id}/addresses.json",
        "$.addresses[*]",
    )
    .with_parent("customers")
}

fn orders_graph() -> Arc<StreamGraph> {
    Arc::new(StreamGraph::new(vec![orders_stream(), refunds_stream(), order_metafields_stream()]).unwrap())
}

fn customers_graph() -> Arc<StreamGraph> {
    Arc::new(StreamGraph::new(vec![customers_stream(), addresses_stream()]).unwrap())
}

fn engine(transport: &Arc<MockTransport>, graph: Arc<StreamGraph>, store: BookmarkStore) -> SyncEngine {
    let transport: Arc<dyn Transport> = transport.clone();
    SyncEngine::new(transport, graph, store)
}

async fn run_to_end(engine: &SyncEngine) -> (Vec<Message>, Option<Error>) {
    let mut stream = engine.run().unwrap();
    let mut messages = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => messages.push(message),
            Err(e) => error = Some(e),
        }
    }
    (messages, error)
}

fn records_of<'a>(messages: &'a [Message], stream: &str) -> Vec<&'a Record> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Record { stream: s, record, .. } if s == stream => Some(record),
            _ => None,
        })
        .collect()
}

fn ids(records: &[&Record]) -> Vec<u64> {
    records
        .iter()
        .filter_map(|r| r.get("id").and_then(JsonValue::as_u64))
        .collect()
}

fn final_state(messages: &[Message]) -> State {
    match messages.iter().rev().find(|m| m.is_state()) {
        Some(Message::State(state)) => state.clone(),
        _ => panic!("no state message emitted"),
    }
}

fn root_value(state: &State, stream: &str) -> Option<JsonValue> {
    state
        .bookmark(stream, &ContextKey::Root)
        .and_then(|b| b.value().cloned())
}

// ============================================================================
// Message / Config Tests
// ============================================================================

#[test]
fn test_message_kinds() {
    let record = Message::record("orders", Record::from_value(json!({"id": 1})));
    assert!(record.is_record());
    assert_eq!(record.stream(), Some("orders"));

    let state = Message::state(State::new());
    assert!(state.is_state());
    assert_eq!(state.stream(), None);

    assert!(Message::info("hello").is_log());
    assert!(Message::warn("careful").is_log());
    assert!(Message::error("boom").is_log());
}

#[test]
fn test_message_json_lines() {
    let record = Record::from_value(json!({"id": 1}));
    let line = Message::record("orders", record).to_json().unwrap();
    assert_eq!(line["type"], "RECORD");
    assert_eq!(line["stream"], "orders");
    assert_eq!(line["record"], json!({"id": 1}));
    assert!(line["time_extracted"].as_str().unwrap().ends_with('Z'));

    let state = Message::state(State::new()).to_json_line().unwrap();
    assert_eq!(state, r#"{"type":"STATE","value":{"bookmarks":{}}}"#);

    let log = Message::info("done").to_json().unwrap();
    assert_eq!(log, json!({"type": "LOG", "level": "INFO", "message": "done"}));
}

#[test]
fn test_sync_config_default() {
    let config = SyncConfig::default();
    assert!(!config.emit_state_per_page);
    assert!(config.fail_fast);
    assert_eq!(config.child_concurrency, 1);
    assert_eq!(SyncConfig::new().with_child_concurrency(0).child_concurrency, 1);
}

#[test]
fn test_sync_stats() {
    let mut stats = SyncStats::new();
    stats.add_records(3);
    stats.add_skipped(2);
    stats.add_page();
    stats.add_unit();
    stats.add_skipped_context();
    stats.add_error();
    stats.set_duration(10);

    assert_eq!(stats.records_synced, 3);
    assert_eq!(stats.records_skipped, 2);
    assert_eq!(stats.pages_fetched, 1);
    assert_eq!(stats.units_completed, 1);
    assert_eq!(stats.contexts_skipped, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.duration_ms, 10);
}

// ============================================================================
// Traversal Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_pages_and_children() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/customers.json",
                None,
                json!({"customers": [
                    {"id": 1, "updated_at": "2024-01-01T00:00:00Z"},
                    {"id": 2, "updated_at": "2024-01-02T00:00:00Z"},
                ]}),
                Some("tok1"),
            )
            .page(
                "/customers.json",
                Some("tok1"),
                json!({"customers": [{"id": 3, "updated_at": "2024-01-03T00:00:00Z"}]}),
                None,
            )
            .page("/customers/1/addresses.json", None, json!({"addresses": [{"id": 11}]}), None)
            .page("/customers/2/addresses.json", None, json!({"addresses": [{"id": 21}]}), None)
            .page("/customers/3/addresses.json", None, json!({"addresses": [{"id": 31}]}), None),
    );

    let engine = engine(&transport, customers_graph(), BookmarkStore::in_memory());
    let (messages, error) = run_to_end(&engine).await;
    assert!(error.is_none(), "unexpected error: {error:?}");

    assert_eq!(ids(&records_of(&messages, "customers")), vec![1, 2, 3]);
    assert_eq!(ids(&records_of(&messages, "addresses")), vec![11, 21, 31]);

    // Depth-first: each child unit runs right after its parent record
    assert_eq!(
        transport.paths(),
        vec![
            "/customers.json",
            "/customers/1/addresses.json",
            "/customers/2/addresses.json",
            "/customers.json",
            "/customers/3/addresses.json",
        ]
    );

    // Second page sends only the token and the page size
    let calls = transport.calls();
    assert_eq!(calls[3].1.get("page_info").map(String::as_str), Some("tok1"));
    assert_eq!(calls[3].1.len(), 2);

    let state = final_state(&messages);
    assert_eq!(
        root_value(&state, "customers"),
        Some(json!("2024-01-03T00:00:00Z"))
    );
    assert!(messages.last().unwrap().is_state());

    let stats = engine.stats().await;
    assert_eq!(stats.records_synced, 6);
    assert_eq!(stats.pages_fetched, 5);
    assert_eq!(stats.units_completed, 4);
}

#[tokio::test]
async fn test_first_page_filters() {
    let transport = Arc::new(MockTransport::new());
    let store = BookmarkStore::from_state(State::new());
    store
        .advance("orders", &ContextKey::Root, &json!("2024-05-01T00:00:00Z"))
        .await;

    let engine = engine(&transport, orders_graph(), store);
    let (_, error) = run_to_end(&engine).await;
    assert!(error.is_none());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let params = &calls[0].1;
    assert_eq!(params.get("status").map(String::as_str), Some("any"));
    assert_eq!(params.get("limit").map(String::as_str), Some("250"));
    assert_eq!(
        params.get("updated_at_min").map(String::as_str),
        Some("2024-05-01T00:00:00Z")
    );
}

#[tokio::test]
async fn test_filter_omitted_without_bookmark() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    run_to_end(&engine).await;

    assert!(!transport.calls()[0].1.contains_key("updated_at_min"));
}

#[tokio::test]
async fn test_idempotent_resume() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [
                    order(1, "2024-01-01T00:00:00Z", "10.00", "10.00"),
                    order(2, "2024-01-02T00:00:00Z", "10.00", "5.00"),
                    order(3, "2024-01-02T00:00:00Z", "10.00", "10.00"),
                ]}),
                None,
            )
            .page(
                "/orders/2/refunds.json",
                None,
                json!({"refunds": [{"id": 20, "created_at": "2024-01-02T00:00:00Z"}]}),
                None,
            ),
    );

    let first = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (messages, error) = run_to_end(&first).await;
    assert!(error.is_none());
    assert_eq!(ids(&records_of(&messages, "orders")), vec![1, 2, 3]);
    assert_eq!(ids(&records_of(&messages, "refunds")), vec![20]);

    // Both records at the max value are remembered
    let state = final_state(&messages);
    let bookmark = state.bookmark("orders", &ContextKey::Root).unwrap();
    assert_eq!(
        bookmark.keys_at_bookmark().collect::<Vec<_>>(),
        vec!["2", "3"]
    );

    let second = engine(&transport, orders_graph(), BookmarkStore::from_state(state.clone()));
    let (messages, error) = run_to_end(&second).await;
    assert!(error.is_none());
    assert!(records_of(&messages, "orders").is_empty());
    assert!(records_of(&messages, "refunds").is_empty());
    assert_eq!(final_state(&messages), state);
    assert_eq!(second.stats().await.records_skipped, 3);
}

#[tokio::test]
async fn test_bookmark_never_lowered() {
    let transport = Arc::new(MockTransport::new().page(
        "/orders.json",
        None,
        json!({"orders": [
            order(1, "2024-03-01T00:00:00Z", "1.00", "1.00"),
            order(2, "2024-06-01T00:00:00Z", "1.00", "1.00"),
            order(3, "2024-04-01T00:00:00Z", "1.00", "1.00"),
        ]}),
        None,
    ));

    let store = BookmarkStore::in_memory();
    store
        .advance("orders", &ContextKey::Root, &json!("2024-03-15T00:00:00Z"))
        .await;

    let engine = engine(&transport, orders_graph(), store);
    let (messages, _) = run_to_end(&engine).await;

    // Record 1 is below the starting bookmark
    assert_eq!(ids(&records_of(&messages, "orders")), vec![2, 3]);
    assert_eq!(
        root_value(&final_state(&messages), "orders"),
        Some(json!("2024-06-01T00:00:00Z"))
    );
}

#[tokio::test]
async fn test_context_isolation() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [
                    order(1, "2024-01-01T00:00:00Z", "9.00", "8.00"),
                    order(2, "2024-01-02T00:00:00Z", "9.00", "7.00"),
                ]}),
                None,
            )
            .page(
                "/orders/1/refunds.json",
                None,
                json!({"refunds": [{"id": 10, "created_at": "2024-02-01T00:00:00Z"}]}),
                None,
            )
            .page(
                "/orders/2/refunds.json",
                None,
                json!({"refunds": [{"id": 20, "created_at": "2023-07-01T00:00:00Z"}]}),
                None,
            ),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (messages, _) = run_to_end(&engine).await;
    let state = final_state(&messages);

    let of = |order_id: u64| {
        state
            .bookmark("refunds", &ContextKey::Partition(Context::new().with("order_id", order_id)))
            .and_then(|b| b.value().cloned())
    };
    assert_eq!(of(1), Some(json!("2024-02-01T00:00:00Z")));
    assert_eq!(of(2), Some(json!("2023-07-01T00:00:00Z")));
    assert_eq!(state.get_stream("refunds").unwrap().partition_count(), 2);
}

#[tokio::test]
async fn test_conditional_derivation() {
    let transport = Arc::new(MockTransport::new().page(
        "/orders.json",
        None,
        json!({"orders": [
            order(1, "2024-01-01T00:00:00Z", "12.50", "12.50"),
            order(2, "2024-01-02T00:00:00Z", "12.50", "12.5"),
            order(3, "2024-01-03T00:00:00Z", "12.50", "2.50"),
        ]}),
        None,
    ));

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (messages, _) = run_to_end(&engine).await;

    // Equal totals (including 12.50 vs 12.5) derive no context
    assert_eq!(transport.calls_to("/orders/1/refunds.json"), 0);
    assert_eq!(transport.calls_to("/orders/2/refunds.json"), 0);
    assert_eq!(transport.calls_to("/orders/3/refunds.json"), 1);
    assert_eq!(transport.calls_to("/orders/3/metafields.json"), 1);

    // Decimals are emitted as exact strings
    let orders = records_of(&messages, "orders");
    assert_eq!(orders[0].to_json()["total_price"], json!("12.50"));
    assert_eq!(engine.stats().await.contexts_skipped, 4);
}

#[tokio::test]
async fn test_ignore_parent_replication_key_children() {
    let transport = Arc::new(MockTransport::new().page(
        "/orders.json",
        None,
        json!({"orders": [order(5, "2024-01-01T00:00:00Z", "3.00", "1.00")]}),
        None,
    ));
    let state = BookmarkStore::in_memory();
    state
        .merge("orders", &ContextKey::Root, &{
            let mut b = Bookmark::at("updated_at", "2024-01-01T00:00:00Z");
            b.observe(&json!("2024-01-01T00:00:00Z"), "5");
            b
        })
        .await;

    let engine = engine(&transport, orders_graph(), state);
    let (messages, _) = run_to_end(&engine).await;

    assert!(records_of(&messages, "orders").is_empty());
    assert_eq!(transport.calls_to("/orders/5/refunds.json"), 0);
    assert_eq!(transport.calls_to("/orders/5/metafields.json"), 1);
}

#[tokio::test]
async fn test_unselected_parent_is_traversed_not_emitted() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [order(1, "2024-01-01T00:00:00Z", "9.00", "1.00")]}),
                None,
            )
            .page(
                "/orders/1/refunds.json",
                None,
                json!({"refunds": [{"id": 10, "created_at": "2024-02-01T00:00:00Z"}]}),
                None,
            ),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory())
        .with_selection(StreamSelection::only(["refunds"]));
    let (messages, error) = run_to_end(&engine).await;
    assert!(error.is_none());

    assert!(records_of(&messages, "orders").is_empty());
    assert_eq!(ids(&records_of(&messages, "refunds")), vec![10]);
    assert_eq!(transport.calls_to("/orders/1/metafields.json"), 0);

    let state = final_state(&messages);
    assert!(state.get_stream("orders").is_none());
}

#[tokio::test]
async fn test_unknown_selection_fails_before_fetching() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory())
        .with_selection(StreamSelection::only(["gift_cards"]));

    assert!(matches!(engine.run(), Err(Error::UnknownStream { .. })));
    assert!(transport.calls().is_empty());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_partial_page_atomicity() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [order(1, "2024-01-01T00:00:00Z", "1.00", "1.00")]}),
                Some("p2"),
            )
            .page(
                "/orders.json",
                Some("p2"),
                json!({"orders": [order(2, "2024-01-02T00:00:00Z", "1.00", "1.00")]}),
                Some("p3"),
            )
            .fail("/orders.json", Some("p3"), 404),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::new(&path));
    let (messages, error) = run_to_end(&engine).await;

    match error {
        Some(Error::Unit {
            stream,
            page,
            source,
            ..
        }) => {
            assert_eq!(stream, "orders");
            assert_eq!(page, 3);
            assert!(matches!(*source, Error::HttpStatus { status: 404, .. }));
        }
        other => panic!("Expected Unit error, got {other:?}"),
    }

    assert_eq!(ids(&records_of(&messages, "orders")), vec![1, 2]);
    assert!(messages.iter().any(|m| matches!(m, Message::Log { level, .. } if *level == LogLevel::Error)));
    assert_eq!(
        root_value(&final_state(&messages), "orders"),
        Some(json!("2024-01-02T00:00:00Z"))
    );

    let persisted = BookmarkStore::from_file(&path).unwrap();
    assert_eq!(
        persisted.get("orders", &ContextKey::Root).await.value(),
        Some(&json!("2024-01-02T00:00:00Z"))
    );
}

#[tokio::test]
async fn test_data_shape_error_emits_nothing_from_page() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [order(1, "2024-01-01T00:00:00Z", "1.00", "1.00")]}),
                Some("p2"),
            )
            .page(
                "/orders.json",
                Some("p2"),
                json!({"orders": [
                    order(2, "2024-01-02T00:00:00Z", "1.00", "1.00"),
                    {"id": 3, "updated_at": "2024-01-03T00:00:00Z", "total_price": "1.00"},
                ]}),
                None,
            ),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (messages, error) = run_to_end(&engine).await;

    let error = error.unwrap();
    assert!(error.is_data_shape());
    assert!(error.to_string().contains("current_total_price"));
    assert_eq!(ids(&records_of(&messages, "orders")), vec![1]);
    assert_eq!(
        root_value(&final_state(&messages), "orders"),
        Some(json!("2024-01-01T00:00:00Z"))
    );
}

#[tokio::test]
async fn test_continue_on_failure() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [
                    order(1, "2024-01-01T00:00:00Z", "9.00", "1.00"),
                    order(2, "2024-01-02T00:00:00Z", "9.00", "1.00"),
                ]}),
                None,
            )
            .fail("/orders/1/refunds.json", None, 404)
            .page(
                "/orders/2/refunds.json",
                None,
                json!({"refunds": [{"id": 20, "created_at": "2024-01-05T00:00:00Z"}]}),
                None,
            ),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory())
        .with_config(SyncConfig::new().with_fail_fast(false));
    let (messages, error) = run_to_end(&engine).await;

    assert!(matches!(error, Some(Error::UnitsFailed { failed: 1 })));
    assert_eq!(ids(&records_of(&messages, "orders")), vec![1, 2]);
    assert_eq!(ids(&records_of(&messages, "refunds")), vec![20]);
    assert_eq!(transport.calls_to("/orders/2/metafields.json"), 1);

    // The failed refunds unit keeps the orders bookmark from moving past order 1
    let state = final_state(&messages);
    assert_eq!(root_value(&state, "orders"), None);
    let sibling = state
        .bookmark("refunds", &ContextKey::Partition(Context::new().with("order_id", 2)))
        .and_then(|b| b.value().cloned());
    assert_eq!(sibling, Some(json!("2024-01-05T00:00:00Z")));
}

#[tokio::test]
async fn test_failed_child_is_retried_on_resume() {
    let orders_page_1 = json!({"orders": [
        order(1, "2024-01-01T00:00:00Z", "9.00", "1.00"),
        order(2, "2024-01-02T00:00:00Z", "9.00", "1.00"),
    ]});
    let orders_page_2 = json!({"orders": [order(3, "2024-01-03T00:00:00Z", "1.00", "1.00")]});
    let order_2_refunds = json!({"refunds": [{"id": 20, "created_at": "2024-01-05T00:00:00Z"}]});

    let flaky = Arc::new(
        MockTransport::new()
            .page("/orders.json", None, orders_page_1.clone(), Some("p2"))
            .page("/orders.json", Some("p2"), orders_page_2.clone(), None)
            .fail("/orders/1/refunds.json", None, 404)
            .page("/orders/2/refunds.json", None, order_2_refunds.clone(), None),
    );
    let selection = StreamSelection::only(["orders", "refunds"]);
    let config = SyncConfig::new().with_fail_fast(false);

    let first = engine(&flaky, orders_graph(), BookmarkStore::in_memory())
        .with_selection(selection.clone())
        .with_config(config.clone());
    let (messages, error) = run_to_end(&first).await;
    assert!(matches!(error, Some(Error::UnitsFailed { failed: 1 })));
    assert_eq!(ids(&records_of(&messages, "orders")), vec![1, 2, 3]);

    // Later pages of the unit do not advance the bookmark either
    let state = final_state(&messages);
    assert_eq!(root_value(&state, "orders"), None);

    let healthy = Arc::new(
        MockTransport::new()
            .page("/orders.json", None, orders_page_1, Some("p2"))
            .page("/orders.json", Some("p2"), orders_page_2, None)
            .page(
                "/orders/1/refunds.json",
                None,
                json!({"refunds": [{"id": 10, "created_at": "2024-01-04T00:00:00Z"}]}),
                None,
            )
            .page("/orders/2/refunds.json", None, order_2_refunds, None),
    );
    let second = engine(&healthy, orders_graph(), BookmarkStore::from_state(state))
        .with_selection(selection)
        .with_config(config);
    let (messages, error) = run_to_end(&second).await;
    assert!(error.is_none(), "unexpected error: {error:?}");

    assert_eq!(healthy.calls_to("/orders/1/refunds.json"), 1);
    // Order 2's refund was already delivered in the first run
    assert_eq!(ids(&records_of(&messages, "refunds")), vec![10]);
    assert_eq!(
        root_value(&final_state(&messages), "orders"),
        Some(json!("2024-01-03T00:00:00Z"))
    );
}

#[tokio::test]
async fn test_fail_fast_stops_siblings() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [
                    order(1, "2024-01-01T00:00:00Z", "9.00", "1.00"),
                    order(2, "2024-01-02T00:00:00Z", "9.00", "1.00"),
                ]}),
                None,
            )
            .fail("/orders/1/refunds.json", None, 403),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (messages, error) = run_to_end(&engine).await;

    match error {
        Some(Error::Unit { stream, context, page, .. }) => {
            assert_eq!(stream, "refunds");
            assert_eq!(context, r#"{"order_id":1}"#);
            assert_eq!(page, 1);
        }
        other => panic!("Expected Unit error, got {other:?}"),
    }
    assert_eq!(transport.calls_to("/orders/2/refunds.json"), 0);

    // The parent page never completed, so its bookmark did not move
    assert_eq!(root_value(&final_state(&messages), "orders"), None);
}

#[tokio::test]
async fn test_repeated_token_is_pagination_error() {
    let transport = Arc::new(
        MockTransport::new()
            .page("/orders.json", None, json!({"orders": []}), Some("same"))
            .page("/orders.json", Some("same"), json!({"orders": []}), Some("same")),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let (_, error) = run_to_end(&engine).await;

    match error {
        Some(Error::Unit { source, page, .. }) => {
            assert_eq!(page, 2);
            assert!(matches!(*source, Error::Pagination { .. }));
        }
        other => panic!("Expected pagination loop error, got {other:?}"),
    }
    assert_eq!(transport.calls_to("/orders.json"), 2);
}

#[tokio::test]
async fn test_unresolved_placeholder_fails_unit() {
    let broken_child = StreamDescriptor::new(
        "addresses",
        "/customers/{customer_uuid}/addresses.json",
        "$.addresses[*]",
    )
    .with_parent("customers");
    let graph = Arc::new(StreamGraph::new(vec![customers_stream(), broken_child]).unwrap());
    let transport = Arc::new(MockTransport::new().page(
        "/customers.json",
        None,
        json!({"customers": [{"id": 1, "updated_at": "2024-01-01T00:00:00Z"}]}),
        None,
    ));

    let engine = engine(&transport, graph, BookmarkStore::in_memory());
    let (_, error) = run_to_end(&engine).await;

    match error {
        Some(Error::Unit { stream, source, .. }) => {
            assert_eq!(stream, "addresses");
            assert!(matches!(*source, Error::UndefinedVariable { .. }));
        }
        other => panic!("Expected Unit error, got {other:?}"),
    }
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let transport = Arc::new(MockTransport::new());
    let token = CancellationToken::new();
    token.cancel();

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory())
        .with_cancellation(token);
    let (messages, error) = run_to_end(&engine).await;

    assert!(matches!(error, Some(Error::Cancelled { .. })));
    assert!(transport.calls().is_empty());
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_state());
}

#[tokio::test]
async fn test_cancelled_between_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    let token = CancellationToken::new();

    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [order(1, "2024-01-01T00:00:00Z", "1.00", "1.00")]}),
                Some("p2"),
            )
            .page(
                "/orders.json",
                Some("p2"),
                json!({"orders": [order(2, "2024-01-02T00:00:00Z", "1.00", "1.00")]}),
                Some("p3"),
            )
            .page(
                "/orders.json",
                Some("p3"),
                json!({"orders": [order(3, "2024-01-03T00:00:00Z", "1.00", "1.00")]}),
                None,
            )
            .cancel_when("/orders.json", Some("p2"), &token),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::new(&path))
        .with_cancellation(token);
    let (messages, error) = run_to_end(&engine).await;

    assert!(matches!(error, Some(Error::Cancelled { .. })));
    assert_eq!(transport.calls_to("/orders.json"), 2);
    assert!(!transport
        .calls()
        .iter()
        .any(|(_, params)| params.get("page_info").map(String::as_str) == Some("p3")));

    // The page in flight completes; nothing past it is covered
    assert_eq!(ids(&records_of(&messages, "orders")), vec![1, 2]);
    let expected = Some(json!("2024-01-02T00:00:00Z"));
    assert_eq!(root_value(&final_state(&messages), "orders"), expected);
    let persisted = BookmarkStore::from_file(&path).unwrap();
    assert_eq!(
        persisted.get("orders", &ContextKey::Root).await.value().cloned(),
        expected
    );
}

#[tokio::test]
async fn test_dropping_stream_cancels_run() {
    let transport = Arc::new(MockTransport::new());
    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory());
    let token = engine.cancellation_token();

    let stream = engine.run().unwrap();
    drop(stream);

    assert!(token.is_cancelled());
}

// ============================================================================
// Output Options Tests
// ============================================================================

#[tokio::test]
async fn test_state_per_page() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/orders.json",
                None,
                json!({"orders": [order(1, "2024-01-01T00:00:00Z", "1.00", "1.00")]}),
                Some("p2"),
            )
            .page(
                "/orders.json",
                Some("p2"),
                json!({"orders": [order(2, "2024-01-02T00:00:00Z", "1.00", "1.00")]}),
                None,
            ),
    );

    let engine = engine(&transport, orders_graph(), BookmarkStore::in_memory())
        .with_config(SyncConfig::new().with_state_per_page(true));
    let (messages, _) = run_to_end(&engine).await;

    let states: Vec<&Message> = messages.iter().filter(|m| m.is_state()).collect();
    // One per page plus the final one
    assert_eq!(states.len(), 3);
    match states[0] {
        Message::State(state) => assert_eq!(
            root_value(state, "orders"),
            Some(json!("2024-01-01T00:00:00Z"))
        ),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_child_concurrency_emits_page_first() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/customers.json",
                None,
                json!({"customers": [
                    {"id": 1, "updated_at": "2024-01-01T00:00:00Z"},
                    {"id": 2, "updated_at": "2024-01-02T00:00:00Z"},
                    {"id": 3, "updated_at": "2024-01-03T00:00:00Z"},
                ]}),
                None,
            )
            .page("/customers/1/addresses.json", None, json!({"addresses": [{"id": 11}]}), None)
            .page("/customers/2/addresses.json", None, json!({"addresses": [{"id": 21}]}), None)
            .page("/customers/3/addresses.json", None, json!({"addresses": [{"id": 31}]}), None),
    );

    let engine = engine(&transport, customers_graph(), BookmarkStore::in_memory())
        .with_config(SyncConfig::new().with_child_concurrency(4));
    let (messages, error) = run_to_end(&engine).await;
    assert!(error.is_none());

    let streams: Vec<&str> = messages.iter().filter_map(Message::stream).collect();
    assert_eq!(&streams[..3], &["customers", "customers", "customers"]);

    let mut child_ids = ids(&records_of(&messages, "addresses"));
    child_ids.sort_unstable();
    assert_eq!(child_ids, vec![11, 21, 31]);
}

#[tokio::test]
async fn test_single_slot_channel_delivers_everything() {
    let transport = Arc::new(
        MockTransport::new()
            .page(
                "/customers.json",
                None,
                json!({"customers": [
                    {"id": 1, "updated_at": "2024-01-01T00:00:00Z"},
                    {"id": 2, "updated_at": "2024-01-02T00:00:00Z"},
                ]}),
                None,
            )
            .page("/customers/1/addresses.json", None, json!({"addresses": [{"id": 11}]}), None)
            .page("/customers/2/addresses.json", None, json!({"addresses": [{"id": 21}]}), None),
    );

    let engine = engine(&transport, customers_graph(), BookmarkStore::in_memory())
        .with_config(SyncConfig::new().with_channel_capacity(0));
    assert_eq!(engine.config().channel_capacity, 1);

    let (messages, error) = run_to_end(&engine).await;
    assert!(error.is_none());
    assert_eq!(ids(&records_of(&messages, "customers")), vec![1, 2]);
    assert_eq!(ids(&records_of(&messages, "addresses")), vec![11, 21]);
}

#[tokio::test]
async fn test_field_projection() {
    let transport = Arc::new(MockTransport::new().page(
        "/customers.json",
        None,
        json!({"customers": [
            {"id": 1, "updated_at": "2024-01-01T00:00:00Z", "email": "a@example.com", "note": "x"},
        ]}),
        None,
    ));

    let engine = engine(&transport, customers_graph(), BookmarkStore::in_memory())
        .with_selection(StreamSelection::only(["customers"]).with_fields("customers", ["email"]));
    let (messages, _) = run_to_end(&engine).await;

    let customers = records_of(&messages, "customers");
    assert_eq!(
        customers[0].to_json(),
        json!({"id": 1, "updated_at": "2024-01-01T00:00:00Z", "email": "a@example.com"})
    );
    // Addresses are not required, so no child requests
    assert_eq!(transport.calls().len(), 1);
}
