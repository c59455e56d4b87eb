use std::sync::Arc;

use heapscope_common::{ensure_test_logging, Config};
use heapscope_engine::{
    test_utils::SnapshotBuilder, BdhsOutcome, BdhsRequest, ExposeTarget, HeapscopeError,
    LiveSearchRequest, MockTransport, SearchCriterion, Session, SnapshotSearchRequest, TextQuery,
};
use serde_json::{json, Value};
use tracing::info;

fn session() -> (Arc<MockTransport>, Session<MockTransport>) {
    let mock = Arc::new(MockTransport::new());
    let session = Session::new(mock.clone(), Config::default());
    (mock, session)
}

/// window.store = Store { token: "abc" }, optionally without the token.
fn store_snapshot(with_token: bool) -> String {
    let mut b = SnapshotBuilder::new();
    let window = b.object("Window / https://shop.test");
    let store = b.object("Store");
    b.property(window, "store", store);
    if with_token {
        let token = b.string("abc");
        b.property(store, "token", token);
    }
    b.to_json()
}

fn queue_snapshot(mock: &MockTransport, text: String) {
    mock.react(
        "HeapProfiler.takeHeapSnapshot",
        vec![("HeapProfiler.addHeapSnapshotChunk", json!({ "chunk": text }))],
    );
}

fn pause(line: u32) -> Value {
    json!({
        "reason": "other",
        "callFrames": [{
            "callFrameId": format!("frame-{line}"),
            "functionName": "checkout",
            "location": { "scriptId": "3", "lineNumber": line, "columnNumber": 0 }
        }]
    })
}

#[tokio::test]
async fn test_capture_replaces_snapshot() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    assert!(session.snapshot().is_none());

    queue_snapshot(&mock, store_snapshot(true));
    let summary = session.capture_snapshot().await.unwrap();
    assert_eq!(summary.node_count, 3);
    assert_eq!(session.snapshot().unwrap().len(), 3);

    queue_snapshot(&mock, store_snapshot(false));
    let summary = session.capture_snapshot().await.unwrap();
    assert_eq!(summary.node_count, 2);
    assert_eq!(session.snapshot().unwrap().len(), 2);
}

#[tokio::test]
async fn test_search_captures_once() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    queue_snapshot(&mock, store_snapshot(true));

    let request = SnapshotSearchRequest {
        criterion: SearchCriterion { property: Some(TextQuery::substring("token")), ..Default::default() },
        max_results: None,
    };
    let report = session.search_snapshot(&request).await.unwrap();
    assert_eq!(report.total_matches, 1);
    assert_eq!(report.results[0].class_name, "Store");
    assert_eq!(report.results[0].path.as_deref(), Some("window.store"));

    let again = session.search_snapshot(&request).await.unwrap();
    assert_eq!(again.total_matches, 1);
    assert_eq!(mock.sent_with("HeapProfiler.takeHeapSnapshot").len(), 1);
}

#[tokio::test]
async fn test_search_request_from_json() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    queue_snapshot(&mock, store_snapshot(true));

    let request: SnapshotSearchRequest = serde_json::from_value(json!({
        "value": { "pattern": "ab" },
        "maxResults": 1
    }))
    .unwrap();
    let report = session.search_snapshot(&request).await.unwrap();
    assert_eq!(report.total_matches, 1);
    assert_eq!(report.results[0].class_name, "Store");
}

#[tokio::test]
async fn test_invalid_search_sends_nothing() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    let request = SnapshotSearchRequest {
        criterion: SearchCriterion { value: Some(TextQuery::regex("(")), ..Default::default() },
        max_results: None,
    };
    let err = session.search_snapshot(&request).await.unwrap_err();
    assert!(matches!(err, HeapscopeError::InvalidPattern { .. }));
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn test_live_object_search() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    mock.respond("Runtime.evaluate", json!({ "result": { "type": "object", "objectId": "proto" } }));
    mock.respond(
        "Runtime.queryObjects",
        json!({ "objects": { "type": "object", "subtype": "array", "objectId": "found" } }),
    );
    mock.respond_once(
        "Runtime.getProperties",
        json!({ "result": [
            { "name": "0", "value": { "type": "object", "className": "User", "objectId": "o1" } },
            { "name": "1", "value": { "type": "object", "className": "Cart", "objectId": "o2" } },
            { "name": "length", "value": { "type": "number", "value": 2 } }
        ] }),
    );
    mock.respond_once(
        "Runtime.getProperties",
        json!({ "result": [
            { "name": "token", "value": { "type": "string", "value": "ABC-123" } },
            { "name": "__proto__", "value": { "type": "object", "description": "Object", "objectId": "p" } },
            { "name": "profile", "value": { "type": "object", "description": "Object", "objectId": "x" } },
            { "name": "nothing", "value": { "type": "object", "subtype": "null", "value": null } }
        ] }),
    );
    mock.respond_once(
        "Runtime.getProperties",
        json!({ "result": [
            { "name": "items", "value": { "type": "object", "description": "Array(2)", "objectId": "y" } }
        ] }),
    );

    let request = LiveSearchRequest { value: Some("abc".to_string()), ..Default::default() };
    let results = session.search_live_objects(&request).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].object_id, "o1");
    assert_eq!(results[0].class_name.as_deref(), Some("User"));
    assert_eq!(
        Value::Object(results[0].object.clone()),
        json!({ "token": "ABC-123", "profile": "Object", "nothing": null })
    );

    assert_eq!(mock.sent_with("Runtime.queryObjects")[0].params, json!({ "prototypeObjectId": "proto" }));
    assert_eq!(mock.sent_with("Runtime.getProperties").len(), 3);
    assert_eq!(mock.sent_with("Runtime.releaseObject")[0].params, json!({ "objectId": "found" }));
}

#[tokio::test]
async fn test_live_search_by_class_and_cap() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    mock.respond("Runtime.evaluate", json!({ "result": { "type": "object", "objectId": "proto" } }));
    mock.respond("Runtime.queryObjects", json!({ "objects": { "type": "object", "objectId": "found" } }));
    mock.respond_once(
        "Runtime.getProperties",
        json!({ "result": [
            { "name": "0", "value": { "type": "object", "className": "Cart", "objectId": "o1" } },
            { "name": "1", "value": { "type": "object", "className": "Cart", "objectId": "o2" } }
        ] }),
    );
    mock.respond("Runtime.getProperties", json!({ "result": [] }));

    let request = LiveSearchRequest { class_name: Some("cart".to_string()), max_results: 1, ..Default::default() };
    let results = session.search_live_objects(&request).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].object_id, "o1");
}

#[tokio::test]
async fn test_expose_object() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "object", "objectId": "exposed" } }));
    mock.respond(
        "HeapProfiler.getObjectByHeapObjectId",
        json!({ "result": { "type": "object", "objectId": "from-heap" } }),
    );

    let err = session.expose_object(&ExposeTarget::Remote("obj-1".to_string()), "bad name").await.unwrap_err();
    assert!(matches!(err, HeapscopeError::Config(_)));
    assert!(mock.sent().is_empty());

    let name = session.expose_object(&ExposeTarget::Remote("obj-1".to_string()), "leak").await.unwrap();
    assert_eq!(name, "leak");
    let call = &mock.sent_with("Runtime.callFunctionOn")[0].params;
    assert_eq!(call["objectId"], json!("obj-1"));
    assert_eq!(call["functionDeclaration"], json!("function() { window['leak'] = this; return this; }"));

    session.expose_object(&ExposeTarget::HeapNode(42), "$heap").await.unwrap();
    assert_eq!(mock.sent_with("HeapProfiler.getObjectByHeapObjectId")[0].params, json!({ "objectId": "42" }));
    assert_eq!(mock.sent_with("Runtime.callFunctionOn")[1].params["objectId"], json!("from-heap"));
}

#[tokio::test(start_paused = true)]
async fn test_bdhs_lifecycle() {
    ensure_test_logging(None);
    info!("Running test");

    let (_mock, session) = session();
    assert!(matches!(session.stop_bdhs().await, Err(HeapscopeError::Config(_))));

    let request = BdhsRequest {
        criterion: SearchCriterion { property: Some(TextQuery::substring("token")), ..Default::default() },
        ..Default::default()
    };
    let _signals = session.start_bdhs(&request).await.unwrap();
    assert!(session.is_bdhs_running());
    assert!(matches!(session.start_bdhs(&request).await, Err(HeapscopeError::Config(_))));

    assert!(matches!(session.stop_bdhs().await.unwrap(), BdhsOutcome::Aborted));
    assert!(!session.is_bdhs_running());
    assert!(matches!(session.stop_bdhs().await, Err(HeapscopeError::Config(_))));

    // The debugger is free again.
    let _signals = session.start_bdhs(&request).await.unwrap();
    assert!(matches!(session.stop_bdhs().await.unwrap(), BdhsOutcome::Aborted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bdhs_concurrent_starts_keep_one_run() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    let session = Arc::new(session);
    let request = BdhsRequest::default();

    let starts = (0..4).map(|_| {
        let session = session.clone();
        let request = request.clone();
        tokio::spawn(async move { session.start_bdhs(&request).await })
    });
    let results: Vec<_> = futures::future::join_all(starts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| matches!(r, Err(HeapscopeError::Config(_)))));
    assert_eq!(mock.subscriber_count("Debugger.paused"), 1);
    assert_eq!(mock.sent_with("DOMDebugger.setEventListenerBreakpoint").len(), 1);

    assert!(session.is_bdhs_running());
    assert!(matches!(session.stop_bdhs().await.unwrap(), BdhsOutcome::Aborted));
    assert!(!session.is_bdhs_running());
}

#[tokio::test(start_paused = true)]
async fn test_bdhs_rejects_invalid_criterion() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    let request = BdhsRequest {
        criterion: SearchCriterion { class_name: Some(TextQuery::regex("[")), ..Default::default() },
        ..Default::default()
    };
    assert!(matches!(session.start_bdhs(&request).await, Err(HeapscopeError::InvalidPattern { .. })));
    assert!(mock.sent().is_empty());
    assert!(!session.is_bdhs_running());
}

#[tokio::test(start_paused = true)]
async fn test_bdhs_end_to_end() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    mock.respond("Debugger.evaluateOnCallFrame", json!({ "result": { "type": "undefined" } }));
    mock.respond("Debugger.getScriptSource", json!({ "scriptSource": "function checkout() {}" }));
    for with_token in [false, true, false] {
        queue_snapshot(&mock, store_snapshot(with_token));
    }

    let request: BdhsRequest = serde_json::from_value(json!({
        "property": { "pattern": "token" },
        "toleranceBefore": 2,
        "toleranceAfter": 2
    }))
    .unwrap();
    let mut signals = session.start_bdhs(&request).await.unwrap();

    for line in [4, 8, 12] {
        mock.emit("Debugger.paused", pause(line));
    }

    let BdhsOutcome::Found(result) = session.wait_bdhs().await.unwrap() else { panic!("expected a result") };
    assert_eq!(result.first_match_index, Some(1));
    assert_eq!(result.frames.len(), 3);
    let first = result.frames.iter().find(|f| f.is_first_match).unwrap();
    assert_eq!(first.line_number, 9);
    assert_eq!(first.heap_matches[0].path.as_deref(), Some("window.store"));
    assert_eq!(mock.sent_with("HeapProfiler.takeHeapSnapshot").len(), 3);

    let mut last = None;
    while let Some(signal) = signals.recv().await {
        last = Some(signal);
    }
    let last = serde_json::to_value(last.unwrap()).unwrap();
    assert_eq!(last["event"], json!("completed"));
    assert!(last["elapsed"].is_u64());
}

#[tokio::test(start_paused = true)]
async fn test_detach_stops_the_run() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, session) = session();
    let _signals = session.start_bdhs(&BdhsRequest::default()).await.unwrap();

    session.detach().await.unwrap();
    assert!(mock.is_detached());
    assert!(!session.is_bdhs_running());
    assert_eq!(mock.sent_with("Debugger.disable").len(), 1);
    assert!(session.capture_snapshot().await.is_err());
}
