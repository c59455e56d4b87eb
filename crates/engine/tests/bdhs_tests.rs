use std::{collections::VecDeque, sync::Arc, time::Duration};

use futures::FutureExt;
use heapscope_common::ensure_test_logging;
use heapscope_engine::{
    BdhsExecutor, BdhsOptions, BdhsOutcome, BdhsSearch, BdhsSignal, Debugger, HeapscopeError,
    JsValue, MockTransport, Result, SearchResultItem,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

fn hit(node_id: u64) -> Vec<SearchResultItem> {
    vec![SearchResultItem {
        value: JsValue::String("needle".to_string()),
        class_name: String::new(),
        class_annotations: Vec::new(),
        path: Some("window.needle".to_string()),
        similarity: None,
        node_id,
    }]
}

fn miss() -> Vec<SearchResultItem> {
    Vec::new()
}

/// Search answering from a queue, then with no matches.
fn scripted(results: Vec<Result<Vec<SearchResultItem>>>) -> BdhsSearch {
    let queue = Arc::new(Mutex::new(VecDeque::from(results)));
    Arc::new(move || {
        let next = queue.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()));
        async move { next }.boxed()
    })
}

/// A debuggee where the click target carries no framework handler.
fn debuggee() -> Arc<MockTransport> {
    let mock = Arc::new(MockTransport::new());
    mock.respond("Debugger.evaluateOnCallFrame", json!({ "result": { "type": "undefined" } }));
    mock.respond("Debugger.getScriptSource", json!({ "scriptSource": "function handler() {}" }));
    mock
}

fn pause(line: u32) -> Value {
    json!({
        "reason": "other",
        "callFrames": [{
            "callFrameId": format!("frame-{line}"),
            "functionName": format!("step{line}"),
            "location": { "scriptId": "9", "lineNumber": line, "columnNumber": 4 },
            "url": "https://app.test/main.js"
        }]
    })
}

fn options(before: usize, after: usize, max_steps: usize) -> BdhsOptions {
    BdhsOptions {
        tolerance_before: before,
        tolerance_after: after,
        max_steps,
        tick_interval: Duration::from_millis(100),
        idle_tick_limit: 2,
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<BdhsSignal>) -> Vec<BdhsSignal> {
    let mut signals = Vec::new();
    while let Some(signal) = rx.recv().await {
        signals.push(signal);
    }
    signals
}

fn names(signals: &[BdhsSignal]) -> Vec<String> {
    signals
        .iter()
        .map(|s| serde_json::to_value(s).unwrap()["event"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn progress(signals: &[BdhsSignal]) -> Vec<(usize, bool, bool)> {
    signals
        .iter()
        .filter_map(|s| match s {
            BdhsSignal::Progress { step, match_found, finalising } => Some((*step, *match_found, *finalising)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_found_when_target_vanishes() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let search = scripted(vec![Ok(miss()), Ok(hit(7)), Ok(hit(7)), Ok(miss())]);
    let (handle, rx) = BdhsExecutor::new(debugger.clone(), options(1, 2, 100), search).start().await.unwrap();

    for line in [10, 20, 30, 40] {
        mock.emit("Debugger.paused", pause(line));
    }

    let outcome = handle.wait().await.unwrap();
    let signals = drain(rx).await;

    let BdhsOutcome::Found(result) = outcome else { panic!("expected a result, got {outcome:?}") };
    assert_eq!(result.first_match_index, Some(1));
    assert_eq!(result.steps, 4);
    let lines: Vec<u32> = result.frames.iter().map(|f| f.line_number).collect();
    assert_eq!(lines, vec![41, 31, 21, 11]);
    assert!(result.frames[2].is_first_match);
    assert_eq!(result.frames.iter().filter(|f| f.is_first_match).count(), 1);
    assert_eq!(result.frames[2].heap_matches.len(), 1);
    assert_eq!(result.frames[0].column_number, 5);
    assert_eq!(result.frames[0].function_name, "step40");
    assert_eq!(result.frames[0].script_source.as_deref(), Some("function handler() {}"));
    assert_eq!(mock.sent_with("Debugger.getScriptSource").len(), 1);

    assert_eq!(names(&signals), vec!["armed", "started", "progress", "progress", "progress", "found", "completed"]);
    assert_eq!(progress(&signals), vec![(1, false, false), (2, true, false), (3, false, true)]);

    assert_eq!(mock.sent_with("Debugger.stepOut").len(), 3);
    assert_eq!(mock.sent_with("DOMDebugger.removeEventListenerBreakpoint").len(), 1);
    assert!(!debugger.is_enabled());
    assert_eq!(mock.subscriber_count("Debugger.paused"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_found_when_tolerance_runs_out() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let search = scripted(vec![Ok(hit(1)), Ok(hit(1)), Ok(hit(1)), Ok(hit(1))]);
    let (handle, rx) = BdhsExecutor::new(debugger, options(0, 1, 100), search).start().await.unwrap();

    for line in [1, 2, 3, 4] {
        mock.emit("Debugger.paused", pause(line));
    }

    let BdhsOutcome::Found(result) = handle.wait().await.unwrap() else { panic!("expected a result") };
    assert_eq!(result.steps, 3);
    assert_eq!(result.first_match_index, Some(0));
    // Window of before + after + 1 = 2 entries.
    assert_eq!(result.frames.iter().map(|f| f.line_number).collect::<Vec<_>>(), vec![4, 3]);

    let signals = drain(rx).await;
    assert_eq!(progress(&signals), vec![(1, true, false), (2, false, true)]);
}

#[tokio::test(start_paused = true)]
async fn test_step_budget_exceeded() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let (handle, rx) = BdhsExecutor::new(debugger.clone(), options(1, 1, 3), scripted(Vec::new())).start().await.unwrap();

    for line in [1, 2, 3, 4, 5] {
        mock.emit("Debugger.paused", pause(line));
    }

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, HeapscopeError::StepBudgetExceeded { step: 4, max_steps: 3 }));

    let signals = drain(rx).await;
    assert_eq!(names(&signals).last().map(String::as_str), Some("completed"));
    assert!(signals.iter().any(|s| matches!(s, BdhsSignal::MaxStepsExceeded { step: 4 })));
    assert_eq!(progress(&signals).len(), 3);
    assert!(!debugger.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_idle_run_without_target_is_not_found() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let (handle, rx) = BdhsExecutor::new(debugger, options(1, 1, 100), scripted(Vec::new())).start().await.unwrap();

    mock.emit("Debugger.paused", pause(1));

    assert!(matches!(handle.wait().await.unwrap(), BdhsOutcome::NotFound));
    let signals = drain(rx).await;
    assert_eq!(names(&signals), vec!["armed", "started", "progress", "notFound", "completed"]);
}

#[tokio::test(start_paused = true)]
async fn test_idle_run_with_target_is_found() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let search = scripted(vec![Ok(hit(3)), Ok(hit(3))]);
    let (handle, rx) = BdhsExecutor::new(debugger, options(1, 5, 100), search).start().await.unwrap();

    mock.emit("Debugger.paused", pause(1));

    let BdhsOutcome::Found(result) = handle.wait().await.unwrap() else { panic!("expected a result") };
    assert_eq!(result.frames.len(), 1);
    assert!(result.frames[0].is_first_match);
    let signals = drain(rx).await;
    assert_eq!(names(&signals), vec!["armed", "started", "progress", "found", "completed"]);
}

#[tokio::test(start_paused = true)]
async fn test_abort_resumes_and_completes() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let (mut handle, rx) = BdhsExecutor::new(debugger.clone(), options(1, 1, 100), scripted(Vec::new()))
        .start()
        .await
        .unwrap();

    assert!(handle.abort());
    assert!(!handle.abort());
    assert!(matches!(handle.wait().await.unwrap(), BdhsOutcome::Aborted));

    let signals = drain(rx).await;
    assert_eq!(names(&signals), vec!["armed", "aborted", "completed"]);
    assert_eq!(mock.sent_with("Debugger.resume").len(), 1);
    assert_eq!(mock.sent_methods().last().map(String::as_str), Some("Debugger.disable"));
    assert!(!debugger.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_jumps_to_framework_handler() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    mock.respond(
        "Debugger.evaluateOnCallFrame",
        json!({ "result": { "type": "object", "className": "HTMLButtonElement", "objectId": "target-1" } }),
    );
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "function", "objectId": "handler-1" } }));
    mock.respond("Debugger.setBreakpointOnFunctionCall", json!({ "breakpointId": "bp-handler" }));

    let debugger = Arc::new(Debugger::new(mock.clone()));
    let search = scripted(vec![Ok(hit(5)), Ok(miss())]);
    let (handle, rx) = BdhsExecutor::new(debugger, options(2, 2, 100), search).start().await.unwrap();

    for line in [1, 2, 3] {
        mock.emit("Debugger.paused", pause(line));
    }

    let BdhsOutcome::Found(result) = handle.wait().await.unwrap() else { panic!("expected a result") };
    assert_eq!(result.steps, 3);
    assert_eq!(result.first_match_index, Some(0));

    let probe = &mock.sent_with("Runtime.callFunctionOn")[0].params;
    assert_eq!(probe["objectId"], json!("target-1"));
    assert!(probe["functionDeclaration"].as_str().unwrap().contains("__reactProps$"));
    assert_eq!(
        mock.sent_with("Debugger.setBreakpointOnFunctionCall")[0].params,
        json!({ "objectId": "handler-1" })
    );
    assert_eq!(mock.sent_with("Debugger.resume").len(), 1);
    assert_eq!(mock.sent_with("Debugger.removeBreakpoint")[0].params, json!({ "breakpointId": "bp-handler" }));

    let signals = drain(rx).await;
    assert_eq!(progress(&signals), vec![(2, true, false)]);
}

#[tokio::test(start_paused = true)]
async fn test_search_failure_fails_the_run() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let search = scripted(vec![Err(HeapscopeError::config("snapshot unavailable"))]);
    let (handle, rx) = BdhsExecutor::new(debugger.clone(), options(1, 1, 100), search).start().await.unwrap();

    mock.emit("Debugger.paused", pause(1));
    mock.emit("Debugger.paused", pause(2));

    assert!(matches!(handle.wait().await, Err(HeapscopeError::Config(_))));
    let signals = drain(rx).await;
    assert_eq!(names(&signals), vec!["armed", "started", "failed", "completed"]);
    assert!(matches!(&signals[2], BdhsSignal::Failed { message } if message.contains("snapshot unavailable")));
    assert!(!debugger.is_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_single_run_per_debugger() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    let debugger = Arc::new(Debugger::new(mock.clone()));
    let (mut handle, _rx) = BdhsExecutor::new(debugger.clone(), options(1, 1, 100), scripted(Vec::new()))
        .start()
        .await
        .unwrap();

    let second = BdhsExecutor::new(debugger.clone(), options(1, 1, 100), scripted(Vec::new())).start().await;
    assert!(matches!(second, Err(HeapscopeError::Config(_))));

    assert!(handle.abort());
    handle.wait().await.unwrap();
    assert_eq!(mock.sent_with("DOMDebugger.setEventListenerBreakpoint").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_arming_failure_cleans_up() {
    ensure_test_logging(None);
    info!("Running test");

    let mock = debuggee();
    mock.fail_once("DOMDebugger.setEventListenerBreakpoint", -32601, "DOMDebugger unavailable");
    let debugger = Arc::new(Debugger::new(mock.clone()));

    let err = BdhsExecutor::new(debugger.clone(), options(1, 1, 100), scripted(Vec::new())).start().await;
    assert!(matches!(err, Err(HeapscopeError::Protocol(_))));
    assert!(!debugger.is_enabled());
    assert_eq!(mock.subscriber_count("Debugger.paused"), 0);

    // A later run can arm again.
    let (mut handle, _rx) = BdhsExecutor::new(debugger, options(1, 1, 100), scripted(Vec::new()))
        .start()
        .await
        .unwrap();
    assert!(handle.abort());
    assert!(matches!(handle.wait().await.unwrap(), BdhsOutcome::Aborted));
}
