use std::{sync::Arc, time::Duration};

use heapscope_common::{
    ensure_test_logging,
    types::{Breakpoint, ScriptLocation},
};
use heapscope_engine::{Debugger, DebuggerEvent, HeapscopeError, MockTransport, ProtocolError};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};
use tracing::info;

fn debugger() -> (Arc<MockTransport>, Debugger<MockTransport>) {
    let mock = Arc::new(MockTransport::new());
    let debugger = Debugger::with_vendor_patterns(mock.clone(), vec!["react".to_string(), "vue".to_string()]);
    (mock, debugger)
}

#[tokio::test]
async fn test_handlers_are_frozen_while_enabled() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    let (tx, _rx) = mpsc::unbounded_channel();
    debugger.on(DebuggerEvent::Paused, tx.clone()).unwrap();

    debugger.enable().await.unwrap();
    assert!(debugger.is_enabled());
    assert_eq!(mock.subscriber_count("Debugger.paused"), 1);
    assert!(matches!(debugger.on(DebuggerEvent::Resumed, tx), Err(HeapscopeError::Config(_))));
    assert!(matches!(debugger.off(DebuggerEvent::Paused), Err(HeapscopeError::Config(_))));

    debugger.disable().await.unwrap();
    assert!(!debugger.is_enabled());
    assert_eq!(mock.subscriber_count("Debugger.paused"), 0);
    assert_eq!(mock.subscriber_count("Debugger.scriptParsed"), 0);
    debugger.off(DebuggerEvent::Paused).unwrap();
}

#[tokio::test]
async fn test_enable_is_idempotent() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    debugger.enable().await.unwrap();
    debugger.enable().await.unwrap();
    debugger.pause().await.unwrap();

    assert_eq!(mock.sent_methods(), vec!["Debugger.enable", "Debugger.pause"]);
    assert_eq!(mock.subscriber_count("Debugger.scriptParsed"), 1);
}

#[tokio::test]
async fn test_enable_failure_rolls_back() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    let (tx, _rx) = mpsc::unbounded_channel();
    debugger.on(DebuggerEvent::Paused, tx).unwrap();
    mock.fail_once("Debugger.enable", -32000, "not allowed");

    let err = debugger.enable().await.unwrap_err();
    assert!(matches!(err, HeapscopeError::Protocol(ProtocolError::Command { .. })));
    assert!(!debugger.is_enabled());
    assert_eq!(mock.subscriber_count("Debugger.paused"), 0);

    debugger.enable().await.unwrap();
    assert!(debugger.is_enabled());
}

#[tokio::test]
async fn test_vendor_scripts_are_blackboxed() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    let (tx, mut rx) = mpsc::unbounded_channel();
    debugger.on(DebuggerEvent::ScriptParsed, tx).unwrap();
    debugger.enable().await.unwrap();

    for (id, url) in [
        ("1", "https://app.test/main.js"),
        ("2", "https://cdn.test/react-dom.production.min.js"),
        ("3", "https://cdn.test/vue.global.js"),
        ("4", "https://cdn.test/react-dom.production.min.js"),
    ] {
        mock.emit("Debugger.scriptParsed", json!({ "scriptId": id, "url": url }));
    }
    for _ in 0..4 {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    }

    let updates = mock.sent_with("Debugger.setBlackboxPatterns");
    assert_eq!(updates.len(), 2);
    assert_eq!(
        updates[1].params["patterns"],
        json!([
            r"^https://cdn\.test/react\-dom\.production\.min\.js$",
            r"^https://cdn\.test/vue\.global\.js$"
        ])
    );
    assert_eq!(debugger.blackbox_patterns().len(), 2);

    let scripts = debugger.parsed_scripts();
    assert_eq!(scripts.iter().map(|s| s.script_id.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3", "4"]);
    assert_eq!(debugger.script_url("3").as_deref(), Some("https://cdn.test/vue.global.js"));
}

#[tokio::test]
async fn test_script_source_is_cached() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    mock.respond_once("Debugger.getScriptSource", json!({ "scriptSource": "let a = 1;" }));

    assert_eq!(debugger.script_source("7").await.unwrap(), "let a = 1;");
    assert_eq!(debugger.script_source("7").await.unwrap(), "let a = 1;");
    assert_eq!(mock.sent_with("Debugger.getScriptSource").len(), 1);

    // The default `{}` reply has no source.
    let err = debugger.script_source("8").await.unwrap_err();
    assert!(matches!(err, HeapscopeError::Protocol(ProtocolError::UnexpectedResponse { .. })));
}

#[tokio::test]
async fn test_set_breakpoint_params() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    mock.respond("Debugger.setBreakpoint", json!({ "breakpointId": "bp-1" }));

    let breakpoint = Breakpoint::new(ScriptLocation::new("12", 4, Some(2)), Some("x > 1".to_string()));
    assert_eq!(debugger.set_breakpoint(&breakpoint).await.unwrap(), "bp-1");

    let plain = Breakpoint::new(ScriptLocation::new("12", 8, None), None);
    debugger.set_breakpoint(&plain).await.unwrap();

    let sent = mock.sent_with("Debugger.setBreakpoint");
    assert_eq!(
        sent[0].params,
        json!({
            "location": { "scriptId": "12", "lineNumber": 4, "columnNumber": 2 },
            "condition": "x > 1"
        })
    );
    assert_eq!(sent[1].params, json!({ "location": { "scriptId": "12", "lineNumber": 8 } }));

    debugger.remove_breakpoint("bp-1").await.unwrap();
    assert_eq!(mock.sent_with("Debugger.removeBreakpoint")[0].params, json!({ "breakpointId": "bp-1" }));
}

#[tokio::test]
async fn test_dom_click_breakpoint_enables_first() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    debugger.set_dom_click_breakpoint(true).await.unwrap();
    debugger.set_dom_click_breakpoint(false).await.unwrap();

    assert_eq!(
        mock.sent_methods(),
        vec![
            "Debugger.enable",
            "DOMDebugger.setEventListenerBreakpoint",
            "DOMDebugger.removeEventListenerBreakpoint"
        ]
    );
    assert_eq!(
        mock.sent_with("DOMDebugger.setEventListenerBreakpoint")[0].params,
        json!({ "eventName": "click", "targetName": "*" })
    );
}

#[tokio::test]
async fn test_stepping_and_evaluation() {
    ensure_test_logging(None);
    info!("Running test");

    let (mock, debugger) = debugger();
    mock.respond(
        "Debugger.evaluateOnCallFrame",
        json!({ "result": { "type": "object", "className": "HTMLButtonElement", "objectId": "obj-1" } }),
    );
    mock.respond("Runtime.callFunctionOn", json!({ "result": { "type": "function", "objectId": "fn-1" } }));

    let target = debugger.evaluate_on_call_frame("frame-0", "event.target").await.unwrap();
    assert_eq!(target.class_name.as_deref(), Some("HTMLButtonElement"));
    let handler = debugger.call_function_on("obj-1", "function() { return this; }", false).await.unwrap();
    assert_eq!(handler.object_id.as_deref(), Some("fn-1"));

    debugger.step_into().await.unwrap();
    debugger.step_over().await.unwrap();
    debugger.step_out().await.unwrap();
    debugger.resume().await.unwrap();

    assert_eq!(
        mock.sent_methods()[2..],
        ["Debugger.stepInto", "Debugger.stepOver", "Debugger.stepOut", "Debugger.resume"]
    );
}
