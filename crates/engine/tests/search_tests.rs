use heapscope_common::ensure_test_logging;
use heapscope_engine::{
    materialize, search, test_utils::SnapshotBuilder, DecodedSnapshot, HeapscopeError, JsValue,
    SearchCriterion, SimilaritySpec, TextQuery, DEFAULT_MAX_DEPTH,
};
use serde_json::json;
use tracing::info;

struct Fixture {
    graph: DecodedSnapshot,
    user: usize,
    admin: usize,
    alice: usize,
    bob: usize,
}

/// window.store.user = User { name: "alice", age: 42, tags: ["x"] }
/// window.store.admin = Admin { name: "bob", age: 7 }
fn fixture() -> Fixture {
    let mut b = SnapshotBuilder::new();
    let window = b.object("Window / https://app.test");
    let store = b.object("Store");
    let user = b.object("User");
    let alice = b.string("alice");
    let age = b.number("42");
    let tags = b.object("Array");
    let tag = b.string("x");
    let admin = b.object("Admin");
    let bob = b.string("bob");
    let admin_age = b.number("7");

    b.property(window, "store", store);
    b.property(store, "user", user);
    b.property(store, "admin", admin);
    b.property(user, "name", alice);
    b.property(user, "age", age);
    b.property(user, "tags", tags);
    b.element(tags, 0, tag);
    b.property(admin, "name", bob);
    b.property(admin, "age", admin_age);

    Fixture { graph: b.decode().unwrap(), user, admin, alice, bob }
}

fn indices(graph: &DecodedSnapshot, criterion: &SearchCriterion, max: usize) -> Vec<usize> {
    search(graph, criterion, max).unwrap().into_iter().map(|hit| hit.index).collect()
}

#[test]
fn test_search_by_property() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion { property: Some(TextQuery::substring("AGE")), ..Default::default() };
    assert_eq!(indices(&f.graph, &criterion, 100), vec![f.user, f.admin]);

    let exact = SearchCriterion {
        property: Some(TextQuery::substring("AGE").case_sensitive()),
        ..Default::default()
    };
    assert!(indices(&f.graph, &exact, 100).is_empty());
}

#[test]
fn test_search_by_value_hits_strings_and_owners() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion { value: Some(TextQuery::substring("Alic")), ..Default::default() };
    assert_eq!(indices(&f.graph, &criterion, 100), vec![f.user, f.alice]);

    let numeric = SearchCriterion { value: Some(TextQuery::substring("42")), ..Default::default() };
    let hits = indices(&f.graph, &numeric, 100);
    assert!(hits.contains(&f.user));
    assert!(!hits.contains(&f.admin));
}

#[test]
fn test_search_combines_parts() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion {
        property: Some(TextQuery::substring("name")),
        value: Some(TextQuery::substring("bob")),
        class_name: Some(TextQuery::regex("^adm")),
        similarity: None,
    };
    // String nodes only answer to the value part.
    assert_eq!(indices(&f.graph, &criterion, 100), vec![f.admin, f.bob]);

    let mismatched = SearchCriterion {
        property: Some(TextQuery::substring("tags")),
        value: Some(TextQuery::substring("bob")),
        ..Default::default()
    };
    assert_eq!(indices(&f.graph, &mismatched, 100), vec![f.bob]);
}

#[test]
fn test_search_empty_patterns_are_inactive() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion {
        property: Some(TextQuery::substring("")),
        class_name: Some(TextQuery::substring("user")),
        ..Default::default()
    };
    assert_eq!(indices(&f.graph, &criterion, 100), vec![f.user]);
}

#[test]
fn test_search_respects_result_cap() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion { property: Some(TextQuery::substring("a")), ..Default::default() };
    assert_eq!(indices(&f.graph, &criterion, 1).len(), 1);
    assert!(indices(&f.graph, &criterion, 0).is_empty());
}

#[test]
fn test_search_by_similarity() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let reference = r#"{"name":"alice","age":42,"tags":["x"]}"#;
    let criterion = SearchCriterion {
        similarity: Some(SimilaritySpec::from_json_text(reference, 0.95, 0.0, false).unwrap()),
        ..Default::default()
    };

    let hits = search(&f.graph, &criterion, 100).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].index, f.user);
    assert_eq!(hits[0].similarity, Some(1.0));
    assert!(hits[0].inspected.is_some());
}

#[test]
fn test_search_rejects_invalid_criteria() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let regex = SearchCriterion { value: Some(TextQuery::regex("(unclosed")), ..Default::default() };
    assert!(matches!(search(&f.graph, &regex, 10), Err(HeapscopeError::InvalidPattern { .. })));

    assert!(matches!(
        SimilaritySpec::from_json_text("{ nope", 0.5, 0.5, false),
        Err(HeapscopeError::SimilaritySpec(_))
    ));

    let threshold = SearchCriterion {
        similarity: Some(SimilaritySpec { reference: json!({}), threshold: 1.5, alpha: 0.5, include_values: false }),
        ..Default::default()
    };
    assert!(matches!(search(&f.graph, &threshold, 10), Err(HeapscopeError::SimilaritySpec(_))));
}

#[test]
fn test_criterion_deserializes_from_camel_case() {
    ensure_test_logging(None);
    info!("Running test");

    let criterion: SearchCriterion = serde_json::from_value(json!({
        "className": { "pattern": "User", "caseSensitive": true },
        "value": { "pattern": "^al", "regex": true }
    }))
    .unwrap();
    assert_eq!(criterion.class_name, Some(TextQuery::substring("User").case_sensitive()));
    assert_eq!(criterion.value, Some(TextQuery::regex("^al")));

    let f = fixture();
    assert_eq!(indices(&f.graph, &criterion, 100), vec![f.user, f.alice]);
}

#[test]
fn test_materialize_results() {
    ensure_test_logging(None);
    info!("Running test");

    let f = fixture();
    let criterion = SearchCriterion { class_name: Some(TextQuery::substring("admin")), ..Default::default() };
    let hits = search(&f.graph, &criterion, 10).unwrap();
    let items = materialize(&f.graph, hits, DEFAULT_MAX_DEPTH);

    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.class_name, "Admin");
    assert_eq!(item.path.as_deref(), Some("window.store.admin"));
    assert_eq!(item.node_id, f.graph.node(f.admin).unwrap().stable_id);
    assert_eq!(item.similarity, None);
    assert!(item.value.same_value(&JsValue::from_json_str(r#"{"name":"bob","age":7}"#).unwrap()));

    let payload = serde_json::to_value(item).unwrap();
    assert_eq!(payload["className"], json!("Admin"));
    assert_eq!(payload["classAnnotations"][0]["class"], json!("Admin"));
    assert_eq!(payload["value"]["age"], json!(7));
}
