//! End-to-end behavior of the store through its public API.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use sourcetree_core::{
    normalize_key, normalize_segment, ProviderContext, ProviderRegistry, ProviderSettings,
    ProviderType, SourceProvider, SourceStore, SourceValue,
};


struct Recorder {
    writes: Rc<RefCell<Vec<(String, Value)>>>,
}

impl SourceProvider for Recorder {
    fn write_from_user(&self, key: &str, value: Value) {
        self.writes.borrow_mut().push((key.to_string(), value));
    }
}

fn registry_with_recorder(
    store: &SourceStore,
    name: &str,
) -> (Rc<ProviderRegistry>, Rc<RefCell<Vec<(String, Value)>>>) {
    let writes = Rc::new(RefCell::new(Vec::new()));
    let registry = ProviderRegistry::new(store.clone());
    let shared = writes.clone();
    registry.add_provider_type(ProviderType::new("recorder", move |_ctx: ProviderContext| {
        let provider: Rc<dyn SourceProvider> = Rc::new(Recorder { writes: shared.clone() });
        Ok(provider)
    }));
    registry
        .add_provider("recorder", Some(name), ProviderSettings::new())
        .unwrap();
    (registry, writes)
}


#[test]
fn normalization_is_idempotent() {
    for key in ["/a/ B /c", " ??/ .A", "//", "Ünïcode/ İx ", "-_/x y", "", "/"] {
        let once = normalize_key(key);
        assert_eq!(normalize_key(&once), once, "key {:?}", key);
        assert_eq!(once.split('/').count(), key.split('/').count());
    }
    assert_eq!(normalize_segment("  Hello, World!  "), "helloworld");
    assert_eq!(normalize_key("/A?/ b "), "/a/b");
}

#[test]
fn composite_reads_follow_the_latest_batch() {
    let store = SourceStore::new();
    store.sources_changed("P", [("/a/b/c", json!(true)), ("/a/b/d", json!(1))]);

    let b = store.get_source("P", "/a").and_then(|a| a.get("b")).unwrap();
    assert_eq!(b.get("c"), Some(SourceValue::Leaf(json!(true))));
    assert_eq!(b.get("d"), Some(SourceValue::Leaf(json!(1))));

    store.sources_changed("P", [("/A/B/C", json!(false))]);
    assert_eq!(b.get("c"), Some(SourceValue::Leaf(json!(false))));
}

#[test]
fn write_back_reaches_provider_with_supplied_key() {
    let store = SourceStore::new();
    let (_registry, writes) = registry_with_recorder(&store, "P");
    store.sources_changed("P", [("/a/b/c", json!(true)), ("/a/b/d", json!(1))]);

    let b = store.get_source("P", "/a/b").unwrap();
    assert!(b.as_binding().unwrap().set("d", json!(7)));
    assert_eq!(*writes.borrow(), vec![("/a/b/d".to_string(), json!(7))]);
    assert_eq!(b.get("d"), Some(SourceValue::Leaf(json!(1))));
}

#[test]
fn end_to_end_notifications() {
    let store = SourceStore::new();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    store.subscribe(
        "P",
        "/x",
        move |value, subscribed, changed| {
            log.borrow_mut().push((
                value.map(|v| v.to_json()),
                subscribed.to_string(),
                changed.to_string(),
            ));
        },
        false,
    );

    store.sources_changed("P", [("/x", json!(1))]);
    store.sources_changed("P", [("/x/y", json!(true))]);
    store.sources_removed("P", ["/x/y"]);

    assert_eq!(
        *calls.borrow(),
        vec![
            (Some(json!(1)), "/x".to_string(), "/x".to_string()),
            (Some(json!({ "y": true })), "/x".to_string(), "/x/y".to_string()),
            (None, "/x".to_string(), "/x".to_string()),
        ]
    );
    // Still supplied, so `/x` survives the removal as a leaf again.
    assert_eq!(store.get_source("P", "/x"), Some(SourceValue::Leaf(json!(1))));
}

#[test]
fn pruning_holds_after_every_batch() {
    let store = SourceStore::new();
    let batches: Vec<(Vec<(&str, Value)>, Vec<&str>)> = vec![
        (vec![("/a/b/c", json!(1)), ("/a/d", json!(2))], vec![]),
        (vec![], vec!["/a/b/c"]),
        (vec![("/a/b", json!(3)), ("/e/f/g", json!(4))], vec!["/a/d"]),
        (vec![], vec!["/e/f/g", "/a/b", "/missing"]),
    ];
    for (changed, removed) in batches {
        store.sources_changed("P", changed);
        store.sources_removed("P", removed);
        let root = store.get_raw_sources("P").unwrap();
        assert!(root.satisfies_pruning_invariant());
    }
    assert!(!store.get_raw_sources("P").unwrap().has_children());
}

#[test]
fn removing_provider_through_registry() {
    let store = SourceStore::new();
    let (registry, _writes) = registry_with_recorder(&store, "P");
    store.sources_changed("P", [("/a", json!(1))]);

    let removed = Rc::new(RefCell::new(Vec::new()));
    let log = removed.clone();
    store.subscribe_all("P", move |value, path| log.borrow_mut().push((value.is_none(), path.to_string())), false);

    registry.remove_provider("P").unwrap();
    assert_eq!(*removed.borrow(), vec![(true, "/a".to_string())]);
    assert!(store.get_sources("P").is_none());
}
