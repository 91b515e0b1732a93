//! Facade laws checked over generated documents and paths.

use std::sync::Arc;

use larder_core::StoreId;
use larder_engine::{CacheOptions, HybridCache, JsonValue, KeyPath};
use larder_storage::VolatileBackend;
use larder_test_utils::generators::*;
use proptest::prelude::*;

fn cache() -> HybridCache {
    HybridCache::with_backend(
        Arc::new(VolatileBackend::new(StoreId::new("props"))),
        CacheOptions::new(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn set_then_get_returns_the_value(path in arb_field_path(), value in arb_json_document()) {
        let cache = cache();
        cache.set_sync(KeyPath::from(path.clone()), &value, None).unwrap();
        let found = cache.get_sync(KeyPath::from(path), None).unwrap().unwrap();
        prop_assert_eq!(found.value, value);
        prop_assert!(!found.is_expired);
    }

    #[test]
    fn unset_then_get_finds_nothing(path in arb_field_path(), value in arb_json_document()) {
        let cache = cache();
        cache.set_sync(KeyPath::from(path.clone()), &value, None).unwrap();
        prop_assert!(cache.unset_sync(KeyPath::from(path.clone())).unwrap());
        prop_assert!(cache.get_sync(KeyPath::from(path), None).unwrap().is_none());
    }

    #[test]
    fn unsetting_every_field_removes_the_root(root in arb_field_name(), doc in arb_json_object()) {
        let cache = cache();
        cache.set_sync(root.as_str(), &doc, None).unwrap();

        let fields: Vec<String> = doc.as_object().unwrap().keys().cloned().collect();
        for field in fields {
            cache.unset_sync(vec![root.clone(), field]).unwrap();
        }
        prop_assert!(!cache.has_sync(root.as_str()).unwrap());
        prop_assert!(cache.is_empty());
    }

    #[test]
    fn array_unset_keeps_length(
        items in prop::collection::vec(arb_json_leaf(), 1..8),
        pick in any::<prop::sample::Index>(),
    ) {
        let cache = cache();
        cache.set_sync("items", &items, None).unwrap();
        let index = pick.index(items.len());

        cache.unset_sync(format!("items[{}]", index)).unwrap();
        let after = cache.get_sync("items", None).unwrap().unwrap().value;
        let after = after.as_array().unwrap();
        prop_assert_eq!(after.len(), items.len());
        prop_assert_eq!(&after[index], &JsonValue::Null);
    }

    #[test]
    fn siblings_survive_a_nested_set(
        root in arb_field_name(),
        doc in arb_json_object(),
        field in "[A-Z]{1,4}",
        value in arb_json_leaf(),
    ) {
        let cache = cache();
        cache.set_sync(root.as_str(), &doc, None).unwrap();
        cache.set_sync(vec![root.clone(), field.clone()], &value, None).unwrap();

        let stored = cache.get_sync(root.as_str(), None).unwrap().unwrap().value;
        for (key, original) in doc.as_object().unwrap() {
            prop_assert_eq!(&stored[key.as_str()], original);
        }
        prop_assert_eq!(&stored[field.as_str()], &value);
    }
}
