//! Property tests for attribute sets as aggregation keys.
//!
//! - Construction order does not matter for equality, hashing or lookups
//! - Bound and unbound recording produce the same series totals

use std::collections::HashSet;
use std::sync::Arc;

use nebula_metrics::{AttributeSet, AttributeValue, InMemoryPipeline, KeyValue, Meter, Number};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_value() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{0,6}".prop_map(AttributeValue::from),
        any::<bool>().prop_map(AttributeValue::from),
        any::<i64>().prop_map(AttributeValue::from),
        (-1.0e6..1.0e6_f64).prop_map(AttributeValue::from),
    ]
}

/// Distinct keys with arbitrary values.
fn arb_pairs() -> impl Strategy<Value = Vec<(String, AttributeValue)>> {
    prop::collection::btree_map("[a-z]{1,4}", arb_value(), 0..8)
        .prop_map(|map| map.into_iter().collect())
}

fn to_set(pairs: &[(String, AttributeValue)]) -> AttributeSet {
    pairs
        .iter()
        .map(|(k, v)| KeyValue::new(k.as_str(), v.clone()))
        .collect()
}

proptest! {
    #[test]
    fn order_does_not_matter(
        (pairs, shuffled) in arb_pairs().prop_flat_map(|pairs| {
            let shuffled = Just(pairs.clone()).prop_shuffle();
            (Just(pairs), shuffled)
        })
    ) {
        let a = to_set(&pairs);
        let b = to_set(&shuffled);

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.to_string(), b.to_string());

        let mut keys = HashSet::new();
        keys.insert(a.clone());
        prop_assert!(keys.contains(&b));

        for (key, value) in &pairs {
            prop_assert_eq!(b.get(key), Some(value));
        }
    }

    #[test]
    fn builder_last_put_wins(
        key in "[a-z]{1,4}",
        first in arb_value(),
        last in arb_value(),
    ) {
        let set = AttributeSet::builder()
            .put(key.as_str(), first)
            .put(key.as_str(), last.clone())
            .build();
        prop_assert_eq!(set.len(), 1);
        prop_assert_eq!(set.get(&key), Some(&last));
    }

    #[test]
    fn bound_and_unbound_totals_agree(
        pairs in arb_pairs(),
        increments in prop::collection::vec(0_i64..1_000, 1..20),
    ) {
        let attrs = to_set(&pairs);

        let unbound_pipeline = Arc::new(InMemoryPipeline::new());
        let unbound = Meter::new("prop", unbound_pipeline.clone()).counter("prop.total").build();
        for value in &increments {
            unbound.add_with_attributes(*value, &attrs);
        }

        let bound_pipeline = Arc::new(InMemoryPipeline::new());
        let bound = Meter::new("prop", bound_pipeline.clone())
            .counter("prop.total")
            .build()
            .bind(attrs.clone());
        for value in &increments {
            bound.add(*value);
        }

        let expected = Some(Number::Long(increments.iter().sum()));
        prop_assert_eq!(unbound_pipeline.sum("prop", "prop.total", &attrs), expected);
        prop_assert_eq!(bound_pipeline.sum("prop", "prop.total", &attrs), expected);
    }
}
