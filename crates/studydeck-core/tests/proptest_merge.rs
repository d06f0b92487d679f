use proptest::prelude::*;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

use studydeck_core::catalog::Catalog;
use studydeck_core::merge::{MergeRule, merge_snapshot};
use studydeck_core::snapshot::{Snapshot, SnapshotMeta};
use studydeck_core::store::MemoryStore;

#[path = "generators.rs"]
mod generators;
use generators::*;

fn merge(rule: MergeRule, local: &Value, incoming: &Value) -> Value {
    rule.apply(Some(local), incoming).expect("generated values are well formed")
}

fn ids(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => items.iter().map(|item| item["id"].to_string()).collect(),
        _ => Vec::new(),
    }
}

fn snapshot(data: std::collections::BTreeMap<String, Value>) -> Snapshot {
    Snapshot {
        meta: SnapshotMeta::current("prop", chrono::DateTime::from_timestamp(0, 0).expect("epoch")),
        data,
    }
}

fn assert_idempotent(rule: MergeRule, local: &Value, incoming: &Value) -> Result<(), TestCaseError> {
    let once = merge(rule, local, incoming);
    let twice = merge(rule, &once, incoming);
    prop_assert_eq!(&twice, &once, "{} is not idempotent", rule.name());
    prop_assert_eq!(&merge(rule, local, local), local, "{} self-merge changed value", rule.name());
    Ok(())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    // -----------------------------------------------------------------------
    // Idempotence
    // -----------------------------------------------------------------------

    #[test]
    fn counter_idempotent(a in arb_counter(), b in arb_counter()) {
        assert_idempotent(MergeRule::Counter, &a, &b)?;
    }

    #[test]
    fn keyed_map_idempotent(a in arb_keyed_map(), b in arb_keyed_map()) {
        assert_idempotent(MergeRule::KeyedUnion, &a, &b)?;
    }

    #[test]
    fn keyed_list_idempotent(a in arb_keyed_list(), b in arb_keyed_list()) {
        assert_idempotent(MergeRule::KeyedUnion, &a, &b)?;
    }

    #[test]
    fn transcript_idempotent(a in arb_transcript(), b in arb_transcript()) {
        assert_idempotent(MergeRule::Transcript, &a, &b)?;
    }

    #[test]
    fn text_idempotent(a in arb_text(), b in arb_text()) {
        assert_idempotent(MergeRule::LongestText, &a, &b)?;
    }

    #[test]
    fn set_idempotent(a in arb_lessons(), b in arb_lessons()) {
        assert_idempotent(MergeRule::SetUnion, &a, &b)?;
    }

    #[test]
    fn calendar_idempotent(a in arb_calendar(), b in arb_calendar()) {
        assert_idempotent(MergeRule::DateFlags, &a, &b)?;
    }

    #[test]
    fn stats_idempotent(a in arb_stats(), b in arb_stats()) {
        assert_idempotent(MergeRule::FieldwiseMax, &a, &b)?;
    }

    #[test]
    fn store_merge_twice_equals_once(local in arb_payload(), incoming in arb_payload()) {
        let store = MemoryStore::with_records(local);
        let doc = snapshot(incoming);
        let catalog = Catalog::standard();

        merge_snapshot(&store, &catalog, &doc).expect("first merge");
        let once = store.dump();
        let report = merge_snapshot(&store, &catalog, &doc).expect("second merge");

        prop_assert_eq!(store.dump(), once);
        prop_assert!(report.is_noop());
    }

    #[test]
    fn exported_payload_merges_as_noop(local in arb_payload()) {
        let store = MemoryStore::with_records(local.clone());
        let report = merge_snapshot(&store, &Catalog::standard(), &snapshot(local.clone()))
            .expect("merge");
        prop_assert!(report.is_noop());
        prop_assert_eq!(store.dump(), local);
    }

    // -----------------------------------------------------------------------
    // Monotonicity
    // -----------------------------------------------------------------------

    #[test]
    fn counter_never_decreases(a in arb_counter(), b in arb_counter()) {
        let merged = merge(MergeRule::Counter, &a, &b).as_u64().expect("integer");
        let floor = a.as_u64().expect("integer").max(b.as_u64().expect("integer"));
        prop_assert_eq!(merged, floor);
    }

    #[test]
    fn stats_never_decrease(a in arb_stats(), b in arb_stats()) {
        let merged = merge(MergeRule::FieldwiseMax, &a, &b);
        for side in [&a, &b] {
            for (field, value) in side.as_object().expect("object") {
                if let Some(n) = value.as_i64() {
                    prop_assert!(merged[field].as_i64().expect("number kept") >= n);
                }
            }
        }
    }

    #[test]
    fn completed_days_stay_completed(a in arb_calendar(), b in arb_calendar()) {
        let merged = merge(MergeRule::DateFlags, &a, &b);
        for side in [&a, &b] {
            for (date, done) in side.as_object().expect("object") {
                if done.as_bool() == Some(true) {
                    prop_assert_eq!(&merged[date], &Value::Bool(true));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // No duplication
    // -----------------------------------------------------------------------

    #[test]
    fn keyed_ids_are_exact_union(a in arb_keyed_list(), b in arb_keyed_list()) {
        let merged = ids(&merge(MergeRule::KeyedUnion, &a, &b));
        let unique: HashSet<&String> = merged.iter().collect();
        prop_assert_eq!(unique.len(), merged.len());

        let expected: BTreeSet<String> = ids(&a).into_iter().chain(ids(&b)).collect();
        prop_assert_eq!(merged.into_iter().collect::<BTreeSet<_>>(), expected);
    }

    #[test]
    fn transcript_ids_are_exact_union_in_time_order(a in arb_transcript(), b in arb_transcript()) {
        let merged = merge(MergeRule::Transcript, &a, &b);
        let merged_ids = ids(&merged);
        let unique: HashSet<&String> = merged_ids.iter().collect();
        prop_assert_eq!(unique.len(), merged_ids.len());

        let expected: BTreeSet<String> = ids(&a).into_iter().chain(ids(&b)).collect();
        prop_assert_eq!(merged_ids.iter().cloned().collect::<BTreeSet<_>>(), expected.clone());

        let introduced_new = expected.len() > ids(&a).len();
        if introduced_new {
            let times: Vec<u64> = merged
                .as_array()
                .expect("array")
                .iter()
                .map(|m| m["timestamp"].as_u64().expect("timestamp"))
                .collect();
            prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn set_union_has_no_repeats(a in arb_lessons(), b in arb_lessons()) {
        let merged = merge(MergeRule::SetUnion, &a, &b);
        let items = merged.as_array().expect("array");
        let all: BTreeSet<String> = a.as_array().expect("array").iter()
            .chain(b.as_array().expect("array"))
            .map(ToString::to_string)
            .collect();
        let seen: BTreeSet<String> = items.iter().map(ToString::to_string).collect();
        prop_assert_eq!(&seen, &all);
        // Local duplicates are kept as-is; only incoming ones are dropped.
        let local_len = a.as_array().expect("array").len();
        let local_unique: BTreeSet<String> =
            a.as_array().expect("array").iter().map(ToString::to_string).collect();
        prop_assert_eq!(items.len(), local_len + (all.len() - local_unique.len()));
    }
}
