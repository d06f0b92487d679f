#![allow(dead_code)]

use chrono::{Days, NaiveDate};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

pub fn arb_counter() -> impl Strategy<Value = Value> {
    (0u64..1_000_000).prop_map(Value::from)
}

pub fn arb_keyed_map() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]{1,2}", 0i64..5, 0..8).prop_map(|entries| {
        Value::Object(
            entries
                .into_iter()
                .map(|(id, level)| (id, json!({"level": level})))
                .collect(),
        )
    })
}

pub fn arb_keyed_list() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(0u8..12, "[a-z]{0,4}", 0..8).prop_map(|entries| {
        Value::Array(
            entries
                .into_iter()
                .map(|(id, name)| json!({"id": id, "name": name}))
                .collect(),
        )
    })
}

/// Transcript with unique ids; timestamps may collide.
pub fn arb_transcript() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(0u8..16, 0u32..40, 0..10).prop_map(|messages| {
        Value::Array(
            messages
                .into_iter()
                .map(|(id, timestamp)| json!({"id": id, "timestamp": timestamp}))
                .collect(),
        )
    })
}

/// Transcript whose message for a given id always has the same timestamp,
/// as if both devices hold copies of one conversation.
pub fn arb_shared_transcript() -> impl Strategy<Value = Value> {
    prop::collection::btree_set(0u8..16, 0..10).prop_map(|ids| {
        Value::Array(
            ids.into_iter()
                .map(|id| json!({"id": id, "timestamp": u32::from(id) * 7 % 23}))
                .collect(),
        )
    })
}

pub fn arb_text() -> impl Strategy<Value = Value> {
    "[a-zñ ]{0,24}".prop_map(Value::from)
}

pub fn arb_lessons() -> impl Strategy<Value = Value> {
    prop::collection::vec(prop_oneof![
        (0u8..10).prop_map(|n| Value::from(format!("lesson-{n}"))),
        (0u8..10).prop_map(Value::from),
    ], 0..10)
    .prop_map(Value::Array)
}

pub fn arb_date() -> impl Strategy<Value = String> {
    (0u64..60).prop_map(|offset| {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        start
            .checked_add_days(Days::new(offset))
            .expect("in range")
            .format("%Y-%m-%d")
            .to_string()
    })
}

pub fn arb_calendar() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(arb_date(), any::<bool>(), 0..20).prop_map(|days| {
        Value::Object(days.into_iter().map(|(d, done)| (d, Value::Bool(done))).collect())
    })
}

fn arb_stat() -> impl Strategy<Value = Value> {
    prop::option::of(0i64..500).prop_map(|n| n.map_or(Value::Null, Value::from))
}

pub fn arb_stats() -> impl Strategy<Value = Value> {
    (
        prop::collection::btree_map(prop_oneof![
            Just("vocabularyCount".to_string()),
            Just("streakDays".to_string()),
            Just("masteredPoints".to_string()),
        ], arb_stat(), 0..3),
        prop::option::of(prop::collection::btree_map("[a-c]", arb_stat(), 0..3)),
    )
        .prop_map(|(flat, levels)| {
            let mut object: Map<String, Value> = flat.into_iter().collect();
            if let Some(levels) = levels {
                object.insert("levels".to_string(), Value::Object(levels.into_iter().collect()));
            }
            Value::Object(object)
        })
}

/// A full `data` payload touching every record type.
pub fn arb_payload() -> impl Strategy<Value = BTreeMap<String, Value>> {
    (
        prop::option::of(arb_counter()),
        prop::option::of(arb_keyed_map()),
        prop::option::of(arb_shared_transcript()),
        prop::option::of(arb_text()),
        prop::option::of(arb_lessons()),
        prop::option::of(arb_calendar()),
        prop::option::of(arb_stats()),
    )
        .prop_map(|(practice, contacts, chat, notes, lessons, calendar, stats)| {
            [
                ("practiceSeconds", practice),
                ("contacts", contacts),
                ("chat.maria", chat),
                ("notes", notes),
                ("completedLessons", lessons),
                ("calendar", calendar),
                ("progressStats", stats),
            ]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect()
        })
}
