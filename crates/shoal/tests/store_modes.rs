// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Store-mode family, CAS discipline, pessimistic locks, and arithmetic.

use serde::{Deserialize, Serialize};
use shoal::testing::MemoryEngine;
use shoal::{
    to_value, ErrorKind, KvResult, OperationOptions, Session, SessionConfig, StatusCode, StoreMode,
    Value, FMT_PACKED, FMT_UTF8,
};

fn connect() -> (Session, MemoryEngine) {
    let engine = MemoryEngine::new();
    let handle = engine.clone();
    let session = Session::connect(Box::new(engine), SessionConfig::default()).expect("connect");
    (session, handle)
}

fn utf8_options() -> OperationOptions {
    OperationOptions {
        format: Some(FMT_UTF8),
        ..OperationOptions::default()
    }
}

#[test]
fn set_get_round_trip_with_default_json_format() {
    let (session, _engine) = connect();
    let stored = session
        .set("doc", Value::Map(vec![(Value::Text("n".into()), Value::Integer(3))]),
             &OperationOptions::default())
        .expect("set");
    assert!(stored.success());
    assert_ne!(stored.cas, 0);

    let fetched = session.get("doc", &OperationOptions::default()).expect("get");
    assert_eq!(fetched.value.as_ref().and_then(|v| v.get("n")), Some(&Value::Integer(3)));
    assert_eq!(fetched.cas, stored.cas);
}

#[test]
fn add_fails_on_existing_and_replace_fails_on_missing() {
    let (session, _engine) = connect();
    session.set("k", "v", &utf8_options()).expect("set");

    let err = session.add("k", "other", &utf8_options()).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::KEY_EXISTS));

    let err = session
        .replace("absent", "x", &utf8_options())
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::KEY_NOT_FOUND));

    session.replace("k", "w", &utf8_options()).expect("replace");
    let back = session.get("k", &OperationOptions::default()).expect("get");
    assert_eq!(back.value, Some(Value::Text("w".into())));
}

#[test]
fn append_and_prepend_concatenate_raw_bytes() {
    let (session, engine) = connect();
    session.set("k", "mid", &utf8_options()).expect("set");
    session.append("k", "-end", &utf8_options()).expect("append");
    session.prepend("k", "start-", &utf8_options()).expect("prepend");

    let (raw, flags) = engine.raw("k").expect("stored");
    assert_eq!(raw, b"start-mid-end");
    assert_eq!(flags, FMT_UTF8, "concatenation keeps the original flags");

    let err = session.append("absent", "x", &utf8_options()).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_STORED));
}

#[test]
fn stale_cas_is_rejected() {
    let (session, _engine) = connect();
    let first = session.set("k", "v1", &utf8_options()).expect("set");
    session.set("k", "v2", &utf8_options()).expect("set again");

    let stale = OperationOptions {
        format: Some(FMT_UTF8),
        cas: first.cas,
        ..OperationOptions::default()
    };
    let err = session.set("k", "v3", &stale).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::KEY_EXISTS));
}

#[test]
fn lock_blocks_writers_until_unlock() {
    let (session, _engine) = connect();
    session.set("k", "v", &utf8_options()).expect("set");

    let locked = session.lock("k", 15).expect("lock");
    assert_eq!(locked.value, Some(Value::Text("v".into())));

    let err = session.set("k", "w", &utf8_options()).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::LOCKED));

    // A second lock attempt fails while held.
    let err = session.lock("k", 15).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::LOCKED));

    // Unlock with the wrong CAS is a temporary failure.
    let err = session.unlock("k", locked.cas + 1).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::TEMP_FAIL));

    session.unlock("k", locked.cas).expect("unlock");
    session.set("k", "w", &utf8_options()).expect("set after unlock");

    let err = session.unlock("k", 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arguments, "unlock requires a CAS");
}

#[test]
fn storing_with_a_matching_cas_releases_the_lock() {
    let (session, _engine) = connect();
    session.set("k", "v", &utf8_options()).expect("set");
    let locked = session.lock("k", 15).expect("lock");

    let with_cas = OperationOptions {
        format: Some(FMT_UTF8),
        cas: locked.cas,
        ..OperationOptions::default()
    };
    session.set("k", "w", &with_cas).expect("cas store unlocks");
    session.set("k", "x", &utf8_options()).expect("plain store works again");
}

#[test]
fn counters_create_adjust_and_floor_at_zero() {
    let (session, _engine) = connect();

    let err = session.incr("n", 1, None).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::KEY_NOT_FOUND));

    let created = session.incr("n", 1, Some(10)).expect("create");
    assert_eq!(created.value, Some(Value::Integer(10)));

    let bumped = session.incr("n", 5, None).expect("incr");
    assert_eq!(bumped.value, Some(Value::Integer(15)));

    let dropped = session.decr("n", 100, None).expect("decr floors");
    assert_eq!(dropped.value, Some(Value::Integer(0)));
}

#[test]
fn arithmetic_on_non_numeric_value_reports_delta_badval() {
    let (session, _engine) = connect();
    session.set("k", "not a number", &utf8_options()).expect("set");
    let err = session.incr("k", 1, None).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::DELTA_BAD_VALUE));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Widget {
    name: String,
    sizes: Vec<u32>,
}

#[test]
fn typed_values_round_trip_through_the_packed_format() {
    let (session, _engine) = connect();
    let widget = Widget {
        name: "anchor".into(),
        sizes: vec![1, 2, 3],
    };
    let packed = OperationOptions {
        format: Some(FMT_PACKED),
        ..OperationOptions::default()
    };
    let value = to_value(&widget).expect("to_value");
    session.set("w", value, &packed).expect("set");

    let fetched = session.get("w", &OperationOptions::default()).expect("get");
    assert_eq!(fetched.flags, FMT_PACKED);
    let back: Widget = fetched.value_as().expect("typed decode");
    assert_eq!(back, widget);
}

#[test]
fn value_encode_failure_poisons_only_that_pair() {
    let (session, _engine) = connect();
    // Binary data cannot be rendered as JSON, the default format.
    let pairs = vec![
        ("ok", Value::Text("fine".into())),
        ("bad", Value::Bytes(vec![1, 2, 3])),
    ];
    let err = session
        .store_multi(StoreMode::Set, pairs, &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    assert_eq!(err.key(), Some("bad"));
    let report = err.batch().expect("batch report");
    // The sibling was still submitted and stored.
    assert_eq!(report.statuses.get("ok"), Some(&StatusCode::SUCCESS));

    let fetched = session.get("ok", &OperationOptions::default()).expect("get");
    assert_eq!(fetched.value, Some(Value::Text("fine".into())));
}

#[test]
fn touch_and_get_and_touch_accept_ttls() {
    let (session, _engine) = connect();
    session.set("k", "v", &utf8_options()).expect("set");

    let touched = session
        .touch("k", &OperationOptions {
            ttl: 30,
            ..OperationOptions::default()
        })
        .expect("touch");
    assert!(touched.success());

    let fetched = session.get_and_touch("k", 60).expect("gat");
    assert_eq!(fetched.value, Some(Value::Text("v".into())));

    let err = session
        .touch("absent", &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::KEY_NOT_FOUND));
}
