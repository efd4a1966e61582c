// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Batch aggregation and raise-gate behavior against the in-memory engine.

use std::sync::Arc;

use shoal::testing::MemoryEngine;
use shoal::{
    CustomCodec, ErrorKind, KvResult, OperationOptions, Session, SessionConfig, StatusCode,
    Transcoder, Value, FMT_UTF8,
};

fn connect(config: SessionConfig) -> (Session, MemoryEngine) {
    let engine = MemoryEngine::new();
    let handle = engine.clone();
    let session = Session::connect(Box::new(engine), config).expect("connect");
    (session, handle)
}

fn quiet_options() -> OperationOptions {
    OperationOptions {
        quiet: Some(true),
        ..OperationOptions::default()
    }
}

#[test]
fn mixed_batch_with_suppression_embeds_the_missing_key() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("a", b"x", FMT_UTF8);
    engine.seed("b", b"y", FMT_UTF8);

    let multi = session
        .get_multi(["a", "missing", "b"], &quiet_options())
        .expect("suppressed batch must not raise");

    assert!(multi.all_ok());
    assert_eq!(multi.len(), 3);
    assert_eq!(
        multi.get("a").and_then(|r| r.value.clone()),
        Some(Value::Text("x".into()))
    );
    assert_eq!(
        multi.get("b").and_then(|r| r.value.clone()),
        Some(Value::Text("y".into()))
    );
    assert_eq!(
        multi.get("missing").map(|r| r.status),
        Some(StatusCode::KEY_NOT_FOUND)
    );
}

#[test]
fn one_failure_without_suppression_raises_with_the_failing_result() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("a", b"x", FMT_UTF8);
    engine.seed("b", b"y", FMT_UTF8);

    let err = session
        .get_multi(["a", "missing", "b"], &OperationOptions::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.key(), Some("missing"));
    let snapshot = err.result().expect("implicated result");
    assert_eq!(snapshot.key, "missing");
    assert_eq!(snapshot.status, StatusCode::KEY_NOT_FOUND);
    let report = err.batch().expect("batch report");
    assert!(!report.all_ok);
    assert_eq!(report.statuses["a"], StatusCode::SUCCESS);
    assert_eq!(report.statuses["missing"], StatusCode::KEY_NOT_FOUND);
}

#[test]
fn quiet_single_get_returns_the_failure_status() {
    let (session, _engine) = connect(SessionConfig {
        quiet: true,
        ..SessionConfig::default()
    });
    let result = session
        .get("missing", &OperationOptions::default())
        .expect("quiet session embeds failures");
    assert_eq!(result.status, StatusCode::KEY_NOT_FOUND);
    assert!(!result.success());
}

#[test]
fn out_of_order_delivery_is_tolerated() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("a", b"1", FMT_UTF8);
    engine.seed("b", b"2", FMT_UTF8);
    engine.seed("c", b"3", FMT_UTF8);
    engine.reverse_delivery(true);

    let multi = session
        .get_multi(["a", "b", "c"], &OperationOptions::default())
        .expect("reversed delivery still aggregates");
    assert!(multi.all_ok());
    assert_eq!(
        multi.get("c").and_then(|r| r.value.clone()),
        Some(Value::Text("3".into()))
    );
}

struct BrokenDecoder;

impl CustomCodec for BrokenDecoder {
    fn decode_value(&self, raw: &[u8], _flags: u32) -> Option<Result<Value, String>> {
        if raw == b"poison" {
            Some(Err("decoder rejected payload".to_string()))
        } else {
            None
        }
    }
}

#[test]
fn decode_failure_poisons_only_its_own_entry() {
    let (mut session, engine) = connect(SessionConfig {
        quiet: true,
        ..SessionConfig::default()
    });
    session.set_transcoder(Transcoder::Custom(Arc::new(BrokenDecoder)));
    engine.seed("good", b"fine", FMT_UTF8);
    engine.seed("bad", b"poison", FMT_UTF8);

    let multi = session
        .get_multi(["good", "bad"], &quiet_options())
        .expect("quiet batch returns");

    assert!(!multi.all_ok(), "fatal decode error clears all_ok");
    assert_eq!(multi.fatal_errors().len(), 1);
    let bad = multi.get("bad").expect("downgraded entry present");
    assert_eq!(bad.status, StatusCode::CLIENT_DECODE_FAILURE);
    assert_eq!(bad.raw.as_deref(), Some(&b"poison"[..]));
    let good = multi.get("good").expect("sibling survives");
    assert_eq!(good.value, Some(Value::Text("fine".into())));
}

#[test]
fn fatal_errors_dominate_suppressed_not_found() {
    let (mut session, engine) = connect(SessionConfig::default());
    session.set_transcoder(Transcoder::Custom(Arc::new(BrokenDecoder)));
    engine.seed("bad", b"poison", FMT_UTF8);

    // Suppression is on (quiet per-op), yet the fatal decode error raises.
    let err = session
        .get_multi(["bad", "missing"], &quiet_options())
        .map(|_| ())
        .err();
    // Quiet skips the gate entirely, so re-run non-quiet to observe the
    // precedence at the gate itself.
    assert!(err.is_none(), "quiet batches embed even fatal errors");

    let err = session
        .get_multi(["bad", "missing"], &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
    let report = err.batch().expect("batch report");
    assert_eq!(report.fatal_count, 1);
}

#[test]
fn scheduling_failure_raises_immediately_and_resets_in_flight() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("a", b"1", FMT_UTF8);
    engine.fail_schedule("b", StatusCode::BUSY);

    let err = session
        .get_multi(["a", "b"], &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.status(), Some(StatusCode::BUSY));
    assert_eq!(err.key(), Some("b"));
    assert_eq!(session.in_flight(), 0);

    // The session is reusable afterwards.
    let result = session.get("a", &OperationOptions::default()).expect("get");
    assert_eq!(result.value, Some(Value::Text("1".into())));
}

#[test]
fn wait_failure_raises_the_network_error() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("a", b"1", FMT_UTF8);
    engine.fail_wait(StatusCode::NETWORK_ERROR);

    let err = session.get("a", &OperationOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert_eq!(err.status(), Some(StatusCode::NETWORK_ERROR));
    assert_eq!(session.in_flight(), 0);
}

#[test]
fn empty_key_and_empty_batch_are_argument_errors() {
    let (session, _engine) = connect(SessionConfig::default());
    let err = session.get("", &OperationOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arguments);

    let err = session
        .get_multi(Vec::<String>::new(), &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arguments);
}

#[test]
fn argument_errors_surface_even_on_quiet_sessions() {
    let (session, _engine) = connect(SessionConfig {
        quiet: true,
        ..SessionConfig::default()
    });
    let err = session.get("", &OperationOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arguments);
}

#[test]
fn passthrough_sessions_skip_decoding() {
    let (session, engine) = connect(SessionConfig {
        data_passthrough: true,
        ..SessionConfig::default()
    });
    engine.seed("k", b"{\"a\":1}", 0);

    let result = session.get("k", &OperationOptions::default()).expect("get");
    assert_eq!(result.value, Some(Value::Bytes(b"{\"a\":1}".to_vec())));
}

#[test]
fn delete_honors_quiet_suppression() {
    let (session, engine) = connect(SessionConfig::default());
    engine.seed("k", b"v", FMT_UTF8);

    let multi = session
        .delete_multi(["k", "missing"], &quiet_options())
        .expect("suppressed delete");
    assert!(multi.all_ok());
    assert!(!engine.contains("k"));
    assert_eq!(
        multi.get("missing").map(|r| r.status),
        Some(StatusCode::KEY_NOT_FOUND)
    );

    let err = session
        .delete("missing", &OperationOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Engine);
}
