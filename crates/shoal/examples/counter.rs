// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use shoal::testing::MemoryEngine;
use shoal::{OperationOptions, Session, SessionConfig, StatusCode, Value};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let engine = MemoryEngine::new();
    let handle = engine.clone();
    let session = Session::connect(Box::new(engine), SessionConfig::default())?;

    let doc = Value::Map(vec![
        (Value::Text("name".into()), Value::Text("reef".into())),
        (Value::Text("depth".into()), Value::Integer(12)),
    ]);
    let stored = session.set("site", doc, &OperationOptions::default())?;
    println!("stored site with cas {}", stored.cas);

    let fetched = session.get("site", &OperationOptions::default())?;
    println!("fetched: {:?}", fetched.value);

    let count = session.incr("visits", 1, Some(1))?;
    println!("visits = {:?}", count.value);

    let quiet = OperationOptions {
        quiet: Some(true),
        ..OperationOptions::default()
    };
    let batch = session.get_multi(["site", "absent"], &quiet)?;
    for (key, result) in &batch {
        if result.status == StatusCode::KEY_NOT_FOUND {
            println!("{key}: not found");
        } else {
            println!("{key}: {:?}", result.value);
        }
    }

    handle.stage_http(
        "_design/sites/_view/by_depth",
        200,
        vec![br#"{"total_rows": 1, "rows": [{"id": "site", "key": 12}]}"#.to_vec()],
    );
    let rows = session.view_rows("sites", "by_depth", "", &OperationOptions::default())?;
    println!("view returned {} row(s)", rows.len());

    Ok(())
}
