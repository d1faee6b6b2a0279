//! Demonstrates child event subscriptions, previous-sibling keys and cancellation.
//!
//! Runs against the in-memory backend by default. Pass a database URL such as
//! `http://127.0.0.1:9000/?ns=demo` to write through the REST transport instead; streaming
//! listeners then fail with an operation error, which the demo reports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use firebase_rtdb_client::database::{
    connect, server_timestamp, Cancellation, Database, DatabaseOptions, EventType, Location,
    QuerySpec, Range, Snapshot,
};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (database, root) = match std::env::args().nth(1) {
        Some(url) => {
            let root = url.split('?').next().unwrap_or(&url).to_string();
            (connect(&DatabaseOptions::rest(url)), root)
        }
        None => (Database::in_memory(), "memory://default/".to_string()),
    };
    let tasks = Location::url(root).child("tasks");

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut subscriptions = Vec::new();
    for event in [EventType::ChildAdded, EventType::ChildChanged, EventType::ChildRemoved] {
        let capture = log.clone();
        let subscription = database
            .subscribe(
                tasks.clone(),
                QuerySpec::order_by_key(Range::Unbounded),
                event,
                move |snapshot: Snapshot| {
                    let capture = capture.clone();
                    async move {
                        capture.lock().unwrap().push(format!(
                            "{event}: {} (after '{}') = {}",
                            snapshot.key(),
                            snapshot.prev_key(),
                            snapshot.export_value()
                        ));
                    }
                },
                |cancellation: Cancellation| async move {
                    println!("subscription ended: {cancellation:?}");
                },
            )
            .await;
        match subscription {
            Ok(id) => subscriptions.push(id),
            Err(err) => println!("{event} listener unavailable: {err}"),
        }
    }

    let alpha = tasks.clone().child("alpha");
    database
        .set(alpha.clone(), json!({ "title": "Create project", "created_at": server_timestamp() }))
        .await?;
    let beta = database
        .set(tasks.clone().push(), json!({ "title": "Review PR" }))
        .await?;
    database
        .set(Location::from(&beta).child("title"), json!("Review PR comments"))
        .await?;
    database.remove(alpha).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    for line in log.lock().unwrap().iter() {
        println!("{line}");
    }

    for id in subscriptions {
        database.unsubscribe(&id).await?;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}
