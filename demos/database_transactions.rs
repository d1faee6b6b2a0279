//! Demonstrates transactions, priority writes and disconnect-scoped writes on the in-memory
//! backend.

use firebase_rtdb_client::database::{
    increment, Action, Database, EventType, Location, PriorityPoint, QuerySpec, Range,
};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let database = Database::in_memory();
    let root = Location::url("memory://default/");
    let counter = root.clone().child("stats/visits");

    for _ in 0..3 {
        let result = database
            .transaction(
                counter.clone(),
                |current| {
                    let visits = current.and_then(|value| value.as_i64()).unwrap_or(0);
                    Action::Set(json!(visits + 1))
                },
                true,
            )
            .await?;
        println!("committed={} visits={:?}", result.committed, result.snapshot.value());
    }

    let aborted = database
        .transaction(counter.clone(), |_| Action::Abort, true)
        .await?;
    println!("aborted transaction committed={}", aborted.committed);

    database.set(counter.clone(), increment(10.0)).await?;
    let visits = database
        .once(counter, QuerySpec::unordered(), EventType::Value)
        .await?;
    println!("visits after increment: {:?}", visits.value());

    let queue = root.clone().child("queue");
    for (job, priority) in [("compile", 2.0), ("fetch", 1.0), ("link", 3.0)] {
        database
            .set_with_priority(queue.clone().child(job), json!({ "job": job }), priority)
            .await?;
    }
    let next_two = QuerySpec::order_by_priority(Range::StartAt(PriorityPoint::new(1.0)))
        .limit_to_first(2);
    let jobs = database.once(queue, next_two, EventType::Value).await?;
    println!("next jobs: {:?}", jobs.to_key_list());

    let presence = root.child("presence/demo");
    database.set(presence.clone(), json!("online")).await?;
    database
        .on_disconnect()
        .set(presence.clone(), json!("offline"))
        .await?;
    database.set_offline(true).await?;
    let status = database
        .once(presence, QuerySpec::unordered(), EventType::Value)
        .await;
    println!("presence while offline: {status:?}");
    database.set_offline(false).await?;

    Ok(())
}
