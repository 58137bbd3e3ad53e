//! Consuming collections as tokio streams instead of delegates

use firelist::testing::{FakeQuery, FakeSnapshotQuery};
use firelist::{ArrayEvent, BatchedArray, BatchedEvent, IndexedArray, IndexedEvent, OrderedArray, Record};
use serde_json::json;
use tokio_stream::StreamExt;

#[tokio::test]
async fn ordered_array_events_arrive_on_the_stream() {
    let query = FakeQuery::new("feed");
    let array = OrderedArray::new(query.clone());
    let mut events = array.event_stream();
    array.start().unwrap();

    let writer = {
        let query = query.clone();
        tokio::spawn(async move {
            query.push(Record::new("a", json!(1)));
            query.push(Record::new("b", json!(2)));
            query.remove("a");
        })
    };
    writer.await.unwrap();

    let received: Vec<ArrayEvent> = (&mut events).take(3).collect().await;
    assert_eq!(
        received,
        vec![
            ArrayEvent::Added {
                record: Record::new("a", json!(1)),
                index: 0,
            },
            ArrayEvent::Added {
                record: Record::new("b", json!(2)),
                index: 1,
            },
            ArrayEvent::Removed {
                record: Record::new("a", json!(1)),
                index: 0,
            },
        ]
    );
    assert_eq!(array.count(), 1);
}

#[tokio::test]
async fn indexed_array_streams_structure_and_content() {
    let index = FakeQuery::with_children("index", vec![Record::new("k", json!(true))]);
    let data = FakeQuery::new("data");
    data.child_query("k").set_value(json!("content"));

    let array = IndexedArray::new(index.clone(), data.clone());
    let events = array.event_stream();
    array.observe_query().unwrap();

    let received: Vec<IndexedEvent> = events.take(2).collect().await;
    assert!(matches!(received[0], IndexedEvent::AddedReference { index: 0, .. }));
    assert!(matches!(received[1], IndexedEvent::Loaded { index: 0, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batched_updates_stream_in_publication_order() {
    let query = FakeSnapshotQuery::new("rooms");
    let array = BatchedArray::new(query.clone());
    let mut events = array.event_stream();
    array.observe_query();

    let publisher = {
        let query = query.clone();
        tokio::spawn(async move {
            query.publish(vec![Record::new("r1", json!("lobby"))]);
            query.publish(vec![
                Record::new("r0", json!("hall")),
                Record::new("r1", json!("lobby")),
            ]);
        })
    };
    publisher.await.unwrap();

    // Initial empty result, then one update per publication
    let mut diffs = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            BatchedEvent::Updated(diff) => diffs.push(diff),
            BatchedEvent::QueryFailed(error) => panic!("unexpected failure: {error}"),
        }
        if diffs.len() == 3 {
            break;
        }
    }
    assert!(diffs[0].is_empty());
    assert_eq!(diffs[1].inserted_indexes(), vec![0]);
    assert_eq!(diffs[2].inserted_indexes(), vec![0]);
    assert_eq!(diffs[2].moved_indexes(), vec![(0, 1)]);
    assert_eq!(array.items().len(), 2);
}

#[tokio::test]
async fn dropping_the_stream_does_not_disturb_the_array() {
    let query = FakeQuery::new("feed");
    let array = OrderedArray::new(query.clone());
    drop(array.event_stream());
    array.start().unwrap();

    query.push(Record::new("a", json!(1)));
    assert_eq!(array.count(), 1);
}
