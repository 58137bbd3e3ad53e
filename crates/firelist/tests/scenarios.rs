//! End-to-end scenarios across the three collection engines

use firelist::testing::{FakeQuery, FakeSnapshotQuery, Recorder, assert_keys, init_test_logging};
use firelist::{
    ArrayDelegate, ArrayEvent, BatchedArray, BatchedEvent, ChildEvent, DiffKind, IndexedArray,
    IndexedEvent, LoadState, OrderedArray, QueryError, Record,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn rec(key: &str) -> Record {
    Record::new(key, json!(key))
}

#[test]
fn children_arriving_in_order_are_mirrored_in_order() {
    init_test_logging();
    let query = FakeQuery::new("chat/messages");
    let array = OrderedArray::new(query.clone());
    array.start().unwrap();

    query.emit(ChildEvent::Added {
        record: rec("X"),
        preceding_key: None,
    });
    query.emit(ChildEvent::Added {
        record: rec("Y"),
        preceding_key: Some("X".into()),
    });
    query.emit(ChildEvent::Added {
        record: rec("Z"),
        preceding_key: Some("Y".into()),
    });

    assert_keys(&array.items(), &["X", "Y", "Z"]);
}

#[test]
fn moving_the_first_child_after_the_last() {
    init_test_logging();
    let query = FakeQuery::with_children("list", vec![rec("A"), rec("B"), rec("C")]);
    let array = OrderedArray::new(query.clone());
    let recorder = Recorder::new();
    array.set_delegate(Some(recorder.clone()));
    array.start().unwrap();
    recorder.take();

    query.move_after("A", Some("C"));

    assert_keys(&array.items(), &["B", "C", "A"]);
    assert_eq!(
        recorder.events(),
        vec![ArrayEvent::Moved {
            record: rec("A"),
            from: 0,
            to: 2,
        }]
    );
}

#[test]
fn reentrant_delivery_is_serialized() {
    init_test_logging();

    /// Writes a follow-up child from inside its own callback
    struct Echo {
        query: Arc<FakeQuery>,
        log: Mutex<Vec<String>>,
    }
    impl ArrayDelegate for Echo {
        fn did_add(&self, record: &Record, index: usize) {
            self.log.lock().unwrap().push(format!("start {} @{index}", record.key));
            if record.key == "first" {
                self.query.push(rec("second"));
            }
            self.log.lock().unwrap().push(format!("end {}", record.key));
        }
    }

    let query = FakeQuery::new("list");
    let array = OrderedArray::new(query.clone());
    let echo = Arc::new(Echo {
        query: query.clone(),
        log: Mutex::new(Vec::new()),
    });
    array.set_delegate(Some(echo.clone()));
    array.start().unwrap();

    query.push(rec("first"));

    assert_keys(&array.items(), &["first", "second"]);
    assert_eq!(
        *echo.log.lock().unwrap(),
        vec!["start first @0", "end first", "start second @1", "end second"]
    );
}

#[test]
fn deliveries_from_several_threads_keep_keys_unique() {
    init_test_logging();
    let query = FakeQuery::new("list");
    let array = OrderedArray::new(query.clone());
    array.start().unwrap();

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let query = query.clone();
            std::thread::spawn(move || {
                for n in 0..25 {
                    query.push(rec(&format!("w{writer}-{n}")));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(array.count(), 100);
    for (index, record) in array.items().iter().enumerate() {
        assert_eq!(array.index_for_key(&record.key), Ok(Some(index)));
    }
}

#[test]
fn indexed_array_survives_a_failed_entry() {
    init_test_logging();
    let index = FakeQuery::with_children(
        "users/u1/groups",
        vec![Record::new("a", json!(true)), Record::new("b", json!(true))],
    );
    let data = FakeQuery::new("groups");
    let array = IndexedArray::new(index.clone(), data.clone());
    let recorder = Recorder::new();
    array.set_delegate(Some(recorder.clone()));
    array.observe_query().unwrap();

    data.child_query("a").set_value(json!({"name": "Alpha"}));
    let error = QueryError::permission_denied("groups/b");
    data.child_query("b").cancel(error.clone());

    assert_eq!(array.item(0), Some(Record::new("a", json!({"name": "Alpha"}))));
    assert_eq!(array.item(1), None);
    assert_eq!(array.load_state(1), LoadState::Failed(error.clone()));

    let events = recorder.events();
    let failures: Vec<&IndexedEvent> = events
        .iter()
        .filter(|event| matches!(event, IndexedEvent::LoadFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        IndexedEvent::LoadFailed { index: 1, error: reported, .. } if *reported == error
    ));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, IndexedEvent::QueryCancelled { .. }))
    );
}

#[test]
fn batched_array_reports_deletion_insertion_and_shift() {
    init_test_logging();
    let query = FakeSnapshotQuery::with_records(
        "rooms",
        vec![Record::new("1", json!("a")), Record::new("2", json!("b"))],
    );
    let array = BatchedArray::new(query.clone());
    let recorder = Recorder::new();
    array.set_delegate(Some(recorder.clone()));
    array.observe_query();
    let before = array.items();
    recorder.take();

    query.publish(vec![Record::new("2", json!("b")), Record::new("3", json!("c"))]);

    let events = recorder.take();
    let [BatchedEvent::Updated(diff)] = events.as_slice() else {
        panic!("expected one update, got {events:?}");
    };
    assert_eq!(diff.deleted_indexes(), vec![0]);
    assert_eq!(diff.inserted_indexes(), vec![1]);
    assert!(diff.changed.is_empty());
    assert_eq!(diff.classify().get("2"), Some(&DiffKind::Moved));
    assert_eq!(diff.moved_indexes(), vec![(1, 0)]);
    assert_eq!(diff.apply_to(&before).unwrap(), array.items());
}

#[test]
fn cancelled_array_ignores_a_misbehaving_query() {
    init_test_logging();
    let query = FakeQuery::misbehaving("list", vec![rec("a")]);
    let array = OrderedArray::new(query.clone());
    let recorder = Recorder::new();
    array.set_delegate(Some(recorder.clone()));
    array.start().unwrap();
    recorder.take();

    query.cancel(QueryError::cancelled("revoked"));
    query.push(rec("b"));
    query.change(Record::new("a", json!("changed")));
    query.remove("a");

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ArrayEvent::Cancelled { .. }));
    assert_keys(&array.items(), &["a"]);
}
