// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::HashSet,
    fs,
    thread,
    time::{Duration, Instant},
};

use inmq_queue::{
    EncodingKind, FlushMode, LogStore, Message, QueueBuilder, QueueError, Store, StoreKind,
};
use tempfile::TempDir;
use test_case::test_case;

fn build(temp_dir: &TempDir, store: StoreKind, encoding: EncodingKind) -> inmq_queue::Queue {
    QueueBuilder::new(temp_dir.path())
        .name("it")
        .store(store)
        .encoding(encoding)
        .flush_mode(FlushMode::Sync)
        .build()
        .unwrap()
}

#[test_case(StoreKind::Log, EncodingKind::Msgpack; "log msgpack")]
#[test_case(StoreKind::Log, EncodingKind::Json; "log json")]
#[test_case(StoreKind::Log, EncodingKind::Bincode; "log bincode")]
#[test_case(StoreKind::Directory, EncodingKind::Msgpack; "directory msgpack")]
#[test_case(StoreKind::Directory, EncodingKind::Json; "directory json")]
#[test_case(StoreKind::Directory, EncodingKind::Bincode; "directory bincode")]
fn test_fifo_order(store: StoreKind, encoding: EncodingKind) {
    let temp_dir = TempDir::new().unwrap();
    let queue = build(&temp_dir, store, encoding);

    let producer = queue.producer();
    for i in 0..20 {
        producer
            .send(Message::new(format!("message-{i:04}")).with_priority(i))
            .unwrap();
    }

    let consumer = queue.consumer();
    for i in 0..20 {
        let msg = consumer.recv().unwrap();
        assert_eq!(msg.body, format!("message-{i:04}"));
        assert_eq!(msg.priority, i);
    }
    assert!(consumer.try_recv().unwrap().is_none());

    queue.shutdown().unwrap();
}

#[test_case(StoreKind::Log; "log")]
#[test_case(StoreKind::Directory; "directory")]
fn test_concurrent_producers(store: StoreKind) {
    let temp_dir = TempDir::new().unwrap();
    let queue = build(&temp_dir, store, EncodingKind::Msgpack);

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let producer = queue.producer();
            thread::spawn(move || producer.send(Message::new(format!("body-{i}"))))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let consumer = queue.consumer();
    let received: HashSet<String> = (0..100).map(|_| consumer.recv().unwrap().body).collect();
    let expected: HashSet<String> = (0..100).map(|i| format!("body-{i}")).collect();

    assert_eq!(received, expected);
    assert!(queue.is_empty().unwrap());

    queue.shutdown().unwrap();
}

#[test]
fn test_concurrent_consumers_receive_each_message_once() {
    let temp_dir = TempDir::new().unwrap();
    let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Json);

    let producer = queue.producer();
    for i in 0..60 {
        producer.send(Message::new(format!("job-{i}"))).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let consumer = queue.consumer();
            thread::spawn(move || {
                (0..15)
                    .map(|_| consumer.recv().unwrap().body)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for body in handle.join().unwrap() {
            assert!(all.insert(body), "message delivered twice");
        }
    }
    assert_eq!(all.len(), 60);

    queue.shutdown().unwrap();
}

#[test]
fn test_blocking_recv_wakes_on_send() {
    let temp_dir = TempDir::new().unwrap();
    let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Msgpack);

    let consumer = queue.consumer();
    let waiter = thread::spawn(move || consumer.recv());

    thread::sleep(Duration::from_millis(50));
    queue.producer().send(Message::new("late")).unwrap();

    assert_eq!(waiter.join().unwrap().unwrap().body, "late");
    queue.shutdown().unwrap();
}

#[test_case(StoreKind::Log; "log")]
#[test_case(StoreKind::Directory; "directory")]
fn test_messages_survive_restart(store: StoreKind) {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = build(&temp_dir, store, EncodingKind::Bincode);
        let producer = queue.producer();
        for i in 0..10 {
            producer.send(Message::new(format!("msg-{i}"))).unwrap();
        }
        let consumer = queue.consumer();
        for _ in 0..3 {
            consumer.recv().unwrap();
        }
        queue.shutdown().unwrap();
    }

    {
        let queue = build(&temp_dir, store, EncodingKind::Bincode);
        assert_eq!(queue.len().unwrap(), 7);

        let consumer = queue.consumer();
        for i in 3..10 {
            assert_eq!(consumer.recv().unwrap().body, format!("msg-{i}"));
        }
        queue.shutdown().unwrap();
    }
}

#[test]
fn test_crash_window_does_not_lose_queue() {
    let temp_dir = TempDir::new().unwrap();

    // Leave the state a delete-then-rename swap produces when interrupted
    // between its two steps: tail in the compaction file, no queue file.
    {
        let mut store = LogStore::builder(temp_dir.path(), "it").open().unwrap();
        for body in ["a", "b", "c"] {
            store.enqueue(&Message::new(body)).unwrap();
        }
        let (_, head_size) = store.read_head().unwrap().unwrap();
        let bytes = fs::read(store.queue_path()).unwrap();
        fs::write(store.tmp_path(), &bytes[usize::try_from(head_size).unwrap()..]).unwrap();
        fs::remove_file(store.queue_path()).unwrap();
    }

    let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Msgpack);
    let consumer = queue.consumer();

    assert_eq!(consumer.recv().unwrap().body, "b");
    assert_eq!(consumer.recv().unwrap().body, "c");
    assert!(consumer.try_recv().unwrap().is_none());
    queue.shutdown().unwrap();
}

#[test]
fn test_verify_on_startup_drops_torn_tail() {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Msgpack);
        queue.producer().send(Message::new("whole")).unwrap();
        queue.shutdown().unwrap();
    }

    let wal = temp_dir.path().join("it.wal");
    let mut bytes = fs::read(&wal).unwrap();
    bytes.extend_from_slice(&[0x20, 0x00, 0x00, 0x00, 0x81]);
    fs::write(&wal, &bytes).unwrap();

    let queue = QueueBuilder::new(temp_dir.path())
        .name("it")
        .verify_on_startup(true)
        .build()
        .unwrap();

    assert_eq!(queue.len().unwrap(), 1);
    assert_eq!(queue.consumer().recv().unwrap().body, "whole");
    queue.shutdown().unwrap();
}

#[test]
fn test_default_open_repairs_torn_tail_before_append() {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Bincode);
        queue.producer().send(Message::new("before crash")).unwrap();
        queue.shutdown().unwrap();
    }

    let wal = temp_dir.path().join("it.wal");
    let mut bytes = fs::read(&wal).unwrap();
    bytes.extend_from_slice(&[0x40, 0x00, 0x00, 0x00, 0x01, 0x02]);
    fs::write(&wal, &bytes).unwrap();

    let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Bincode);
    queue.producer().send(Message::new("after restart")).unwrap();

    let consumer = queue.consumer();
    assert_eq!(consumer.recv().unwrap().body, "before crash");
    assert_eq!(consumer.recv().unwrap().body, "after restart");
    assert!(consumer.try_recv().unwrap().is_none());
    queue.shutdown().unwrap();
}

#[test]
fn test_corruption_poisons_queue() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("it.wal"), b"{broken\n").unwrap();

    let queue = build(&temp_dir, StoreKind::Log, EncodingKind::Json);
    let consumer = queue.consumer();

    let first = consumer.try_recv().unwrap_err();
    assert!(first.is_fatal());
    assert!(matches!(first, QueueError::Decode { .. }));

    let producer_err = queue.producer().send(Message::new("x")).unwrap_err();
    assert!(matches!(producer_err, QueueError::Poisoned { .. }));

    queue.shutdown().unwrap();
}

#[test]
fn test_recv_timeout_on_empty_queue() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .poll_interval(Duration::from_millis(5))
        .build()
        .unwrap();

    let start = Instant::now();
    let err = queue
        .consumer()
        .recv_timeout(Duration::from_millis(60))
        .unwrap_err();

    assert!(matches!(err, QueueError::Timeout { .. }));
    assert!(start.elapsed() >= Duration::from_millis(60));

    queue.producer().send(Message::new("ready")).unwrap();
    let msg = queue
        .consumer()
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(msg.body, "ready");

    queue.shutdown().unwrap();
}

#[test]
fn test_short_recv_timeouts_lose_nothing() {
    const SENT: usize = 3_000;

    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .store(StoreKind::Directory)
        .flush_mode(FlushMode::Async)
        .poll_interval(Duration::ZERO)
        .build()
        .unwrap();

    let producer = queue.producer();
    for i in 0..SENT {
        producer.send(Message::new(format!("m-{i}"))).unwrap();
    }

    let consumer = queue.consumer();
    let mut bodies = HashSet::new();
    for attempt in 0..100_000u64 {
        if bodies.len() == SENT {
            break;
        }
        match consumer.recv_timeout(Duration::from_micros(attempt % 60)) {
            Ok(msg) => assert!(bodies.insert(msg.body), "delivered twice"),
            Err(QueueError::Timeout { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    while let Some(msg) = consumer.try_recv().unwrap() {
        assert!(bodies.insert(msg.body), "delivered twice");
    }

    assert_eq!(bodies.len(), SENT);
    assert_eq!(queue.len().unwrap(), 0);
    queue.shutdown().unwrap();
}

#[test]
fn test_send_timeout_succeeds_on_idle_gate() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .request_capacity(1)
        .build()
        .unwrap();

    queue
        .producer()
        .send_timeout(Message::new("bounded"), Duration::from_secs(5))
        .unwrap();
    assert_eq!(queue.len().unwrap(), 1);

    queue.shutdown().unwrap();
}

#[test]
fn test_busy_retry_with_zero_poll_interval() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .poll_interval(Duration::ZERO)
        .build()
        .unwrap();

    let consumer = queue.consumer();
    let waiter = thread::spawn(move || consumer.recv());
    thread::sleep(Duration::from_millis(20));
    queue.producer().send(Message::new("spin")).unwrap();

    assert_eq!(waiter.join().unwrap().unwrap().body, "spin");
    queue.shutdown().unwrap();
}

#[test]
fn test_independent_queues_in_one_process() {
    let temp_dir = TempDir::new().unwrap();
    let orders = QueueBuilder::new(temp_dir.path()).name("orders").build().unwrap();
    let events = QueueBuilder::new(temp_dir.path())
        .name("events")
        .store(StoreKind::Directory)
        .build()
        .unwrap();

    orders.producer().send(Message::new("order-1")).unwrap();
    events.producer().send(Message::new("event-1")).unwrap();

    assert_eq!(orders.consumer().recv().unwrap().body, "order-1");
    assert_eq!(events.consumer().recv().unwrap().body, "event-1");
    assert!(orders.is_empty().unwrap());
    assert!(events.is_empty().unwrap());

    orders.shutdown().unwrap();
    events.shutdown().unwrap();
}

#[test]
fn test_directory_reindex_through_queue() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new(temp_dir.path())
        .name("dir")
        .store(StoreKind::Directory)
        .reindex_threshold(4)
        .build()
        .unwrap();

    let producer = queue.producer();
    let consumer = queue.consumer();
    for i in 0..3 {
        producer.send(Message::new(format!("m{i}"))).unwrap();
    }
    consumer.recv().unwrap();
    producer.send(Message::new("m3")).unwrap();
    producer.send(Message::new("m4")).unwrap();

    let bodies: Vec<String> = queue
        .snapshot()
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec!["m1", "m2", "m3", "m4"]);

    queue.shutdown().unwrap();
}
