mod helpers;

use self::helpers::faults::FaultStore;
use self::helpers::{BUCKET, LIMITS, TRACER, concat_objects, expected, test_builder, wait_until};

use s3_journal::queue::{ActionQueue as _, MemoryQueueProvider, QueueProvider as _};
use s3_journal::store::{Bucket, MemoryStore, ObjectStore as _};
use s3_journal::time::ManualClock;
use s3_journal::{ErrorKind, JournalBuilder, PartLimits};

use bytes::Bytes;
use chrono::TimeZone as _;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_single_journal() {
    let _ = &*TRACER;
    let store = helpers::store();
    let journal = test_builder("happy-path")
        .shared_store(store.clone())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(200)
        .build()
        .await
        .unwrap();

    let total = 20_000u64;
    for n in 1..=total {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    let stats = journal.stats();
    assert_eq!(stats.enqueued, total);
    assert_eq!(stats.uploaded, total);
    assert_eq!(stats.backlog(), 0);
    assert_eq!(stats.queue.in_progress, 0);
    assert_eq!(store.in_flight(), 0);
    assert_eq!(concat_objects(&store, ""), expected(1..=total));
}

#[tokio::test(flavor = "multi_thread")]
async fn submissions_after_close_fail() {
    let _ = &*TRACER;
    let journal = test_builder("submit-after-close")
        .shared_store(helpers::store())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(10)
        .build()
        .await
        .unwrap();
    journal.submit("1".to_string()).await.unwrap();
    journal.close().await.unwrap();

    let err = journal.submit("2".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert!(err.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_random_transient_faults() {
    let _ = &*TRACER;
    let store = helpers::store();
    let flaky = FaultStore::random(store.clone(), 7, 1.0 / 3.0);
    let journal = test_builder("random-faults")
        .store(flaky)
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(100)
        .build()
        .await
        .unwrap();

    let total = 5_000u64;
    for n in 1..=total {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    let stats = journal.stats();
    assert_eq!(stats.uploaded, total);
    assert_eq!(stats.queue.in_progress, 0);
    assert!(stats.queue.retried > 0);
    assert_eq!(store.in_flight(), 0);
    assert_eq!(concat_objects(&store, ""), expected(1..=total));
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_streaked_outages() {
    let _ = &*TRACER;
    let store = helpers::store();
    let flaky = FaultStore::windowed(
        store.clone(),
        Duration::from_millis(150),
        Duration::from_millis(15),
    );
    let journal = test_builder("streaked-outages")
        .store(flaky)
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(100)
        .build()
        .await
        .unwrap();

    let total = 3_000u64;
    for n in 1..=total {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    assert_eq!(journal.stats().uploaded, total);
    assert_eq!(store.in_flight(), 0);
    assert_eq!(concat_objects(&store, ""), expected(1..=total));
}

#[tokio::test(flavor = "multi_thread")]
async fn recovers_after_abrupt_shutdown() {
    let _ = &*TRACER;
    let store = helpers::store();
    let provider = Arc::new(MemoryQueueProvider::new());

    let first = test_builder("restart")
        .shared_store(store.clone())
        .queue_provider(provider.clone())
        .max_batch_size(100)
        .build()
        .await
        .unwrap();
    for n in 1..=2_000u64 {
        first.submit(n.to_string()).await.unwrap();
    }
    first.abort().await;

    let second = test_builder("restart")
        .shared_store(store.clone())
        .queue_provider(provider)
        .max_batch_size(100)
        .build()
        .await
        .unwrap();
    for n in 2_001..=4_000u64 {
        second.submit(n.to_string()).await.unwrap();
    }
    second.close().await.unwrap();

    assert_eq!(store.in_flight(), 0);
    assert_eq!(second.stats().queue.in_progress, 0);
    assert_eq!(concat_objects(&store, ""), expected(1..=4_000u64));
}

#[tokio::test(flavor = "multi_thread")]
async fn rolls_directories_at_the_day_boundary() {
    let _ = &*TRACER;
    let store = helpers::store();
    let clock = Arc::new(ManualClock::new(
        chrono::Utc.with_ymd_and_hms(2026, 7, 31, 23, 0, 0).unwrap(),
    ));
    let journal = test_builder("directory-rollover")
        .shared_store(store.clone())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .shared_clock(clock.clone())
        .max_batch_size(100)
        .no_batch_latency()
        .build()
        .await
        .unwrap();

    for n in 1..=500u64 {
        journal.submit(n.to_string()).await.unwrap();
    }
    // Every chunk of the first day must be planned before the clock moves:
    // wait for the action count to cover all five appends and go quiet.
    let mut last = 0;
    assert!(
        wait_until(Duration::from_secs(5), || {
            let now = journal.stats().queue.enqueued;
            let stable = now == last && now >= 6;
            last = now;
            stable
        })
        .await
    );

    clock.advance(chrono::Duration::days(1));
    for n in 501..=1_000u64 {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    assert_eq!(store.in_flight(), 0);
    assert_eq!(concat_objects(&store, "2026/07/31"), expected(1..=500u64));
    assert_eq!(
        concat_objects(&store, "2026/08/01"),
        expected(501..=1_000u64)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rolls_files_at_the_parts_per_file_limit() {
    let _ = &*TRACER;
    let limits = PartLimits {
        min_part_size: 512,
        max_parts_per_file: 4,
    };
    let store = Arc::new(MemoryStore::new(limits));
    let journal = test_builder("file-rollover")
        .shared_store(store.clone())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .limits(limits)
        .max_batch_size(10)
        .build()
        .await
        .unwrap();

    // Each batch of ten 100-byte entries exceeds the part minimum, so every
    // chunk becomes its own part: 20 parts over files of 4.
    let entries: Vec<String> = (1..=200u64).map(|n| format!("{n:0100}")).collect();
    for entry in &entries {
        journal.submit(entry.clone()).await.unwrap();
    }
    journal.close().await.unwrap();

    let keys: Vec<String> = store.objects().into_keys().collect();
    assert_eq!(keys.len(), 5);
    for (file_number, key) in keys.iter().enumerate() {
        assert!(
            key.ends_with(&format!("host-a-{file_number:06}.journal")),
            "unexpected key {key}"
        );
    }
    assert_eq!(store.in_flight(), 0);
    assert_eq!(concat_objects(&store, ""), expected(entries.iter()));
}

#[tokio::test(flavor = "multi_thread")]
async fn shards_fan_out_and_preserve_per_shard_order() {
    let _ = &*TRACER;
    let store = helpers::store();
    let journal = test_builder("sharded")
        .shared_store(store.clone())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(10)
        .shards(3)
        .build_sharded()
        .await
        .unwrap();
    assert_eq!(journal.shard_count(), 3);

    let total = 300u64;
    for n in 1..=total {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    let stats = journal.stats();
    assert_eq!(stats.enqueued, total);
    assert_eq!(stats.uploaded, total);
    assert_eq!(stats.queue.in_progress, 0);
    assert_eq!(store.in_flight(), 0);

    for shard in 0..3u64 {
        let entries = (1..=total).filter(|n| (n - 1) % 3 == shard);
        assert_eq!(
            concat_objects(&store, &format!("{shard}/")),
            expected(entries),
            "shard {shard} out of order"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_queue_payloads_are_dropped() {
    let _ = &*TRACER;
    let store = helpers::store();
    let provider = Arc::new(MemoryQueueProvider::new());
    let dir = helpers::scratch_dir("corrupt-task");
    let queue = provider.open(&dir, true).unwrap();
    queue
        .put("actions", Bytes::from_static(b"\xde\xad\xbe\xef"))
        .await
        .unwrap();

    let journal = test_builder("corrupt-task")
        .shared_store(store.clone())
        .queue_provider(provider)
        .max_batch_size(50)
        .build()
        .await
        .unwrap();
    for n in 1..=500u64 {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    assert_eq!(journal.stats().queue.in_progress, 0);
    assert_eq!(concat_objects(&store, ""), expected(1..=500u64));
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_counts_completed_and_pending_files_once() {
    let _ = &*TRACER;
    let limits = PartLimits {
        min_part_size: 64,
        max_parts_per_file: 4,
    };
    let store = Arc::new(MemoryStore::new(limits));
    let clock = ManualClock::new(chrono::Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap());
    let bucket = Bucket::from(BUCKET);

    // A finished file zero and a dangling multipart upload for the same key:
    // together they count as one prior file.
    let key = "2026/08/01/host-a-000000.journal";
    let seeded = store.init_multipart(&bucket, key).await.unwrap();
    let part = store
        .upload_part(&seeded, 1, Bytes::from_static(b"seeded\n"), true)
        .await
        .unwrap();
    store
        .complete_multipart(
            &seeded,
            &[s3_journal::store::PartUpload {
                part_number: 1,
                etag: part.etag,
            }],
        )
        .await
        .unwrap();
    store.init_multipart(&bucket, key).await.unwrap();

    let journal = test_builder("startup-counts")
        .shared_store(store.clone())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .limits(limits)
        .clock(clock)
        .max_batch_size(10)
        .build()
        .await
        .unwrap();
    for n in 1..=40u64 {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    // The dangling upload was finalized empty and the new process wrote
    // file one onward, leaving the seeded object untouched.
    assert_eq!(store.in_flight(), 0);
    assert_eq!(store.object(key).unwrap(), b"seeded\n");
    assert_eq!(
        concat_objects(&store, "2026/08/01/host-a-000001"),
        expected(1..=40u64)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_snapshot_serializes_with_queue_counters() {
    let _ = &*TRACER;
    let journal = test_builder("stats-snapshot")
        .shared_store(helpers::store())
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .max_batch_size(10)
        .build()
        .await
        .unwrap();
    for n in 1..=100u64 {
        journal.submit(n.to_string()).await.unwrap();
    }
    journal.close().await.unwrap();

    let snapshot = serde_json::to_value(journal.stats()).unwrap();
    assert_eq!(snapshot["enqueued"], 100);
    assert_eq!(snapshot["uploaded"], 100);
    assert_eq!(snapshot["queue"]["in-progress"], 0);
    assert_eq!(snapshot["queue"]["num-slabs"], 1);
    assert!(snapshot["queue"]["enqueued"].as_u64().unwrap() > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn builder_rejects_incomplete_configuration() {
    let missing_bucket = JournalBuilder::<String>::bytes()
        .local_directory("/tmp/unused")
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .build()
        .await
        .unwrap_err();
    assert_eq!(missing_bucket.kind(), ErrorKind::Config);

    let missing_encoder = JournalBuilder::<String>::new()
        .bucket(BUCKET)
        .local_directory("/tmp/unused")
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .build()
        .await
        .unwrap_err();
    assert_eq!(missing_encoder.kind(), ErrorKind::Config);

    let no_batch_bounds = JournalBuilder::<String>::bytes()
        .bucket(BUCKET)
        .local_directory("/tmp/unused")
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .no_batch_latency()
        .build()
        .await
        .unwrap_err();
    assert_eq!(no_batch_bounds.kind(), ErrorKind::Config);

    let bad_shards = JournalBuilder::<String>::bytes()
        .bucket(BUCKET)
        .local_directory("/tmp/unused")
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .store(MemoryStore::new(LIMITS))
        .shards(37)
        .build_sharded()
        .await
        .unwrap_err();
    assert_eq!(bad_shards.kind(), ErrorKind::Config);

    let bad_format = JournalBuilder::<String>::bytes()
        .bucket(BUCKET)
        .local_directory("/tmp/unused")
        .queue_provider(Arc::new(MemoryQueueProvider::new()))
        .directory_format("'events%Y")
        .build()
        .await
        .unwrap_err();
    assert_eq!(bad_format.kind(), ErrorKind::Config);
}
