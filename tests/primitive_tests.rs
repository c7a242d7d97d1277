
use std::time::Duration;

use quorum_lite::primitives::Ordering;
use quorum_lite::{BincodeSerializer, PrimitiveType, QuorumError, Serializer};
use serde::{Deserialize, Serialize};
use test_harness::TestCluster;

async fn ready_cluster(n: usize) -> TestCluster {
    let cluster = TestCluster::new(n).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");
    cluster
}

#[tokio::test]
async fn creation_is_idempotent_across_clients() {
    let cluster = ready_cluster(3).await;

    let first = cluster
        .primitives()
        .counter("shared")
        .build()
        .await
        .expect("first build");
    let second = cluster
        .primitives()
        .counter("shared")
        .build()
        .await
        .expect("second build");

    // Both handles resolve to the same replicated instance.
    first.set(10).await.expect("set via first");
    assert_eq!(second.get().await.expect("get via second"), 10);
}

#[tokio::test]
async fn creation_with_conflicting_type_is_rejected() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    primitives
        .counter("taken")
        .build()
        .await
        .expect("counter build");

    let err = primitives
        .map::<String>("taken")
        .build()
        .await
        .err()
        .expect("map build over a counter name must fail");
    assert!(matches!(err, QuorumError::Primitive(_)));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    score: u32,
}

#[tokio::test]
async fn map_round_trips_typed_values() {
    let cluster = ready_cluster(3).await;
    let map = cluster
        .primitives()
        .map::<Profile>("profiles")
        .build()
        .await
        .expect("map build");

    let alice = Profile {
        name: "alice".to_string(),
        score: 12,
    };
    assert_eq!(map.put("alice", &alice).await.expect("put"), None);
    assert_eq!(map.get("alice").await.expect("get"), Some(alice.clone()));

    let updated = Profile {
        name: "alice".to_string(),
        score: 13,
    };
    assert_eq!(
        map.put("alice", &updated).await.expect("overwrite"),
        Some(alice)
    );

    assert_eq!(map.keys().await.expect("keys"), vec!["alice".to_string()]);
    assert_eq!(map.len().await.expect("len"), 1);
    assert_eq!(map.remove("alice").await.expect("remove"), Some(updated));
    assert!(map.is_empty().await.expect("is_empty"));
}

/// Wraps bincode behind a one-byte frame marker so a mismatched codec is
/// caught instead of misread.
#[derive(Clone, Copy, Default)]
struct FramedSerializer;

impl Serializer for FramedSerializer {
    fn encode<T: serde::Serialize>(&self, value: &T) -> quorum_lite::Result<Vec<u8>> {
        let mut bytes = vec![0xF5];
        bytes.extend(BincodeSerializer.encode(value)?);
        Ok(bytes)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, bytes: &[u8]) -> quorum_lite::Result<T> {
        match bytes.split_first() {
            Some((0xF5, rest)) => BincodeSerializer.decode(rest),
            _ => Err(QuorumError::Serialization("missing frame marker".to_string())),
        }
    }
}

#[tokio::test]
async fn map_builder_accepts_a_custom_serializer() {
    let cluster = ready_cluster(3).await;
    let map = cluster
        .primitives()
        .map::<String>("framed")
        .with_serializer(FramedSerializer)
        .build()
        .await
        .expect("map build");

    map.put("k", &"v".to_string()).await.expect("put");
    assert_eq!(map.get("k").await.expect("get"), Some("v".to_string()));

    // A handle reading the same instance with the default codec sees bytes
    // it cannot decode.
    let plain = cluster
        .primitives()
        .map::<String>("framed")
        .build()
        .await
        .expect("second build");
    assert!(matches!(
        plain.get("k").await,
        Err(QuorumError::Serialization(_))
    ));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Ticket {
    holder: String,
}

#[tokio::test]
async fn map_handles_are_cloneable_regardless_of_value_type() {
    let cluster = ready_cluster(3).await;
    let map = cluster
        .primitives()
        .map::<Ticket>("tickets")
        .build()
        .await
        .expect("map build");

    // Ticket itself is not Clone; only the handle is.
    let other = map.clone();
    map.put(
        "t1",
        &Ticket {
            holder: "alice".to_string(),
        },
    )
    .await
    .expect("put");
    assert_eq!(
        other.get("t1").await.expect("get via clone"),
        Some(Ticket {
            holder: "alice".to_string(),
        })
    );
}

#[tokio::test]
async fn counter_map_tracks_keys_independently() {
    let cluster = ready_cluster(3).await;
    let counters = cluster
        .primitives()
        .counter_map("hits")
        .build()
        .await
        .expect("counter map build");

    // Unwritten keys read as zero.
    assert_eq!(counters.get("api").await.expect("get"), 0);

    assert_eq!(
        counters.get_and_add("api", 5).await.expect("get_and_add"),
        0
    );
    assert_eq!(counters.increment_and_get("web").await.expect("incr"), 1);
    assert_eq!(counters.get("api").await.expect("get"), 5);
    assert_eq!(counters.size().await.expect("size"), 2);

    assert_eq!(counters.put("api", 100).await.expect("put"), 5);
    assert_eq!(counters.remove("api").await.expect("remove"), 100);
    assert_eq!(counters.get("api").await.expect("removed get"), 0);
    assert_eq!(counters.size().await.expect("size"), 1);
}

#[tokio::test]
async fn multimap_holds_distinct_values_per_key() {
    let cluster = ready_cluster(3).await;
    let multimap = cluster
        .primitives()
        .multimap("tags")
        .build()
        .await
        .expect("multimap build");

    assert!(multimap.put("a", b"x".to_vec()).await.expect("put x"));
    assert!(multimap.put("a", b"y".to_vec()).await.expect("put y"));
    assert!(!multimap.put("a", b"x".to_vec()).await.expect("dup put"));

    assert_eq!(
        multimap.get("a").await.expect("get"),
        vec![b"x".to_vec(), b"y".to_vec()]
    );
    assert!(multimap.remove("a", b"x".to_vec()).await.expect("remove"));
    assert_eq!(multimap.get("a").await.expect("get"), vec![b"y".to_vec()]);
}

#[tokio::test]
async fn set_add_remove_contains() {
    let cluster = ready_cluster(3).await;
    let set = cluster
        .primitives()
        .set("members")
        .build()
        .await
        .expect("set build");

    assert!(set.add(b"a".to_vec()).await.expect("add"));
    assert!(!set.add(b"a".to_vec()).await.expect("dup add"));
    assert!(set.contains(b"a".to_vec()).await.expect("contains"));
    assert_eq!(set.len().await.expect("len"), 1);
    assert!(set.remove(b"a".to_vec()).await.expect("remove"));
    assert!(!set.contains(b"a".to_vec()).await.expect("contains"));
}

#[tokio::test]
async fn value_set_returns_previous() {
    let cluster = ready_cluster(3).await;
    let value = cluster
        .primitives()
        .value("config")
        .build()
        .await
        .expect("value build");

    assert_eq!(value.get().await.expect("empty get"), None);
    assert_eq!(value.set(b"v1".to_vec()).await.expect("set"), None);
    assert_eq!(
        value.set(b"v2".to_vec()).await.expect("replace"),
        Some(b"v1".to_vec())
    );
    assert_eq!(value.get().await.expect("get"), Some(b"v2".to_vec()));
}

#[tokio::test]
async fn work_queue_hands_each_task_to_one_poller() {
    let cluster = ready_cluster(3).await;
    let queue = cluster
        .primitives()
        .work_queue("jobs")
        .build()
        .await
        .expect("queue build");

    queue.add(b"t1".to_vec()).await.expect("add t1");
    queue.add(b"t2".to_vec()).await.expect("add t2");
    assert_eq!(queue.len().await.expect("len"), 2);

    // Poll removes, so the same task is never delivered twice.
    assert_eq!(queue.poll().await.expect("poll"), Some(b"t1".to_vec()));
    assert_eq!(queue.poll().await.expect("poll"), Some(b"t2".to_vec()));
    assert_eq!(queue.poll().await.expect("poll empty"), None);
}

#[tokio::test]
async fn lock_is_exclusive_between_sessions() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    let alice = primitives.lock("mutex").build().await.expect("lock build");
    let bob = primitives.lock("mutex").build().await.expect("lock build");

    assert!(alice.try_acquire().await.expect("acquire"));
    assert!(!bob.try_acquire().await.expect("contended acquire"));
    assert!(alice.is_locked().await.expect("is_locked"));

    // Only the holder may release.
    let err = bob.release().await.expect_err("non-holder release");
    assert!(matches!(err, QuorumError::Primitive(_)));

    alice.release().await.expect("release");
    assert!(bob.try_acquire().await.expect("acquire after release"));
}

#[tokio::test]
async fn lock_acquire_waits_for_release() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    let holder = primitives.lock("gate").build().await.expect("lock build");
    let waiter = primitives.lock("gate").build().await.expect("lock build");

    assert!(holder.try_acquire().await.expect("acquire"));

    let waiting = tokio::spawn(async move {
        waiter.acquire(Duration::from_secs(3)).await.expect("acquire");
        waiter
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    holder.release().await.expect("release");

    let waiter = waiting.await.expect("waiter task");
    assert!(waiter.is_locked().await.expect("is_locked"));
}

#[tokio::test]
async fn elector_promotes_next_candidate_on_withdrawal() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    let first = primitives
        .elector("coordinator")
        .build()
        .await
        .expect("elector build");
    let second = primitives
        .elector("coordinator")
        .build()
        .await
        .expect("elector build");

    assert_eq!(
        first.run(b"n1".to_vec()).await.expect("run n1"),
        Some(b"n1".to_vec())
    );
    assert_eq!(
        second.run(b"n2".to_vec()).await.expect("run n2"),
        Some(b"n1".to_vec())
    );

    assert_eq!(
        first.withdraw().await.expect("withdraw"),
        Some(b"n2".to_vec())
    );
    assert_eq!(
        second.leadership().await.expect("leadership"),
        Some(b"n2".to_vec())
    );
}

#[tokio::test]
async fn tree_children_respect_creation_ordering() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    let natural = primitives.tree("nat").build().await.expect("tree build");
    natural.set("/app/b", b"1".to_vec()).await.expect("set b");
    natural.set("/app/a", b"2".to_vec()).await.expect("set a");
    assert_eq!(
        natural.children("/app").await.expect("children"),
        vec!["a".to_string(), "b".to_string()]
    );

    let insertion = primitives
        .tree("ins")
        .with_ordering(Ordering::Insertion)
        .build()
        .await
        .expect("tree build");
    insertion.set("/app/b", b"1".to_vec()).await.expect("set b");
    insertion.set("/app/a", b"2".to_vec()).await.expect("set a");
    assert_eq!(
        insertion.children("/app").await.expect("children"),
        vec!["b".to_string(), "a".to_string()]
    );
}

#[tokio::test]
async fn primitive_names_lists_by_type() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    primitives.counter("c2").build().await.expect("c2");
    primitives.counter("c1").build().await.expect("c1");
    primitives.lock("l1").build().await.expect("l1");

    assert_eq!(
        primitives
            .primitive_names(PrimitiveType::Counter)
            .await
            .expect("names"),
        vec!["c1".to_string(), "c2".to_string()]
    );
    assert_eq!(
        primitives
            .primitive_names(PrimitiveType::Lock)
            .await
            .expect("names"),
        vec!["l1".to_string()]
    );
    assert!(primitives
        .primitive_names(PrimitiveType::Tree)
        .await
        .expect("names")
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_facade_works_off_the_runtime() {
    let cluster = ready_cluster(3).await;
    let counter = cluster
        .primitives()
        .counter("sync")
        .build()
        .await
        .expect("build counter");

    let facade = counter.blocking();
    let value = tokio::task::spawn_blocking(move || -> quorum_lite::Result<i64> {
        facade.set(4)?;
        facade.get_and_add(3)?;
        facade.get()
    })
    .await
    .expect("blocking task")
    .expect("blocking operations");
    assert_eq!(value, 7);

    // The async handle observes the facade's writes.
    assert_eq!(counter.get().await.expect("async get"), 7);
}

#[tokio::test]
async fn delete_frees_the_name_for_reuse() {
    let cluster = ready_cluster(3).await;
    let primitives = cluster.primitives();

    primitives.counter("temp").build().await.expect("build");
    assert!(primitives.delete("temp").await.expect("delete"));
    assert!(!primitives.delete("temp").await.expect("second delete"));

    // The name can now be reused with a different type.
    primitives
        .map::<String>("temp")
        .build()
        .await
        .expect("rebuild as map");
}
