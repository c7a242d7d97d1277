
use std::time::Duration;

use quorum_lite::machine::OpResult;
use quorum_lite::protocol::{
    ClientProtocol, ConsistencyLevel, QueryOp, QueryRequest, Rejection,
};
use quorum_lite::raft::state::{LogCommand, RaftRole};
use quorum_lite::PrimitiveType;
use test_harness::{wait_for, TestCluster, CLIENT_ORIGIN};

#[tokio::test]
async fn isolated_leader_cannot_commit() {
    let cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    cluster.registry.isolate(leader);

    // The cut leader's quorum lease expires, so a direct proposal to it is
    // refused rather than left hanging. A proposal accepted inside the lease
    // window can never resolve, so bound each attempt and keep polling.
    let rejected = wait_for(
        || async {
            matches!(
                tokio::time::timeout(
                    Duration::from_millis(100),
                    cluster.nodes[&leader].raft().propose_and_wait(LogCommand::Noop),
                )
                .await,
                Ok(Err(_))
            )
        },
        Duration::from_secs(2),
        Duration::from_millis(20),
    )
    .await;
    assert!(rejected, "isolated leader kept accepting writes");
}

#[tokio::test]
async fn majority_side_elects_and_serves_writes() {
    let cluster = TestCluster::new(3).await;
    let old_leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    cluster.registry.isolate(old_leader);

    // The two connected nodes elect among themselves.
    let new_leader = cluster
        .wait_for_new_leader(old_leader, Duration::from_secs(3))
        .await
        .expect("majority side failed to elect");
    assert_ne!(new_leader, old_leader);

    // Clients keep making progress through the majority side.
    let counter = cluster
        .primitives()
        .counter("during-partition")
        .build()
        .await
        .expect("create counter");
    counter.set(1).await.expect("write during partition");
    assert_eq!(counter.get().await.expect("read during partition"), 1);
}

#[tokio::test]
async fn healed_leader_steps_down_and_converges() {
    let cluster = TestCluster::new(3).await;
    let old_leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    cluster.registry.isolate(old_leader);
    cluster
        .wait_for_new_leader(old_leader, Duration::from_secs(3))
        .await
        .expect("no new leader");

    let counter = cluster
        .primitives()
        .counter("partition-write")
        .build()
        .await
        .expect("create counter");
    counter.set(5).await.expect("write during partition");

    cluster.registry.heal_node(old_leader);

    // The old leader sees the higher term and rejoins as a follower.
    let stepped_down = wait_for(
        || async {
            cluster.nodes[&old_leader].raft().state.read().await.role == RaftRole::Follower
        },
        Duration::from_secs(3),
        Duration::from_millis(20),
    )
    .await;
    assert!(stepped_down, "stale leader did not step down");

    // Every node converges on the same log, including the partition-era
    // write.
    let converged = wait_for(
        || async { cluster.verify_log_consistency().await },
        Duration::from_secs(3),
        Duration::from_millis(20),
    )
    .await;
    assert!(converged, "logs did not converge after healing");
    assert_eq!(counter.get().await.expect("read after heal"), 5);
}

#[tokio::test]
async fn cut_follower_serves_best_effort_but_rejects_sequential_reads() {
    let cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let primitives = cluster.primitives();
    primitives
        .counter("before-cut")
        .build()
        .await
        .expect("create counter");

    let follower = cluster
        .active_node_ids()
        .into_iter()
        .find(|&id| id != leader)
        .expect("no follower");
    let client = cluster.registry.client(CLIENT_ORIGIN);

    let names_query = |level, min_index| QueryRequest {
        query: QueryOp::PrimitiveNames {
            ty: PrimitiveType::Counter,
        },
        level,
        min_index,
    };

    // Let the follower apply the creation before cutting it off.
    let caught_up = wait_for(
        || async {
            match client
                .query(follower, names_query(ConsistencyLevel::BestEffort, 0))
                .await
            {
                Ok(resp) => matches!(
                    resp.result,
                    Ok(outcome)
                        if outcome.value == Ok(OpResult::Names(vec!["before-cut".to_string()]))
                ),
                Err(_) => false,
            }
        },
        Duration::from_secs(3),
        Duration::from_millis(20),
    )
    .await;
    assert!(caught_up, "follower never applied the creation");

    cluster.registry.isolate(follower);

    // A write the cut follower never sees.
    primitives
        .counter("after-cut")
        .build()
        .await
        .expect("create during cut");
    let floor = cluster.commit_index(leader).await;

    // Sequential honors the caller's read floor: the lagging replica must
    // refuse rather than answer from an older state.
    let resp = client
        .query(follower, names_query(ConsistencyLevel::Sequential, floor))
        .await
        .expect("follower reachable from clients");
    assert!(matches!(
        resp.result,
        Err(Rejection::LaggingReplica { applied }) if applied < floor
    ));

    // BestEffort answers immediately from whatever the replica has.
    let resp = client
        .query(follower, names_query(ConsistencyLevel::BestEffort, 0))
        .await
        .expect("follower reachable from clients");
    let outcome = resp.result.expect("best-effort outcome");
    assert_eq!(
        outcome.value,
        Ok(OpResult::Names(vec!["before-cut".to_string()]))
    );
}

#[tokio::test]
async fn minority_cannot_elect_a_leader() {
    let cluster = TestCluster::new(5).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    // Split 2 vs 3; only the side with three nodes can reach a majority.
    cluster.registry.partition(&[1, 2], &[3, 4, 5]);

    // A minority node may still carry the leader role from before the
    // split, but it must never commit anything.
    let minority_committed = wait_for(
        || async {
            for id in [1u64, 2] {
                let node = &cluster.nodes[&id];
                if node.raft().is_leader().await
                    && matches!(
                        tokio::time::timeout(
                            Duration::from_millis(100),
                            node.raft().propose_and_wait(LogCommand::Noop),
                        )
                        .await,
                        Ok(Ok(_))
                    )
                {
                    return true;
                }
            }
            false
        },
        Duration::from_millis(800),
        Duration::from_millis(50),
    )
    .await;
    assert!(!minority_committed, "minority side committed a write");

    // Meanwhile the majority side holds a working leader.
    let majority_leader = wait_for(
        || async {
            for id in [3u64, 4, 5] {
                if cluster.nodes[&id].raft().is_leader().await {
                    return true;
                }
            }
            false
        },
        Duration::from_secs(3),
        Duration::from_millis(20),
    )
    .await;
    assert!(majority_leader, "majority side has no leader");
}
