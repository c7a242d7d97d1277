
use std::time::Duration;

use quorum_lite::machine::{OpResult, PrimitiveOp};
use quorum_lite::protocol::messages::QueryOp;
use quorum_lite::raft::state::LogCommand;
use quorum_lite::{ConsistencyLevel, QuorumError};
use test_harness::TestCluster;

#[tokio::test]
async fn command_finds_the_leader_without_a_hint() {
    let cluster = TestCluster::new(3).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    // A fresh dispatcher has no idea who leads; it probes and follows the
    // rejection hints.
    let dispatcher = cluster.dispatcher();
    let outcome = dispatcher
        .command(LogCommand::CreateResource {
            name: "probe".to_string(),
            ty: quorum_lite::PrimitiveType::Counter,
            ordering: quorum_lite::Ordering::Natural,
        })
        .await
        .expect("command should reach the leader");
    assert!(outcome.index > 0);
    assert!(matches!(outcome.value, Ok(OpResult::Resource(_))));
}

#[tokio::test]
async fn command_retries_across_leader_change() {
    let mut cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let dispatcher = cluster.dispatcher();
    let first = dispatcher
        .command(LogCommand::CreateResource {
            name: "movable".to_string(),
            ty: quorum_lite::PrimitiveType::Counter,
            ordering: quorum_lite::Ordering::Natural,
        })
        .await
        .expect("first command");
    let resource = match first.value {
        Ok(OpResult::Resource(id)) => id,
        other => panic!("unexpected creation result: {other:?}"),
    };

    // The dispatcher now holds a stale leader hint; the next write must
    // discover the replacement on its own.
    cluster.shutdown_node(leader).await;
    cluster
        .wait_for_new_leader(leader, Duration::from_secs(3))
        .await
        .expect("no new leader");

    dispatcher
        .command(LogCommand::Apply {
            resource,
            op: PrimitiveOp::CounterAdd(1),
        })
        .await
        .expect("command after leader change");
}

#[tokio::test]
async fn leader_query_reports_elected_node() {
    let cluster = TestCluster::new(3).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let dispatcher = cluster.dispatcher();
    // Best-effort may land on a follower that has not heard a heartbeat
    // yet, so poll briefly.
    let mut reported = None;
    for _ in 0..20 {
        reported = dispatcher.leader().await.expect("leader query");
        if reported == Some(leader) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(reported, Some(leader));
}

#[tokio::test]
async fn linearizable_query_observes_prior_write() {
    let cluster = TestCluster::new(3).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let dispatcher = cluster.dispatcher();
    let outcome = dispatcher
        .command(LogCommand::CreateResource {
            name: "linear".to_string(),
            ty: quorum_lite::PrimitiveType::Counter,
            ordering: quorum_lite::Ordering::Natural,
        })
        .await
        .expect("create");
    let resource = match outcome.value {
        Ok(OpResult::Resource(id)) => id,
        other => panic!("unexpected creation result: {other:?}"),
    };

    dispatcher
        .command(LogCommand::Apply {
            resource,
            op: PrimitiveOp::CounterSet(5),
        })
        .await
        .expect("set");

    let value = dispatcher
        .query(
            QueryOp::Primitive {
                resource,
                op: PrimitiveOp::CounterGet,
            },
            ConsistencyLevel::Linearizable,
        )
        .await
        .expect("linearizable read");
    assert_eq!(value, OpResult::Long(5));
}

#[tokio::test]
async fn unknown_resource_error_is_not_retried_into_timeout() {
    let cluster = TestCluster::new(3).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let dispatcher = cluster.dispatcher();
    let err = dispatcher
        .query(
            QueryOp::Primitive {
                resource: 12345,
                op: PrimitiveOp::CounterGet,
            },
            ConsistencyLevel::Linearizable,
        )
        .await
        .expect_err("query of missing resource must fail");
    assert!(matches!(err, QuorumError::Primitive(_)));
}

#[tokio::test]
async fn read_floor_rises_with_observed_writes() {
    let cluster = TestCluster::new(3).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("no leader");

    let dispatcher = cluster.dispatcher();
    assert_eq!(dispatcher.read_floor(), 0);

    let outcome = dispatcher
        .command(LogCommand::CreateResource {
            name: "floor".to_string(),
            ty: quorum_lite::PrimitiveType::Counter,
            ordering: quorum_lite::Ordering::Natural,
        })
        .await
        .expect("create");

    assert!(dispatcher.read_floor() >= outcome.index);
}
