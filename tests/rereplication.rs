//! Re-replication after worker death

mod common;

use common::{heartbeat, host, kill, new_cluster, single_chunk_plan, Call, FakeWorkerClient, RepairMode, MB};
use shardfs::common::MasterConfig;
use shardfs::master::mapping::FileStatus;
use shardfs::ops::ReplicationEngine;
use std::collections::HashSet;
use tokio::time::Instant;

fn config(replicas: usize) -> MasterConfig {
    MasterConfig {
        replication_factor: replicas,
        ..Default::default()
    }
}

fn chunk_workers(cluster: &shardfs::Cluster, filename: &str) -> Vec<String> {
    cluster.mapping().get(filename).unwrap().unwrap().chunks[0]
        .workers
        .clone()
}

#[tokio::test]
async fn test_dead_replica_is_replaced_and_retained() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2"]))
        .unwrap();

    let dead = kill(&cluster, &["w1"], &[("w2", 200 * MB), ("w3", 200 * MB)]).await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(
        client.calls(),
        vec![Call::Rereplicate {
            host: host("w2"),
            chunk_id: "c0".into(),
            targets: vec![host("w3")],
        }]
    );
    assert_eq!(chunk_workers(&cluster, "a.bin"), vec!["w1", "w2", "w3"]);
    assert_eq!(report.replicas_added, 1);
    assert_eq!(report.chunks_checked, 1);
}

#[tokio::test]
async fn test_every_deficit_is_restored() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3", "w4"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    cluster.register_file("a.bin", 100_000_000).await.unwrap();

    let dead = kill(
        &cluster,
        &["w2"],
        &[("w1", 200 * MB), ("w3", 200 * MB), ("w4", 200 * MB)],
    )
    .await;
    ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    let alive = cluster.alive_ids().await;
    let plan = cluster.mapping().get("a.bin").unwrap().unwrap();
    for chunk in &plan.chunks {
        let alive_replicas = chunk.workers.iter().filter(|w| alive.contains(*w)).count();
        assert_eq!(alive_replicas, 2, "chunk {} under-replicated", chunk.id);
        let distinct: HashSet<&String> = chunk.workers.iter().collect();
        assert_eq!(distinct.len(), chunk.workers.len());
    }
    // chunks that lost w2 still list it
    assert!(plan
        .chunks
        .iter()
        .any(|c| c.workers.contains(&"w2".to_string())));
}

#[tokio::test]
async fn test_partial_success_is_not_retried() {
    let client = FakeWorkerClient::new();
    client.set_repair_mode(RepairMode::ConfirmFirst);
    let cluster = new_cluster(config(3), client.clone());
    let now = Instant::now();
    heartbeat(&cluster, "w1", 100 * MB, now).await;
    heartbeat(&cluster, "w2", 100 * MB, now).await;
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2"]))
        .unwrap();

    let dead = kill(
        &cluster,
        &["w1"],
        &[("w2", 100 * MB), ("w3", 300 * MB), ("w4", 200 * MB)],
    )
    .await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(
        client.rereplicate_calls(),
        vec![Call::Rereplicate {
            host: host("w2"),
            chunk_id: "c0".into(),
            targets: vec![host("w3"), host("w4")],
        }]
    );
    assert_eq!(report.partial, 1);
    assert_eq!(report.replicas_added, 1);
    assert_eq!(chunk_workers(&cluster, "a.bin"), vec!["w1", "w2", "w3"]);
}

#[tokio::test]
async fn test_failed_rpc_leaves_mapping_untouched() {
    let client = FakeWorkerClient::new();
    client.set_repair_mode(RepairMode::Fail);
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2"]))
        .unwrap();

    let dead = kill(&cluster, &["w1"], &[("w2", 200 * MB), ("w3", 200 * MB)]).await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.replicas_added, 0);
    assert_eq!(chunk_workers(&cluster, "a.bin"), vec!["w1", "w2"]);
}

#[tokio::test]
async fn test_chunk_without_survivors_is_reported() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2"]))
        .unwrap();

    let dead = kill(&cluster, &["w1", "w2"], &[("w3", 200 * MB)]).await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(report.unrecoverable, 1);
    assert!(client.calls().is_empty());
    assert_eq!(chunk_workers(&cluster, "a.bin"), vec!["w1", "w2"]);
}

#[tokio::test]
async fn test_satisfied_chunk_keeps_dead_id() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2", "w3"]))
        .unwrap();

    let dead = kill(&cluster, &["w1"], &[("w2", 200 * MB), ("w3", 200 * MB)]).await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(report.chunks_satisfied, 1);
    assert!(client.calls().is_empty());
    assert_eq!(chunk_workers(&cluster, "a.bin"), vec!["w1", "w2", "w3"]);
}

#[tokio::test]
async fn test_candidate_limit_bounds_fan_out() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(
        MasterConfig {
            replication_factor: 3,
            candidate_limit: 1,
            ..Default::default()
        },
        client.clone(),
    );
    let now = Instant::now();
    heartbeat(&cluster, "w1", 100 * MB, now).await;
    heartbeat(&cluster, "w2", 100 * MB, now).await;
    cluster
        .mapping()
        .save(single_chunk_plan("a.bin", "c0", &["w1", "w2"]))
        .unwrap();

    let dead = kill(
        &cluster,
        &["w1"],
        &[("w2", 100 * MB), ("w3", 300 * MB), ("w4", 200 * MB)],
    )
    .await;
    ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(
        client.rereplicate_calls(),
        vec![Call::Rereplicate {
            host: host("w2"),
            chunk_id: "c0".into(),
            targets: vec![host("w3")],
        }]
    );
}

#[tokio::test]
async fn test_files_being_deleted_are_skipped() {
    let client = FakeWorkerClient::new();
    let cluster = new_cluster(config(2), client.clone());
    let now = Instant::now();
    for id in ["w1", "w2", "w3"] {
        heartbeat(&cluster, id, 200 * MB, now).await;
    }
    let mut plan = single_chunk_plan("a.bin", "c0", &["w1", "w2"]);
    plan.status = FileStatus::Deleting;
    cluster.mapping().save(plan).unwrap();
    cluster
        .mapping()
        .save(single_chunk_plan("b.bin", "b0", &["w2", "w3"]))
        .unwrap();

    let dead = kill(&cluster, &["w1"], &[("w2", 200 * MB), ("w3", 200 * MB)]).await;
    let report = ReplicationEngine::new(cluster.clone())
        .handle_dead_workers(&dead)
        .await;

    assert_eq!(report.chunks_checked, 0);
    assert!(client.calls().is_empty());
}
