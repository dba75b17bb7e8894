//! Container adapter and Docker registry integration harness.
//!
//! # What this covers
//!
//! - **Churn**: when the registry snapshot moves from container c1 to c2,
//!   the c1 tailer is closed within `path_update + detach_time` and a c2
//!   tailer takes over, with no identity overlap.
//! - **Readiness**: the adapter is ready only once the registry reports a
//!   container of its log type.
//! - **DockerRegistry over HTTP**: `/containers/json` responses become
//!   snapshots keyed by the configured label.
//!
//! # Running
//!
//! ```sh
//! cargo test --test docker_harness
//! ```

mod common;
use common::*;

use common::fake_docker_api::FakeDockerApi;
use sml_feeds::docker::{ContainerMeta, ContainerRegistry, RegistrySnapshot};
use sml_feeds::{ContainerAdapter, DockerRegistry};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(8);

/// Registry whose snapshot the test swaps at will.
#[derive(Default)]
struct FakeRegistry {
    snapshot: Mutex<RegistrySnapshot>,
}

impl FakeRegistry {
    fn set(&self, log_type: &str, containers: &[(&str, &Path)]) {
        let mut by_id = HashMap::new();
        for (id, log_path) in containers {
            by_id.insert(
                id.to_string(),
                ContainerMeta {
                    log_path: log_path.to_path_buf(),
                    labels: BTreeMap::new(),
                },
            );
        }
        let mut snapshot = RegistrySnapshot::new();
        snapshot.insert(log_type.to_string(), by_id);
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

impl ContainerRegistry for FakeRegistry {
    fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Adapter churn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn container_churn_swaps_tailers() {
    let dir = tempfile::tempdir().unwrap();
    let c1_log = dir.path().join("c1.json");
    let c2_log = dir.path().join("c2.json");
    append_line(&c1_log, "from c1");
    append_line(&c2_log, "from c2");

    let registry = Arc::new(FakeRegistry::default());
    registry.set("svc", &[("c1", &c1_log)]);

    let pipeline = TestPipeline::new(dir.path());
    let input = Arc::new(docker_input("svc"));
    let adapter = ContainerAdapter::new(
        Arc::clone(&input),
        Arc::clone(&registry) as Arc<dyn ContainerRegistry>,
        pipeline.chain_for(&input),
        Arc::clone(&pipeline.store),
        CancellationToken::new(),
    );
    assert!(adapter.is_ready());
    let handle = adapter.spawn();

    pipeline.sink.wait_for_records(1, WAIT).await;
    assert_eq!(pipeline.sink.messages(), vec!["from c1"]);
    assert!(handle.is_tailing("c1"));

    // c1 leaves, c2 arrives.
    registry.set("svc", &[("c2", &c2_log)]);

    pipeline.sink.wait_for_records(2, WAIT).await;
    assert_eq!(pipeline.sink.messages(), vec!["from c1", "from c2"]);
    assert!(handle.is_tailing("c2"));
    assert!(wait_until(WAIT, || !handle.is_tailing("c1")).await);
    assert!(wait_until(WAIT, || handle.child_count() == 1).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn adapter_is_not_ready_without_matching_containers() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(FakeRegistry::default());
    registry.set("other-type", &[]);

    let pipeline = TestPipeline::new(dir.path());
    let input = Arc::new(docker_input("svc"));
    let adapter = ContainerAdapter::new(
        Arc::clone(&input),
        Arc::clone(&registry) as Arc<dyn ContainerRegistry>,
        pipeline.chain_for(&input),
        Arc::clone(&pipeline.store),
        CancellationToken::new(),
    );
    assert!(!adapter.is_ready());
}

// ---------------------------------------------------------------------------
// DockerRegistry against the fake Engine API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn docker_registry_builds_snapshots_from_the_engine_api() {
    let api = FakeDockerApi::start().await.unwrap();
    let mut labels = BTreeMap::new();
    labels.insert("io.sml.logtype".to_string(), "svc".to_string());
    api.add_container("c1", labels.clone());
    api.add_container("unlabelled", BTreeMap::new());

    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(
        DockerRegistry::new(&api.base_url(), "io.sml.logtype", dir.path()).unwrap(),
    );
    let token = CancellationToken::new();
    let refresh = Arc::clone(&registry).spawn_refresh(Duration::from_millis(200), token.clone());

    assert!(
        wait_until(WAIT, || {
            registry
                .snapshot()
                .get("svc")
                .is_some_and(|containers| containers.contains_key("c1"))
        })
        .await
    );

    let snapshot = registry.snapshot();
    let meta = &snapshot["svc"]["c1"];
    assert!(meta.log_path.ends_with("c1/c1-json.log"));
    assert_eq!(meta.labels.get("io.sml.logtype").map(String::as_str), Some("svc"));
    // Containers without the label are ignored entirely.
    assert_eq!(snapshot.len(), 1);

    api.remove_container("c1");
    assert!(wait_until(WAIT, || registry.snapshot().is_empty()).await);

    token.cancel();
    let _ = refresh.await;
}
