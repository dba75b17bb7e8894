//! Container adapter — the supervisor variant driven by a container
//! registry snapshot instead of glob expansion.
//!
//! The adapter polls `ContainerRegistry::snapshot()` every
//! `path_update_interval_sec`, diffs the containers of its configured log
//! type, spawns a cloned child tailer for each new container log path, and
//! closes the tailer of each container that has been gone for
//! `detach_time_sec`.
//!
//! [`DockerRegistry`] is the production snapshot provider: a background
//! task lists containers over the Docker Engine API (Unix socket or TCP)
//! and refreshes an internal cache, so `snapshot()` never blocks on HTTP.

use crate::tailer::{FileTailer, TailerHandle};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use sml_core::checkpoint::CheckpointStore;
use sml_core::InputDescriptor;
use sml_output::FilterChain;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Registry seam
// ---------------------------------------------------------------------------

/// What the registry knows about one container.
#[derive(Debug, Clone)]
pub struct ContainerMeta {
    pub log_path: PathBuf,
    pub labels: BTreeMap<String, String>,
}

/// `log_type → container_id → metadata`.
pub type RegistrySnapshot = HashMap<String, HashMap<String, ContainerMeta>>;

/// Snapshot provider for discovered containers. Implementations keep the
/// snapshot cheap to read; any I/O happens behind the scenes.
pub trait ContainerRegistry: Send + Sync {
    fn snapshot(&self) -> RegistrySnapshot;
}

// ---------------------------------------------------------------------------
// ContainerAdapter
// ---------------------------------------------------------------------------

pub struct ContainerAdapter {
    input: Arc<InputDescriptor>,
    registry: Arc<dyn ContainerRegistry>,
    chain: Mutex<FilterChain>,
    store: Arc<CheckpointStore>,
    token: CancellationToken,
}

#[derive(Default)]
struct AdapterChildren {
    children: HashMap<String, TailerHandle>,
    missing_since: HashMap<String, Instant>,
}

pub struct AdapterHandle {
    token: CancellationToken,
    children: Arc<Mutex<AdapterChildren>>,
    worker: tokio::task::JoinHandle<()>,
}

impl AdapterHandle {
    pub fn child_count(&self) -> usize {
        self.children
            .lock()
            .expect("adapter children lock")
            .children
            .len()
    }

    /// True while a tailer for `container_id` is running.
    pub fn is_tailing(&self, container_id: &str) -> bool {
        self.children
            .lock()
            .expect("adapter children lock")
            .children
            .get(container_id)
            .map(|handle| !handle.is_closed())
            .unwrap_or(false)
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.worker.await;
        let handles: Vec<TailerHandle> = {
            let mut set = self.children.lock().expect("adapter children lock");
            set.missing_since.clear();
            set.children.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.request_close();
            handle.join().await;
        }
    }
}

impl ContainerAdapter {
    pub fn new(
        input: Arc<InputDescriptor>,
        registry: Arc<dyn ContainerRegistry>,
        chain: FilterChain,
        store: Arc<CheckpointStore>,
        token: CancellationToken,
    ) -> ContainerAdapter {
        ContainerAdapter {
            input,
            registry,
            chain: Mutex::new(chain),
            store,
            token,
        }
    }

    /// True once the registry reports at least one container of the
    /// configured log type.
    pub fn is_ready(&self) -> bool {
        self.registry
            .snapshot()
            .get(&self.input.log_type)
            .map(|containers| !containers.is_empty())
            .unwrap_or(false)
    }

    pub fn spawn(self) -> AdapterHandle {
        let children = Arc::new(Mutex::new(AdapterChildren::default()));
        let token = self.token.clone();
        let worker = tokio::spawn(adapter_worker(self, Arc::clone(&children)));
        AdapterHandle {
            token,
            children,
            worker,
        }
    }
}

async fn adapter_worker(adapter: ContainerAdapter, children: Arc<Mutex<AdapterChildren>>) {
    loop {
        poll_registry(&adapter, &children);
        tokio::select! {
            _ = adapter.token.cancelled() => return,
            _ = tokio::time::sleep(adapter.input.path_update_interval()) => {}
        }
    }
}

fn poll_registry(adapter: &ContainerAdapter, children: &Arc<Mutex<AdapterChildren>>) {
    let live = adapter
        .registry
        .snapshot()
        .remove(&adapter.input.log_type)
        .unwrap_or_default();

    let mut set = children.lock().expect("adapter children lock");
    set.children.retain(|_, handle| !handle.is_finished());

    for (container_id, meta) in &live {
        set.missing_since.remove(container_id);
        if !set.children.contains_key(container_id) {
            let handle = spawn_container_child(adapter, container_id, meta);
            set.children.insert(container_id.clone(), handle);
        }
    }

    let vanished: Vec<String> = set
        .children
        .keys()
        .filter(|id| !live.contains_key(*id))
        .cloned()
        .collect();
    for container_id in vanished {
        set.missing_since
            .entry(container_id)
            .or_insert_with(Instant::now);
    }

    let detach_time = adapter.input.detach_time();
    let expired: Vec<String> = set
        .missing_since
        .iter()
        .filter(|(_, since)| since.elapsed() >= detach_time)
        .map(|(id, _)| id.clone())
        .collect();
    for container_id in expired {
        set.missing_since.remove(&container_id);
        if let Some(handle) = set.children.remove(&container_id) {
            info!(container_id, "container gone, closing its tailer");
            handle.request_close();
        }
    }
}

fn spawn_container_child(
    adapter: &ContainerAdapter,
    container_id: &str,
    meta: &ContainerMeta,
) -> TailerHandle {
    info!(
        container_id,
        log_path = %meta.log_path.display(),
        "spawning tailer for container"
    );

    // Clone of the parent's descriptor with the container log path; the
    // child runs the single-file tail path without further spawning.
    let child_input = Arc::new(
        adapter
            .input
            .for_path(meta.log_path.display().to_string()),
    );
    let mut chain = adapter
        .chain
        .lock()
        .expect("prototype chain lock")
        .clone_chain();
    chain.set_input(Arc::clone(&child_input));

    let mut properties = BTreeMap::new();
    properties.insert("container_id".to_string(), container_id.to_string());
    for (key, value) in &meta.labels {
        properties.insert(format!("label.{key}"), value.clone());
    }

    FileTailer::new(
        child_input,
        vec![meta.log_path.clone()],
        chain,
        Arc::clone(&adapter.store),
    )
    .with_properties(properties)
    .spawn(adapter.token.child_token())
}

// ---------------------------------------------------------------------------
// DockerRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum DockerEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

/// Lists containers from the Docker Engine API and maps them to log types
/// through a configurable label.
pub struct DockerRegistry {
    endpoint: DockerEndpoint,
    log_type_label: String,
    containers_root: PathBuf,
    cache: RwLock<RegistrySnapshot>,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Labels", default)]
    labels: BTreeMap<String, String>,
}

impl ContainerRegistry for DockerRegistry {
    fn snapshot(&self) -> RegistrySnapshot {
        self.cache.read().expect("registry cache lock").clone()
    }
}

impl DockerRegistry {
    /// `endpoint` is `unix:///var/run/docker.sock` or `http://host:port`.
    pub fn new(
        endpoint: &str,
        log_type_label: &str,
        containers_root: impl Into<PathBuf>,
    ) -> anyhow::Result<DockerRegistry> {
        let endpoint = if let Some(path) = endpoint.strip_prefix("unix://") {
            DockerEndpoint::Unix(PathBuf::from(path))
        } else if let Some(rest) = endpoint
            .strip_prefix("http://")
            .or_else(|| endpoint.strip_prefix("tcp://"))
        {
            DockerEndpoint::Tcp(rest.trim_end_matches('/').to_string())
        } else {
            anyhow::bail!("unsupported docker endpoint: {endpoint}");
        };
        Ok(DockerRegistry {
            endpoint,
            log_type_label: log_type_label.to_string(),
            containers_root: containers_root.into(),
            cache: RwLock::new(RegistrySnapshot::new()),
        })
    }

    /// Start the background poll refreshing the snapshot cache.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.refresh().await {
                    warn!(%err, "docker registry refresh failed");
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        let body = self.fetch("/containers/json").await?;
        let containers: Vec<ContainerSummary> = serde_json::from_slice(&body)?;

        let mut snapshot = RegistrySnapshot::new();
        for container in containers {
            let Some(log_type) = container.labels.get(&self.log_type_label) else {
                continue;
            };
            let log_path = self
                .containers_root
                .join(&container.id)
                .join(format!("{}-json.log", container.id));
            snapshot
                .entry(log_type.clone())
                .or_default()
                .insert(
                    container.id.clone(),
                    ContainerMeta {
                        log_path,
                        labels: container.labels.clone(),
                    },
                );
        }

        debug!(
            log_types = snapshot.len(),
            "docker registry snapshot refreshed"
        );
        *self.cache.write().expect("registry cache lock") = snapshot;
        Ok(())
    }

    async fn fetch(&self, path_and_query: &str) -> anyhow::Result<Bytes> {
        match &self.endpoint {
            #[cfg(unix)]
            DockerEndpoint::Unix(socket) => {
                let stream = tokio::net::UnixStream::connect(socket).await?;
                request(TokioIo::new(stream), path_and_query).await
            }
            #[cfg(not(unix))]
            DockerEndpoint::Unix(_) => {
                anyhow::bail!("unix socket endpoints are only supported on unix hosts")
            }
            DockerEndpoint::Tcp(authority) => {
                let stream = tokio::net::TcpStream::connect(authority).await?;
                request(TokioIo::new(stream), path_and_query).await
            }
        }
    }
}

async fn request<T>(io: T, path_and_query: &str) -> anyhow::Result<Bytes>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(%err, "docker api connection closed");
        }
    });

    let request = Request::builder()
        .uri(path_and_query)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())?;
    let response = sender.send_request(request).await?;
    anyhow::ensure!(
        response.status().is_success(),
        "docker api returned {}",
        response.status()
    );
    Ok(response.into_body().collect().await?.to_bytes())
}
