//! Agent assembly — wires config into running supervisors, adapters, and
//! the shared output manager, and owns orderly shutdown.

use anyhow::Context;
use sml_core::checkpoint::CheckpointStore;
use sml_core::config::{Config, SinkKind};
use sml_core::InputDescriptor;
use sml_feeds::docker::AdapterHandle;
use sml_feeds::{ContainerAdapter, DockerRegistry, InputSupervisor, SupervisorHandle};
use sml_output::{
    ConfiguredLevels, FilterChain, JsonFilter, JsonlSink, MessageFilter, OutputManager, Sink,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running agent: every worker hangs off `token`, so shutdown is one
/// cancel plus an orderly join.
pub struct Agent {
    token: CancellationToken,
    supervisors: Vec<SupervisorHandle>,
    adapters: Vec<AdapterHandle>,
    registry_refresh: Option<tokio::task::JoinHandle<()>>,
    output: Arc<OutputManager>,
}

impl Agent {
    /// Validate config, build the pipeline, start every input.
    pub fn start(config: Config) -> anyhow::Result<Agent> {
        config.validate()?;

        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        for sink_config in &config.sinks {
            match sink_config.kind {
                SinkKind::Jsonl => {
                    let sink =
                        JsonlSink::create(&sink_config.path, sink_config.id_fields.clone())
                            .with_context(|| {
                                format!("creating jsonl sink at {}", sink_config.path.display())
                            })?;
                    sinks.push(Arc::new(sink));
                }
            }
        }
        anyhow::ensure!(!sinks.is_empty(), "at least one sink must be configured");

        let output = Arc::new(OutputManager::new(sinks, Arc::new(ConfiguredLevels)));
        let store = Arc::new(
            CheckpointStore::open(
                &config.agent.checkpoint_dir,
                &config.agent.checkpoint_extension,
            )
            .context("opening checkpoint store")?,
        );
        if config.agent.prune_checkpoints {
            let pruned = store.prune_stale();
            if pruned > 0 {
                info!(pruned, "pruned stale checkpoints");
            }
        }

        let token = CancellationToken::new();

        let registry = if config.inputs.iter().any(|input| input.docker_enabled) {
            let registry = Arc::new(DockerRegistry::new(
                &config.docker.endpoint,
                &config.docker.log_type_label,
                &config.docker.containers_root,
            )?);
            Some(registry)
        } else {
            None
        };

        let mut supervisors = Vec::new();
        let mut adapters = Vec::new();
        let mut registry_refresh = None;

        for input in &config.inputs {
            let input = Arc::new(input.clone());
            let chain = base_chain(&input, Arc::clone(&output));

            if input.docker_enabled {
                let registry = registry.clone().expect("validated docker input");
                if registry_refresh.is_none() {
                    registry_refresh = Some(Arc::clone(&registry).spawn_refresh(
                        input.path_update_interval(),
                        token.child_token(),
                    ));
                }
                let adapter = ContainerAdapter::new(
                    Arc::clone(&input),
                    registry,
                    chain,
                    Arc::clone(&store),
                    token.child_token(),
                );
                info!(log_type = %input.log_type, "starting container adapter");
                adapters.push(adapter.spawn());
            } else {
                let supervisor = InputSupervisor::new(
                    Arc::clone(&input),
                    chain,
                    Arc::clone(&store),
                    token.child_token(),
                );
                info!(input = %input.cache_key(), ready = supervisor.is_ready(), "starting input");
                supervisors.push(supervisor.spawn());
            }
        }

        Ok(Agent {
            token,
            supervisors,
            adapters,
            registry_refresh,
            output,
        })
    }

    pub fn output(&self) -> &Arc<OutputManager> {
        &self.output
    }

    /// Stop every worker, flush final checkpoints, drain the sinks.
    pub async fn shutdown(self) {
        self.token.cancel();
        for supervisor in self.supervisors {
            supervisor.shutdown().await;
        }
        for adapter in self.adapters {
            adapter.shutdown().await;
        }
        if let Some(refresh) = self.registry_refresh {
            let _ = refresh.await;
        }
        self.output.close().await;
    }
}

fn base_chain(input: &Arc<InputDescriptor>, output: Arc<OutputManager>) -> FilterChain {
    let mut chain = FilterChain::new(output)
        .with(JsonFilter::new())
        .with(MessageFilter::new());
    chain.set_input(Arc::clone(input));
    chain
}
