//! Test builders — descriptors with test-friendly intervals and a
//! pre-assembled pipeline (sink → manager → store → chain).

use sml_core::checkpoint::CheckpointStore;
use sml_core::{InputDescriptor, InputMarker};
use sml_output::{
    ConfiguredLevels, FilterChain, JsonFilter, MessageFilter, OutputManager, Sink,
};
use std::path::Path;
use std::sync::Arc;

use super::memory_sink::MemorySink;

/// A follow-mode input with intervals shrunk so harnesses finish quickly.
pub fn tail_input(pattern: &str) -> InputDescriptor {
    InputDescriptor {
        log_type: "test".to_string(),
        path: Some(pattern.to_string()),
        tail: true,
        checkpoint_interval_ms: 100,
        path_update_interval_sec: 1,
        detach_interval_sec: 1,
        detach_time_sec: 1,
        ..InputDescriptor::default()
    }
}

/// A one-shot input (`tail = false`) with the same fast intervals.
pub fn oneshot_input(pattern: &str) -> InputDescriptor {
    InputDescriptor {
        tail: false,
        ..tail_input(pattern)
    }
}

/// A docker-enabled input for the given log type.
pub fn docker_input(log_type: &str) -> InputDescriptor {
    InputDescriptor {
        log_type: log_type.to_string(),
        path: None,
        docker_enabled: true,
        ..tail_input("")
    }
}

/// Everything a tailer needs, wired to a [`MemorySink`].
pub struct TestPipeline {
    pub sink: Arc<MemorySink>,
    pub output: Arc<OutputManager>,
    pub store: Arc<CheckpointStore>,
}

impl TestPipeline {
    /// Build a pipeline whose checkpoint store lives under `dir`.
    pub fn new(dir: &Path) -> TestPipeline {
        TestPipeline::with_sink(dir, MemorySink::new())
    }

    pub fn with_sink(dir: &Path, sink: Arc<MemorySink>) -> TestPipeline {
        let output = Arc::new(OutputManager::new(
            vec![Arc::clone(&sink) as Arc<dyn Sink>],
            Arc::new(ConfiguredLevels),
        ));
        let store = Arc::new(
            CheckpointStore::open(dir.join("checkpoints"), ".cp")
                .expect("checkpoint store opens"),
        );
        TestPipeline {
            sink,
            output,
            store,
        }
    }

    /// The default agent chain, bound to `input`.
    pub fn chain_for(&self, input: &Arc<InputDescriptor>) -> FilterChain {
        let mut chain = FilterChain::new(Arc::clone(&self.output))
            .with(JsonFilter::new())
            .with(MessageFilter::new());
        chain.set_input(Arc::clone(input));
        chain
    }
}

/// A marker for `input` at the given line number.
pub fn marker_for(input: &Arc<InputDescriptor>, line_number: u64) -> InputMarker {
    InputMarker::new(Arc::clone(input)).with_line(line_number)
}
