//! Configuration types for sml.
//!
//! [`Config::load`] layers a user TOML file over embedded defaults.
//! [`Config::defaults`] returns the same defaults without touching the
//! filesystem (useful in tests). Declared inputs and sinks are lists of
//! tables (`[[inputs]]`, `[[sinks]]`); both default to empty.

use crate::types::InputDescriptor;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[agent]
checkpoint_dir       = "/var/lib/sml/checkpoints"
checkpoint_extension = ".cp"
prune_checkpoints    = true

[docker]
endpoint        = "unix:///var/run/docker.sock"
log_type_label  = "io.sml.logtype"
containers_root = "/var/lib/docker/containers"
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub inputs: Vec<InputDescriptor>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_checkpoint_extension")]
    pub checkpoint_extension: String,
    #[serde(default = "default_prune_checkpoints")]
    pub prune_checkpoints: bool,
}

fn default_checkpoint_dir() -> PathBuf { PathBuf::from("/var/lib/sml/checkpoints") }
fn default_checkpoint_extension() -> String { ".cp".to_string() }
fn default_prune_checkpoints() -> bool { true }

impl Default for AgentConfig {
    fn default() -> AgentConfig {
        AgentConfig {
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_extension: default_checkpoint_extension(),
            prune_checkpoints: default_prune_checkpoints(),
        }
    }
}

/// `[docker]` section — how the container registry reaches the Docker
/// Engine API and maps containers to log types.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_log_type_label")]
    pub log_type_label: String,
    #[serde(default = "default_containers_root")]
    pub containers_root: PathBuf,
}

fn default_docker_endpoint() -> String { "unix:///var/run/docker.sock".to_string() }
fn default_log_type_label() -> String { "io.sml.logtype".to_string() }
fn default_containers_root() -> PathBuf { PathBuf::from("/var/lib/docker/containers") }

impl Default for DockerConfig {
    fn default() -> DockerConfig {
        DockerConfig {
            endpoint: default_docker_endpoint(),
            log_type_label: default_log_type_label(),
            containers_root: default_containers_root(),
        }
    }
}

/// One `[[sinks]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub path: PathBuf,
    #[serde(default)]
    pub id_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Jsonl,
}

impl Default for Config {
    fn default() -> Config {
        Config::defaults()
    }
}

impl Config {
    /// Load from `path`, layered on top of the built-in defaults.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Toml,
            ))
            .add_source(config::File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Toml,
            ))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Contract checks that fail fast at init rather than surfacing later as
    /// half-running inputs.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (index, input) in self.inputs.iter().enumerate() {
            if input.path.is_none() && !input.docker_enabled {
                anyhow::bail!("inputs[{index}]: needs either a path or docker_enabled = true");
            }
            if input.path.is_some() && input.docker_enabled {
                anyhow::bail!("inputs[{index}]: path and docker_enabled are exclusive");
            }
            if input.docker_enabled && input.log_type.is_empty() {
                anyhow::bail!("inputs[{index}]: docker inputs need a log_type to match containers");
            }
            if input.copy_file && input.process_file {
                anyhow::bail!("inputs[{index}]: copy_file requires process_file = false");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
