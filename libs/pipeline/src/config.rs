use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use sentiment_api::PipelineError;
use topic_engine::{RedeliveryPolicy, TopicOptions};

use crate::error::ConfigError;

pub const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const DATASTORE_ENDPOINT: &str = "https://datastore.googleapis.com";
pub const LANGUAGE_ENDPOINT: &str = "https://language.googleapis.com";

// ═══════════════════════════════════════════════════════════════
//  Role
// ═══════════════════════════════════════════════════════════════

/// Which services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    All,
    Ingress,
    Enrichment,
}

impl Role {
    pub fn runs_ingress(&self) -> bool {
        matches!(self, Role::All | Role::Ingress)
    }

    pub fn runs_enrichment(&self) -> bool {
        matches!(self, Role::All | Role::Enrichment)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Role::All),
            "ingress" => Ok(Role::Ingress),
            "enrichment" => Ok(Role::Enrichment),
            other => Err(format!("unknown role '{other}' (expected all, ingress or enrichment)")),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Channel Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelBackend {
    /// In-process topic, delivered by the local enrichment loop.
    #[default]
    Memory,
    /// Managed queue; deliveries arrive as push requests.
    Pubsub,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub backend: ChannelBackend,
    /// `host:port` of a local emulator. Overrides `endpoint`, drops credentials.
    pub emulator_host: Option<String>,
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Subscription buffer of the in-process delivery loop.
    pub buffer: usize,
    /// Concurrent enrichment invocations of the delivery loop.
    pub max_in_flight: usize,
    pub max_delivery_attempts: u32,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Messages kept per in-process topic for inspection.
    pub max_retained: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backend: ChannelBackend::default(),
            emulator_host: None,
            endpoint: PUBSUB_ENDPOINT.to_string(),
            access_token: None,
            buffer: 1024,
            max_in_flight: 32,
            max_delivery_attempts: 5,
            min_backoff_ms: 100,
            max_backoff_ms: 10_000,
            max_retained: 10_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Store Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Datastore,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file (sqlite).
    pub path: Option<PathBuf>,
    /// Entity kind (datastore).
    pub kind: String,
    pub emulator_host: Option<String>,
    pub endpoint: String,
    pub access_token: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            kind: "sentiment".to_string(),
            emulator_host: None,
            endpoint: DATASTORE_ENDPOINT.to_string(),
            access_token: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scorer Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerBackend {
    /// Mock when running against emulators or the in-process channel, live otherwise.
    #[default]
    Auto,
    Mock,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub backend: ScorerBackend,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            backend: ScorerBackend::default(),
            endpoint: LANGUAGE_ENDPOINT.to_string(),
            api_key: None,
            access_token: None,
            timeout_ms: 10_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PipelineConfig
// ═══════════════════════════════════════════════════════════════

/// Whole process configuration as read from TOML, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub project_id: Option<String>,
    /// Topic the ingress publishes to and the enrichment consumes.
    pub output_topic: Option<String>,
    pub api_port: u16,
    pub role: Role,
    pub invocation_timeout_ms: u64,
    pub channel: ChannelConfig,
    pub store: StoreConfig,
    pub scorer: ScorerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            output_topic: None,
            api_port: 8080,
            role: Role::default(),
            invocation_timeout_ms: 60_000,
            channel: ChannelConfig::default(),
            store: StoreConfig::default(),
            scorer: ScorerConfig::default(),
        }
    }
}

/// Emulator hosts speak plain http and take no credentials.
fn emulator_endpoint(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn require_project(&self, needed_by: &str) -> Result<String, PipelineError> {
        non_empty(&self.project_id)
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::config_missing(format!("project_id (needed by {needed_by})"))
            })
    }

    /// Check required values and resolve every backend choice.
    ///
    /// Fails with `ConfigMissing` naming the first absent key; nothing is
    /// bound or connected before this passes.
    pub fn validate(&self) -> Result<ResolvedConfig, PipelineError> {
        let output_topic = non_empty(&self.output_topic).map(str::to_string);
        if self.role.runs_ingress() && output_topic.is_none() {
            return Err(PipelineError::config_missing("output_topic"));
        }

        let channel = self.resolve_channel(output_topic.as_deref())?;
        // Store and scorer belong to enrichment; an ingress-only process
        // must start without their settings.
        let (store, scorer) = if self.role.runs_enrichment() {
            (Some(self.resolve_store()?), Some(self.resolve_scorer()?))
        } else {
            (None, None)
        };

        Ok(ResolvedConfig {
            role: self.role,
            api_port: self.api_port,
            output_topic,
            invocation_timeout: Duration::from_millis(self.invocation_timeout_ms),
            channel,
            store,
            scorer,
        })
    }

    fn resolve_channel(&self, output_topic: Option<&str>) -> Result<ChannelTarget, PipelineError> {
        let cfg = &self.channel;
        match cfg.backend {
            ChannelBackend::Memory => {
                if self.role != Role::All {
                    return Err(PipelineError::config_missing(
                        "channel.backend = \"pubsub\" (in-process channel needs role \"all\")",
                    ));
                }
                let topic = output_topic
                    .ok_or_else(|| PipelineError::config_missing("output_topic"))?
                    .to_string();
                Ok(ChannelTarget::Memory {
                    topic,
                    buffer: cfg.buffer.max(1),
                    max_in_flight: cfg.max_in_flight.max(1),
                    options: TopicOptions {
                        max_retained: cfg.max_retained,
                        redelivery: RedeliveryPolicy {
                            max_delivery_attempts: cfg.max_delivery_attempts.max(1),
                            min_backoff: Duration::from_millis(cfg.min_backoff_ms),
                            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
                        },
                    },
                })
            }
            ChannelBackend::Pubsub => {
                let project_id = self.require_project("channel.backend = \"pubsub\"")?;
                let (endpoint, access_token) = match non_empty(&cfg.emulator_host) {
                    Some(host) => (emulator_endpoint(host), None),
                    None => {
                        let token = non_empty(&cfg.access_token)
                            .ok_or_else(|| PipelineError::config_missing("channel.access_token"))?;
                        (cfg.endpoint.clone(), Some(token.to_string()))
                    }
                };
                Ok(ChannelTarget::PubSub {
                    endpoint,
                    project_id,
                    access_token,
                })
            }
        }
    }

    fn resolve_store(&self) -> Result<StoreTarget, PipelineError> {
        let cfg = &self.store;
        match cfg.backend {
            StoreBackend::Memory => Ok(StoreTarget::Memory),
            StoreBackend::Sqlite => {
                let path = cfg
                    .path
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or_else(|| PipelineError::config_missing("store.path"))?;
                Ok(StoreTarget::Sqlite { path })
            }
            StoreBackend::Datastore => {
                let project_id = self.require_project("store.backend = \"datastore\"")?;
                let (endpoint, access_token) = match non_empty(&cfg.emulator_host) {
                    Some(host) => (emulator_endpoint(host), None),
                    None => {
                        let token = non_empty(&cfg.access_token)
                            .ok_or_else(|| PipelineError::config_missing("store.access_token"))?;
                        (cfg.endpoint.clone(), Some(token.to_string()))
                    }
                };
                Ok(StoreTarget::Datastore {
                    endpoint,
                    project_id,
                    kind: cfg.kind.clone(),
                    access_token,
                })
            }
        }
    }

    fn resolve_scorer(&self) -> Result<ScorerTarget, PipelineError> {
        let cfg = &self.scorer;
        let live = match cfg.backend {
            ScorerBackend::Mock => false,
            ScorerBackend::Live => true,
            ScorerBackend::Auto => {
                let emulated = non_empty(&self.channel.emulator_host).is_some()
                    || non_empty(&self.store.emulator_host).is_some();
                !emulated && self.channel.backend != ChannelBackend::Memory
            }
        };
        if !live {
            return Ok(ScorerTarget::Mock);
        }

        let api_key = non_empty(&cfg.api_key).map(str::to_string);
        let access_token = non_empty(&cfg.access_token).map(str::to_string);
        if api_key.is_none() && access_token.is_none() {
            return Err(PipelineError::config_missing("scorer.api_key or scorer.access_token"));
        }
        Ok(ScorerTarget::Live {
            endpoint: cfg.endpoint.clone(),
            api_key,
            access_token,
            timeout: Duration::from_millis(cfg.timeout_ms),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ResolvedConfig
// ═══════════════════════════════════════════════════════════════

/// Validated configuration: one concrete target per backend.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub role: Role,
    pub api_port: u16,
    /// Always set when the role runs ingress.
    pub output_topic: Option<String>,
    pub invocation_timeout: Duration,
    pub channel: ChannelTarget,
    /// Set exactly when the role runs enrichment.
    pub store: Option<StoreTarget>,
    /// Set exactly when the role runs enrichment.
    pub scorer: Option<ScorerTarget>,
}

#[derive(Debug, Clone)]
pub enum ChannelTarget {
    Memory {
        topic: String,
        buffer: usize,
        max_in_flight: usize,
        options: TopicOptions,
    },
    PubSub {
        endpoint: String,
        project_id: String,
        access_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum StoreTarget {
    Memory,
    Sqlite {
        path: PathBuf,
    },
    Datastore {
        endpoint: String,
        project_id: String,
        kind: String,
        access_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub enum ScorerTarget {
    Mock,
    Live {
        endpoint: String,
        api_key: Option<String>,
        access_token: Option<String>,
        timeout: Duration,
    },
}
