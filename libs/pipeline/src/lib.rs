pub mod config;
pub mod error;
mod enrichment;
mod ingress;
mod task;

pub use config::{
    ChannelTarget, PipelineConfig, ResolvedConfig, Role, ScorerTarget, StoreTarget,
};
pub use enrichment::{EnrichmentService, MonotonicClock};
pub use error::ConfigError;
pub use ingress::IngressService;
pub use task::spawn_enrichment_task;
