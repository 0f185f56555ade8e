use std::path::PathBuf;

/// Failure to read or parse the configuration file.
///
/// Semantic problems (a required key left empty) surface later from
/// `PipelineConfig::validate` as `ErrorKind::ConfigMissing`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
