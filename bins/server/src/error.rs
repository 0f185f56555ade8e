use sentiment_api::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] pipeline::ConfigError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("sqlite store: {0}")]
    Sqlite(#[from] store_sqlite::SqliteStoreError),

    #[error("api server: {0}")]
    Api(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
