use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use pipeline::config::{ChannelBackend, PipelineConfig, Role, StoreBackend};

#[derive(Parser)]
#[command(
    name = "sentiment-server",
    about = "Publish text, score its sentiment, persist the result"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and the enabled services
    Serve(ServeArgs),
}

/// Flags and environment variables. Each one set overrides the file.
#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Optional TOML config file
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    /// Topic the ingress publishes to
    #[arg(long, env = "OUTPUT_TOPIC")]
    pub output_topic: Option<String>,

    /// all | ingress | enrichment
    #[arg(long, env = "ROLE")]
    pub role: Option<Role>,

    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Use the managed queue through its local emulator
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub pubsub_emulator_host: Option<String>,

    /// Use the document store through its local emulator
    #[arg(long, env = "DATASTORE_EMULATOR_HOST")]
    pub datastore_emulator_host: Option<String>,

    /// Persist records into a local SQLite file
    #[arg(long, env = "SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    #[arg(long, env = "LANGUAGE_API_KEY", hide_env_values = true)]
    pub language_api_key: Option<String>,

    /// Bearer token for every managed service that has none configured
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

fn set(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl ServeArgs {
    /// Overlay flags and environment onto `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(project_id) = set(&self.project_id) {
            config.project_id = Some(project_id);
        }
        if let Some(topic) = set(&self.output_topic) {
            config.output_topic = Some(topic);
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(port) = self.port {
            config.api_port = port;
        }
        if let Some(host) = set(&self.pubsub_emulator_host) {
            config.channel.backend = ChannelBackend::Pubsub;
            config.channel.emulator_host = Some(host);
        }
        if let Some(host) = set(&self.datastore_emulator_host) {
            config.store.backend = StoreBackend::Datastore;
            config.store.emulator_host = Some(host);
        }
        if let Some(path) = self.sqlite_path.clone().filter(|p| !p.as_os_str().is_empty()) {
            config.store.backend = StoreBackend::Sqlite;
            config.store.path = Some(path);
        }
        if let Some(key) = set(&self.language_api_key) {
            config.scorer.api_key = Some(key);
        }
        if let Some(token) = set(&self.access_token) {
            config.channel.access_token.get_or_insert_with(|| token.clone());
            config.store.access_token.get_or_insert_with(|| token.clone());
            config.scorer.access_token.get_or_insert(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "sentiment-server",
            "serve",
            "--project-id",
            "demo",
            "--output-topic",
            "sentiment-input",
            "--role",
            "ingress",
            "--port",
            "9000",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command;
        assert_eq!(args.project_id.as_deref(), Some("demo"));
        assert_eq!(args.output_topic.as_deref(), Some("sentiment-input"));
        assert_eq!(args.role, Some(Role::Ingress));
        assert_eq!(args.port, Some(9000));
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(Cli::try_parse_from(["sentiment-server", "serve", "--role", "worker"]).is_err());
    }

    #[test]
    fn emulator_hosts_select_managed_backends() {
        let args = ServeArgs {
            project_id: Some("demo".into()),
            output_topic: Some("t".into()),
            pubsub_emulator_host: Some("localhost:8085".into()),
            datastore_emulator_host: Some("localhost:8081".into()),
            ..ServeArgs::default()
        };
        let mut config = PipelineConfig::default();
        args.apply(&mut config);

        assert_eq!(config.channel.backend, ChannelBackend::Pubsub);
        assert_eq!(config.channel.emulator_host.as_deref(), Some("localhost:8085"));
        assert_eq!(config.store.backend, StoreBackend::Datastore);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_file_and_token_fills_gaps() {
        let mut config = PipelineConfig::from_toml_str(
            r#"
            output_topic = "from-file"
            api_port = 7000
            [store]
            access_token = "store-token"
            "#,
        )
        .unwrap();
        let args = ServeArgs {
            output_topic: Some("from-env".into()),
            access_token: Some("shared".into()),
            project_id: Some("   ".into()),
            ..ServeArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.output_topic.as_deref(), Some("from-env"));
        assert_eq!(config.api_port, 7000);
        assert_eq!(config.project_id, None);
        assert_eq!(config.channel.access_token.as_deref(), Some("shared"));
        assert_eq!(config.store.access_token.as_deref(), Some("store-token"));
        assert_eq!(config.scorer.access_token.as_deref(), Some("shared"));
    }
}
