use anyhow::{bail, Context};
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::sfu::{CodecKind, EngineSettings, SfuServer, StreamSource};
use crate::signaling::{Bridge, SignalingMode};

pub const DEFAULT_CONFIG_FILE: &str = "rotcore.toml";
const ENV_PREFIX: &str = "ROTCORE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub secret_path: PathBuf,
    /// Public IPs advertised to peers as host candidates
    pub public_ips: Vec<String>,
    pub stun_servers: Vec<String>,
    /// UDP ports available to ICE
    pub port_range: PortRange,
    pub streams: Vec<StreamSource>,
    pub signaling: SignalingConfig,
    pub negotiation: NegotiationConfig,
    pub relay: RelayConfig,
    pub shutdown_grace_ms: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub mode: SignalingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Upper bound on ICE gathering before an RPC answer is returned
    pub gather_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub read_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
            secret_path: PathBuf::from("./secret.txt"),
            public_ips: vec![],
            stun_servers: vec![],
            port_range: PortRange::default(),
            streams: vec![
                StreamSource {
                    address: "127.0.0.1:9578".to_string(),
                    codec: CodecKind::Opus,
                },
                StreamSource {
                    address: "127.0.0.1:9577".to_string(),
                    codec: CodecKind::H264,
                },
            ],
            signaling: SignalingConfig::default(),
            negotiation: NegotiationConfig::default(),
            relay: RelayConfig::default(),
            shutdown_grace_ms: 300,
            log_format: LogFormat::default(),
        }
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 11000,
            max: 13000,
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            gather_timeout_ms: 2000,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_backoff_ms: 5000,
        }
    }
}

/// Values taken from the command line; they win over every other source
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub secret_path: Option<PathBuf>,
    pub public_ips: Vec<String>,
}

impl Config {
    /// Load configuration from, lowest priority first: defaults, the config
    /// file, `ROTCORE__*` variables, legacy variables, command line.
    /// Keys absent from every source keep their `Default` values.
    pub fn load(overrides: &Overrides) -> anyhow::Result<Self> {
        Self::load_from(overrides, std::env::vars().collect())
    }

    pub fn load_from(overrides: &Overrides, env: HashMap<String, String>) -> anyhow::Result<Self> {
        let config_file = overrides
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(File::from(config_file.as_path()).required(overrides.config_file.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("public_ips")
                    .with_list_parse_key("stun_servers")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .build()
            .context("failed to read configuration")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("invalid configuration")?;

        config.apply_legacy_env(&env);
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_legacy_env(&mut self, env: &HashMap<String, String>) {
        if let Some(address) = env.get("SIGNAL_ADDRESS") {
            self.bind_address = address.clone();
        }
        if let Some(address) = env.get("VIDEO_STREAM_ADDRESS") {
            self.set_stream_address(CodecKind::H264, address);
        }
        if let Some(address) = env.get("AUDIO_STREAM_ADDRESS") {
            self.set_stream_address(CodecKind::Opus, address);
        }
    }

    fn set_stream_address(&mut self, codec: CodecKind, address: &str) {
        match self.streams.iter_mut().find(|s| s.codec == codec) {
            Some(stream) => stream.address = address.to_string(),
            None => self.streams.push(StreamSource {
                address: address.to_string(),
                codec,
            }),
        }
    }

    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(path) = &overrides.secret_path {
            self.secret_path = path.clone();
        }
        if !overrides.public_ips.is_empty() {
            self.public_ips = overrides.public_ips.clone();
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.port_range.min > self.port_range.max {
            bail!(
                "invalid port range {}-{}",
                self.port_range.min,
                self.port_range.max
            );
        }
        if self.streams.is_empty() {
            bail!("no media streams configured");
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            public_ips: self.public_ips.clone(),
            port_range: Some((self.port_range.min, self.port_range.max)),
            stun_servers: self.stun_servers.clone(),
            ice_lite: true,
        }
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation.gather_timeout_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.relay.read_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sfu: Arc<SfuServer>,
    pub bridge: Bridge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn missing_file() -> Overrides {
        Overrides::default()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::load_from(&missing_file(), HashMap::new()).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:80");
        assert_eq!(config.secret_path, PathBuf::from("./secret.txt"));
        assert_eq!((config.port_range.min, config.port_range.max), (11000, 13000));
        assert_eq!(config.signaling.mode, SignalingMode::Rpc);
        assert_eq!(config.gather_timeout(), Duration::from_secs(2));
        assert_eq!(config.read_backoff(), Duration::from_secs(5));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(300));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].codec, CodecKind::Opus);
        assert_eq!(config.streams[0].address, "127.0.0.1:9578");
        assert_eq!(config.streams[1].codec, CodecKind::H264);
        assert_eq!(config.streams[1].address, "127.0.0.1:9577");
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
bind_address = "127.0.0.1:8080"
public_ips = ["203.0.113.7"]

[signaling]
mode = "socket"

[[streams]]
address = "127.0.0.1:6000"
codec = "h264"
"#
        )
        .unwrap();

        let overrides = Overrides {
            config_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = Config::load_from(&overrides, HashMap::new()).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:8080");
        assert_eq!(config.public_ips, ["203.0.113.7"]);
        assert_eq!(config.signaling.mode, SignalingMode::Socket);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].codec, CodecKind::H264);
        // Untouched keys keep their defaults
        assert_eq!(config.shutdown_grace_ms, 300);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let overrides = Overrides {
            config_file: Some(PathBuf::from("/nonexistent/rotcore.toml")),
            ..Default::default()
        };
        assert!(Config::load_from(&overrides, HashMap::new()).is_err());
    }

    #[test]
    fn prefixed_environment_overrides_defaults() {
        let config = Config::load_from(
            &missing_file(),
            env(&[
                ("ROTCORE__BIND_ADDRESS", "127.0.0.1:9000"),
                ("ROTCORE__PUBLIC_IPS", "198.51.100.1,198.51.100.2"),
                ("ROTCORE__SIGNALING__MODE", "socket"),
                ("ROTCORE__RELAY__READ_BACKOFF_MS", "250"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.public_ips, ["198.51.100.1", "198.51.100.2"]);
        assert_eq!(config.signaling.mode, SignalingMode::Socket);
        assert_eq!(config.read_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn legacy_variables_set_addresses() {
        let config = Config::load_from(
            &missing_file(),
            env(&[
                ("ROTCORE__BIND_ADDRESS", "127.0.0.1:9000"),
                ("SIGNAL_ADDRESS", "127.0.0.1:7000"),
                ("VIDEO_STREAM_ADDRESS", "127.0.0.1:7001"),
                ("AUDIO_STREAM_ADDRESS", "127.0.0.1:7002"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:7000");
        let address = |codec| {
            config
                .streams
                .iter()
                .find(|s| s.codec == codec)
                .map(|s| s.address.clone())
        };
        assert_eq!(address(CodecKind::H264).as_deref(), Some("127.0.0.1:7001"));
        assert_eq!(address(CodecKind::Opus).as_deref(), Some("127.0.0.1:7002"));
    }

    #[test]
    fn command_line_wins() {
        let overrides = Overrides {
            config_file: None,
            secret_path: Some(PathBuf::from("/run/secrets/rot")),
            public_ips: vec!["192.0.2.10".to_string()],
        };
        let config = Config::load_from(
            &overrides,
            env(&[("ROTCORE__PUBLIC_IPS", "198.51.100.1")]),
        )
        .unwrap();

        assert_eq!(config.secret_path, PathBuf::from("/run/secrets/rot"));
        assert_eq!(config.public_ips, ["192.0.2.10"]);
    }

    #[test]
    fn inverted_port_range_is_rejected() {
        let err = Config::load_from(
            &missing_file(),
            env(&[
                ("ROTCORE__PORT_RANGE__MIN", "5000"),
                ("ROTCORE__PORT_RANGE__MAX", "4000"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("port range"));
    }
}
