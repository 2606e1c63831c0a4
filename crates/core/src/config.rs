//! # Stagehand Configuration
//!
//! One explicit configuration value, constructed once at process start and
//! passed by reference to the server, the peer and every collaborator.
//! Stage logic never reads process-wide state on its own.
//!
//! Precedence: defaults < JSON file < environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::StartupError;
use crate::pipeline::PipelineStage;

/// Default location of the persisted configuration file
pub const DEFAULT_CONFIG_PATH: &str = ".stagehand/config.json";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    /// Listening endpoint of the server role
    pub listen: String,
    pub tls: TlsConfig,
    pub peer: PeerConfig,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub stages: StageToggles,
    pub probe: ProbeConfig,
    pub synthesis: SynthesisConfig,
    pub publication: PublicationConfig,
    pub enrichment: EnrichmentConfig,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8765".to_string(),
            tls: TlsConfig::default(),
            peer: PeerConfig::default(),
            storage: StorageConfig::default(),
            fetch: FetchConfig::default(),
            stages: StageToggles::default(),
            probe: ProbeConfig::default(),
            synthesis: SynthesisConfig::default(),
            publication: PublicationConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

/// Certificate material for both roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Server certificate chain (PEM)
    pub cert_path: Option<PathBuf>,
    /// Server private key (PEM)
    pub key_path: Option<PathBuf>,
    /// When set, the server requires client certificates signed by this CA
    pub client_ca_path: Option<PathBuf>,
    /// CA the peer uses to verify the server
    pub ca_path: Option<PathBuf>,
    /// Name the peer expects in the server certificate
    pub server_name: String,
    /// Accept any server certificate (self-signed lab deployments only)
    pub insecure_skip_verify: bool,
    /// Peer certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Peer private key for mutual TLS
    pub client_key_path: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            client_ca_path: None,
            ca_path: None,
            server_name: "localhost".to_string(),
            insecure_skip_verify: false,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

/// Peer (assisting) role settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Server endpoint to subscribe to
    pub server: String,
    /// Write augmented results back to the server
    pub relay: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            server: "localhost:8765".to_string(),
            relay: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Parent directory for per-session artifact directories
    pub root: PathBuf,
    pub max_artifact_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("stagehand"),
            max_artifact_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Link suffixes accepted as artifacts when scanning a page
    pub extensions: Vec<String>,
    /// Let source references name files on this host. Peers are untrusted,
    /// so the server role refuses them unless this is set.
    pub allow_local_paths: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            extensions: [".elf", ".exe", ".js", ".wasm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_local_paths: false,
        }
    }
}

/// Per-stage enable switches. A disabled stage emits no record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageToggles {
    pub identify: bool,
    pub inspect: bool,
    pub probe: bool,
    pub synthesize: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            identify: true,
            inspect: true,
            probe: true,
            synthesize: true,
        }
    }
}

impl StageToggles {
    pub fn is_enabled(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Identify => self.identify,
            PipelineStage::Inspect => self.inspect,
            PipelineStage::Probe => self.probe,
            PipelineStage::Synthesize => self.synthesize,
        }
    }
}

/// Dynamic probing harness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Harness executable
    pub program: String,
    /// Argument template; `{input_dir}`, `{output_dir}` and `{target}` are substituted
    pub args: Vec<String>,
    /// Contents of the single seed input
    pub seed: String,
    /// Number of polling ticks before giving up
    pub ticks: u32,
    pub tick_ms: u64,
    /// Overrides host capability detection (default: Linux hosts only)
    pub host_capable: Option<bool>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: "afl-fuzz".to_string(),
            args: ["-Q", "-i", "{input_dir}", "-o", "{output_dir}", "--", "{target}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            seed: "test".to_string(),
            ticks: 30,
            tick_ms: 1000,
            host_capable: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// External tool argv for native platforms; `{artifact}` and `{platform}` are substituted.
    /// When unset, native artifacts get the textual findings report as well.
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationConfig {
    /// Content-addressed output directory
    pub dir: PathBuf,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".stagehand/published"),
        }
    }
}

/// Optional reasoning collaborator (Ollama-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            timeout_secs: 60,
        }
    }
}

impl StagehandConfig {
    /// Load from `path` (or the default location), apply environment overrides and validate.
    ///
    /// A missing file yields defaults; a malformed one is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, StartupError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| StartupError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `STAGEHAND_*` overrides from an arbitrary lookup
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("STAGEHAND_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("STAGEHAND_SERVER") {
            self.peer.server = v;
        }
        if let Some(v) = lookup("STAGEHAND_CERT") {
            self.tls.cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STAGEHAND_KEY") {
            self.tls.key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STAGEHAND_CA") {
            self.tls.ca_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STAGEHAND_STORAGE_DIR") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("STAGEHAND_OLLAMA_URL") {
            self.enrichment.base_url = v;
            self.enrichment.enabled = true;
        }
        if let Some(v) = lookup("STAGEHAND_OLLAMA_MODEL") {
            self.enrichment.model = v;
        }
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.probe.ticks == 0 || self.probe.tick_ms == 0 {
            return Err(StartupError::Config(
                "probe.ticks and probe.tick_ms must be positive".to_string(),
            ));
        }
        if self.probe.program.trim().is_empty() {
            return Err(StartupError::Config("probe.program is empty".to_string()));
        }
        if matches!(&self.synthesis.command, Some(argv) if argv.is_empty()) {
            return Err(StartupError::Config(
                "synthesis.command must name a program".to_string(),
            ));
        }
        if self.storage.max_artifact_bytes == 0 {
            return Err(StartupError::Config(
                "storage.max_artifact_bytes must be positive".to_string(),
            ));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, StartupError> {
        self.listen
            .parse()
            .map_err(|_| StartupError::InvalidListenAddress(self.listen.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = StagehandConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe.ticks, 30);
        assert_eq!(config.probe.tick_ms, 1000);
        assert!(config.stages.is_enabled(PipelineStage::Probe));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StagehandConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8765");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "listen": "127.0.0.1:9000", "stages": { "identify": false }, "probe": { "ticks": 5 } }"#,
        )
        .unwrap();

        let config = StagehandConfig::load(Some(&path)).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert!(!config.stages.identify);
        assert!(config.stages.inspect);
        assert_eq!(config.probe.ticks, 5);
        assert_eq!(config.probe.program, "afl-fuzz");
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StagehandConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STAGEHAND_LISTEN", "127.0.0.1:1234"),
            ("STAGEHAND_CERT", "/etc/stagehand/cert.pem"),
            ("STAGEHAND_OLLAMA_URL", "http://gpu-box:11434"),
        ]);

        let mut config = StagehandConfig::default();
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.listen, "127.0.0.1:1234");
        assert_eq!(
            config.tls.cert_path,
            Some(PathBuf::from("/etc/stagehand/cert.pem"))
        );
        assert!(config.enrichment.enabled);
        assert_eq!(config.enrichment.base_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_validate_rejects_zero_ticks() {
        let mut config = StagehandConfig::default();
        config.probe.ticks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_listen_address() {
        let mut config = StagehandConfig::default();
        config.listen = "not-an-address".to_string();
        assert!(matches!(
            config.validate(),
            Err(StartupError::InvalidListenAddress(_))
        ));
    }
}
