//! Service configuration.
//!
//! Values come from three layers, later ones winning:
//! defaults, an optional YAML file (`--config`), then command-line flags and
//! their `TIKASTREAM_*` environment variables (a `.env` file is loaded first).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::engine_manager::DEFAULT_TIKA_VERSION;

fn default_listen() -> String {
    "0.0.0.0:8899".to_string()
}

fn default_tika_version() -> String {
    DEFAULT_TIKA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_json_body_bytes() -> usize {
    1 << 10
}

fn default_max_multipart_bytes() -> usize {
    1 << 20
}

/// Everything the server and the one-shot `extract` command need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// `java` executable; resolved from JAVA_HOME or PATH when unset
    #[serde(default)]
    pub java: Option<PathBuf>,

    /// `tika-app` jar; searched for (and downloaded) when unset
    #[serde(default)]
    pub jar: Option<PathBuf>,

    /// Extra JVM arguments, e.g. `-Xmx2g`
    #[serde(default)]
    pub jvm_args: Vec<String>,

    /// tika-app release to download when no jar is found
    #[serde(default = "default_tika_version")]
    pub tika_version: String,

    /// Download the jar from Maven Central if it is missing
    #[serde(default = "default_true")]
    pub auto_download: bool,

    /// Seconds to wait for a remote source to answer
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// Seconds an engine may run before it is killed
    #[serde(default)]
    pub engine_timeout_secs: Option<u64>,

    /// JSON request bodies are truncated to this many bytes
    #[serde(default = "default_max_json_body_bytes")]
    pub max_json_body_bytes: usize,

    /// Multipart uploads larger than this are rejected
    #[serde(default = "default_max_multipart_bytes")]
    pub max_multipart_bytes: usize,

    /// Where uploads are spooled; the system temp dir when unset
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,

    /// Resolve `file://` URLs and bare paths against the local filesystem
    #[serde(default)]
    pub allow_local_files: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            java: None,
            jar: None,
            jvm_args: Vec::new(),
            tika_version: default_tika_version(),
            auto_download: true,
            fetch_timeout_secs: None,
            engine_timeout_secs: None,
            max_json_body_bytes: default_max_json_body_bytes(),
            max_multipart_bytes: default_max_multipart_bytes(),
            spool_dir: None,
            allow_local_files: false,
        }
    }
}

impl ServerConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load config with fallback to defaults
    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                tracing::warn!(path = p, error = %format!("{e:#}"), "failed to load config, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout_secs.map(Duration::from_secs)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tikastream-spool"))
    }

    /// Apply engine flags on top of file values
    pub fn apply_engine_args(&mut self, args: &EngineArgs) {
        if let Some(java) = &args.java {
            self.java = Some(java.clone());
        }
        if let Some(jar) = &args.jar {
            self.jar = Some(jar.clone());
        }
        if !args.jvm_args.is_empty() {
            self.jvm_args = args.jvm_args.clone();
        }
        if let Some(version) = &args.tika_version {
            self.tika_version = version.clone();
        }
        if args.no_download {
            self.auto_download = false;
        }
        if args.engine_timeout.is_some() {
            self.engine_timeout_secs = args.engine_timeout;
        }
        if args.fetch_timeout.is_some() {
            self.fetch_timeout_secs = args.fetch_timeout;
        }
    }

    /// Apply `serve` flags on top of file values
    pub fn apply_serve_args(&mut self, args: &ServeArgs) {
        self.apply_engine_args(&args.engine);
        if let Some(listen) = &args.listen {
            self.listen = listen.clone();
        }
        if let Some(bytes) = args.max_json_body_bytes {
            self.max_json_body_bytes = bytes;
        }
        if let Some(bytes) = args.max_multipart_bytes {
            self.max_multipart_bytes = bytes;
        }
        if let Some(dir) = &args.spool_dir {
            self.spool_dir = Some(dir.clone());
        }
        if args.allow_local_files {
            self.allow_local_files = true;
        }
    }
}

/// Engine and fetch flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct EngineArgs {
    /// Path to the java executable
    #[arg(long, env = "TIKASTREAM_JAVA")]
    pub java: Option<PathBuf>,

    /// Path to the tika-app JAR file.
    /// If not specified, a local copy is searched for and downloaded on first use
    #[arg(long, env = "TIKASTREAM_JAR")]
    pub jar: Option<PathBuf>,

    /// Extra JVM argument (repeatable), e.g. --jvm-arg=-Xmx2g
    #[arg(long = "jvm-arg", env = "TIKASTREAM_JVM_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub jvm_args: Vec<String>,

    /// tika-app version to download when no jar is found
    #[arg(long, env = "TIKASTREAM_TIKA_VERSION")]
    pub tika_version: Option<String>,

    /// Never download the jar
    #[arg(long, env = "TIKASTREAM_NO_DOWNLOAD")]
    pub no_download: bool,

    /// Kill the engine after this many seconds
    #[arg(long, env = "TIKASTREAM_ENGINE_TIMEOUT")]
    pub engine_timeout: Option<u64>,

    /// Give up on a remote source after this many seconds without a response
    #[arg(long, env = "TIKASTREAM_FETCH_TIMEOUT")]
    pub fetch_timeout: Option<u64>,
}

/// Flags for `tikastream serve`.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Address to listen on (default 0.0.0.0:8899)
    #[arg(short, long, env = "TIKASTREAM_LISTEN")]
    pub listen: Option<String>,

    /// Cap for JSON request bodies; longer bodies are truncated
    #[arg(long, env = "TIKASTREAM_MAX_JSON_BODY_BYTES")]
    pub max_json_body_bytes: Option<usize>,

    /// Cap for multipart uploads; larger uploads are rejected
    #[arg(long, env = "TIKASTREAM_MAX_MULTIPART_BYTES")]
    pub max_multipart_bytes: Option<usize>,

    /// Directory for spooled uploads
    #[arg(long, env = "TIKASTREAM_SPOOL_DIR")]
    pub spool_dir: Option<PathBuf>,

    /// Allow file:// URLs and bare paths to read local files
    #[arg(long, env = "TIKASTREAM_ALLOW_LOCAL_FILES")]
    pub allow_local_files: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, "0.0.0.0:8899");
        assert_eq!(config.max_json_body_bytes, 1024);
        assert_eq!(config.max_multipart_bytes, 1024 * 1024);
        assert!(config.auto_download);
        assert!(!config.allow_local_files);
        assert_eq!(config.engine_timeout(), None);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ServerConfig = serde_yaml::from_str(
            "listen: 127.0.0.1:9000\njvm_args: [\"-Xmx1g\"]\nengine_timeout_secs: 30\n",
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.jvm_args, vec!["-Xmx1g".to_string()]);
        assert_eq!(config.engine_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_multipart_bytes, 1 << 20);
        assert_eq!(config.tika_version, DEFAULT_TIKA_VERSION);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ServerConfig::load_with_fallback(Some("/nonexistent/tikastream.yaml"));
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut config = ServerConfig {
            listen: "127.0.0.1:1".to_string(),
            max_json_body_bytes: 10,
            ..Default::default()
        };
        let args = ServeArgs {
            listen: Some("127.0.0.1:2".to_string()),
            allow_local_files: true,
            engine: EngineArgs {
                jvm_args: vec!["-Xmx512m".to_string()],
                no_download: true,
                ..Default::default()
            },
            ..Default::default()
        };

        config.apply_serve_args(&args);

        assert_eq!(config.listen, "127.0.0.1:2");
        assert_eq!(config.max_json_body_bytes, 10);
        assert!(config.allow_local_files);
        assert!(!config.auto_download);
        assert_eq!(config.jvm_args, vec!["-Xmx512m".to_string()]);
    }
}
