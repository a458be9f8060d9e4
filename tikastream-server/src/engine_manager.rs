//! Engine Manager - locate java and the tika-app jar, downloading the jar on first use
//!
//! The jar is fetched from Maven Central into the user's data directory and
//! reused across invocations.

use anyhow::{anyhow, Context, Result};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tikastream_core::EngineCommand;

use crate::config::ServerConfig;

/// tika-app release downloaded when no jar is configured
pub const DEFAULT_TIKA_VERSION: &str = "2.9.2";

const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";

/// Manages the extraction engine installation
pub struct EngineManager {
    /// Base directory for tikastream data (e.g., ~/.local/share/tikastream)
    data_dir: PathBuf,
    tika_version: String,
}

impl EngineManager {
    /// Create a new EngineManager using the default data directory
    pub fn new(tika_version: impl Into<String>) -> Result<Self> {
        let data_dir = Self::get_data_dir()?;
        Ok(Self::with_data_dir(data_dir, tika_version))
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>, tika_version: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tika_version: tika_version.into(),
        }
    }

    /// Get the data directory (~/.local/share/tikastream on all Unix platforms)
    fn get_data_dir() -> Result<PathBuf> {
        #[cfg(windows)]
        {
            let base = dirs::data_local_dir()
                .ok_or_else(|| anyhow!("Could not determine local data directory"))?;
            Ok(base.join("tikastream"))
        }

        #[cfg(not(windows))]
        {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
            Ok(home.join(".local").join("share").join("tikastream"))
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn jar_file_name(&self) -> String {
        format!("tika-app-{}.jar", self.tika_version)
    }

    /// Where a downloaded jar lives
    pub fn jar_path(&self) -> PathBuf {
        self.data_dir.join(self.jar_file_name())
    }

    pub fn download_url(&self) -> String {
        format!(
            "{MAVEN_CENTRAL}/org/apache/tika/tika-app/{v}/tika-app-{v}.jar",
            v = self.tika_version
        )
    }

    /// Find the java executable: explicit path, then JAVA_HOME, then PATH
    pub fn resolve_java(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(java_home) = std::env::var_os("JAVA_HOME").filter(|v| !v.is_empty()) {
            let candidate = PathBuf::from(java_home).join("bin").join(java_binary_name());
            if candidate.exists() {
                tracing::debug!(java = %candidate.display(), "using JAVA_HOME");
                return Ok(candidate);
            }
            tracing::warn!(java = %candidate.display(), "JAVA_HOME is set but has no java binary");
        }

        std::env::var_os("PATH")
            .and_then(|path| find_on_path(java_binary_name(), &path))
            .ok_or_else(|| {
                anyhow!("Could not find java. Install a JRE, set JAVA_HOME, or pass --java <path>")
            })
    }

    /// Look for an existing jar without downloading
    pub fn find_jar(&self) -> Option<PathBuf> {
        let file_name = self.jar_file_name();
        let candidates = [
            // Working directory
            PathBuf::from(&file_name),
            PathBuf::from("tika-app.jar"),
            // Installed alongside binary
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.join(&file_name)))
                .unwrap_or_default(),
            // Data directory (auto-download target)
            self.jar_path(),
        ];

        candidates
            .into_iter()
            .find(|candidate| !candidate.as_os_str().is_empty() && candidate.is_file())
    }

    /// Ensure the jar is available, downloading if allowed
    pub fn ensure_jar(&self, explicit: Option<&Path>, auto_download: bool) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(anyhow!("tika-app jar not found at {}", path.display()));
        }

        if let Some(found) = self.find_jar() {
            tracing::info!(jar = %found.display(), "tika-app jar found");
            return Ok(found);
        }

        if !auto_download {
            return Err(anyhow!(
                "Could not find {}.\n\
                 Searched in:\n\
                 - Working directory\n\
                 - Next to executable\n\
                 - Data directory ({})\n\
                 Pass --jar <path> or allow the download.",
                self.jar_file_name(),
                self.data_dir.display()
            ));
        }

        self.download_jar()
    }

    /// Download the jar into the data directory
    fn download_jar(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data directory: {}", self.data_dir.display())
        })?;

        let url = self.download_url();
        tracing::info!(%url, "tika-app jar not found, downloading");

        // Download to a temp file so an interrupted download is never mistaken
        // for a jar
        let dest = self.jar_path();
        let temp_path = self.data_dir.join(format!("{}.download", self.jar_file_name()));
        if let Err(e) = download_file(&url, &temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, &dest)
            .with_context(|| format!("Failed to move jar into place: {}", dest.display()))?;

        tracing::info!(jar = %dest.display(), "tika-app jar installed");
        Ok(dest)
    }

    /// Resolve java and the jar into the engine command line.
    ///
    /// Blocking: may download the jar.
    pub fn provision(config: &ServerConfig) -> Result<EngineCommand> {
        let java = Self::resolve_java(config.java.as_deref())?;
        let manager = Self::new(config.tika_version.clone())?;
        let jar = manager.ensure_jar(config.jar.as_deref(), config.auto_download)?;

        let engine = EngineCommand::tika_app_with_jvm_args(java, &jar, &config.jvm_args);
        tracing::info!(engine = %engine.describe(), "extraction engine ready");
        Ok(engine)
    }
}

fn java_binary_name() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

/// First directory in a PATH-style list containing `binary`
fn find_on_path(binary: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Download a file, logging progress every 10%
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("Failed to download from {}", url))?;

    let total_size = response
        .header("Content-Length")
        .and_then(|s| s.parse::<u64>().ok());

    let mut reader = response.into_reader();
    let mut file =
        File::create(dest).with_context(|| format!("Failed to create file: {}", dest.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 8192];
    let mut last_progress = 0;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;

        if let Some(total) = total_size.filter(|t| *t > 0) {
            let progress = ((downloaded * 100) / total) as usize;
            if progress >= last_progress + 10 {
                tracing::info!(
                    progress,
                    megabytes = format!("{:.1}", downloaded as f64 / 1_000_000.0),
                    "downloading tika-app"
                );
                last_progress = progress;
            }
        }
    }

    file.flush()?;
    Ok(())
}
