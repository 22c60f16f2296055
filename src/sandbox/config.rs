//! Sandbox configuration with builder pattern.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RenderError, Result};

/// Environment variable holding the execution budget in seconds.
const MAX_EXECUTION_TIME_VAR: &str = "MAX_EXECUTION_TIME";

/// Configuration for script execution and artifact handling.
///
/// Loaded once at process start, immutable thereafter.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum wall-clock execution time before the run is abandoned.
    pub timeout: Duration,
    /// Directory temporary artifact files are created in.
    pub temp_dir: PathBuf,
    /// Name of the save primitive whose calls are redirected to the private
    /// output path.
    pub save_call: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            temp_dir: std::env::temp_dir(),
            save_call: "savefig".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Build a config from the environment, honoring `MAX_EXECUTION_TIME`
    /// (seconds). Unset means the default budget; unparsable is a
    /// configuration error, reported immediately rather than per-request.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_EXECUTION_TIME_VAR) {
            let secs: u64 = raw.parse().map_err(|_| {
                RenderError::Config(format!(
                    "{MAX_EXECUTION_TIME_VAR} must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    timeout: Option<Duration>,
    temp_dir: Option<PathBuf>,
    save_call: Option<String>,
}

impl SandboxConfigBuilder {
    /// Set the maximum execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the directory temporary artifacts are written to.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the name of the save primitive to redirect.
    pub fn save_call(mut self, name: impl Into<String>) -> Self {
        self.save_call = Some(name.into());
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            timeout: self.timeout.unwrap_or(default.timeout),
            temp_dir: self.temp_dir.unwrap_or(default.temp_dir),
            save_call: self.save_call.unwrap_or(default.save_call),
        }
    }
}
