//! The end-to-end pipeline: generate a script, validate it, execute it, and
//! collect the image.
//!
//! Generation failures are the only retryable stage. A rejected or faulting
//! script would fail identically on the next attempt, so those errors
//! propagate immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::{RenderError, Result};
use crate::generate::{GenerateError, ScriptGenerator};
use crate::policy::Policy;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::executor::ScriptExecutor;
use crate::sandbox::{artifact, namespace};
use crate::validate::Validator;

/// Retry schedule for transient generator failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total generation attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure; grows linearly per attempt.
    pub initial_delay: Duration,
    /// Upper bound on the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Turns drawing descriptions into PNG bytes.
pub struct Renderer {
    generator: Box<dyn ScriptGenerator>,
    validator: Validator,
    executor: ScriptExecutor,
    retry: RetryPolicy,
}

impl Renderer {
    /// Build a renderer, resolving every policy binding up front.
    ///
    /// An unresolvable binding is a deployment mistake; failing here keeps it
    /// from surfacing as a per-request sandbox error later.
    pub fn new(
        generator: Box<dyn ScriptGenerator>,
        policy: Policy,
        config: SandboxConfig,
    ) -> Result<Self> {
        namespace::preflight(&policy)?;
        let policy = Arc::new(policy);
        Ok(Self {
            generator,
            validator: Validator::new(Arc::clone(&policy)),
            executor: ScriptExecutor::new(config, policy),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Render a drawing description to PNG bytes.
    pub async fn render(&self, description: &str) -> Result<Vec<u8>> {
        let script = self.generate_with_retry(description).await?;
        self.render_script(&script).await
    }

    /// Validate and execute an already generated script.
    pub async fn render_script(&self, script: &str) -> Result<Vec<u8>> {
        self.validator.validate(script).into_result()?;
        artifact::with_output_slot(&self.executor, script).await
    }

    async fn generate_with_retry(&self, description: &str) -> Result<String> {
        let mut backoff = Backoff::new(self.retry.initial_delay, self.retry.max_delay);
        loop {
            match self.generator.generate(description).await {
                Ok(script) => return Ok(script),
                Err(GenerateError::QuotaExceeded) => {
                    return Err(RenderError::UpstreamQuotaExceeded);
                }
                Err(GenerateError::Transient(reason)) => {
                    let delay = backoff.next_delay();
                    if backoff.exceeded_max_attempts(self.retry.max_attempts) {
                        return Err(RenderError::UpstreamTransient(reason));
                    }
                    tracing::warn!(
                        attempt = backoff.attempt,
                        delay = ?delay,
                        %reason,
                        "generator failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
