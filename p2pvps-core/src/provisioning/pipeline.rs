use tracing::{error, info, warn};

use super::artifacts::ArtifactWriter;
use super::runner::StepRunner;
use super::types::*;
use crate::types::{Credentials, Result};

/// Straight-line provisioning sequence plus the teardown run on lease expiry.
pub struct ProvisioningPipeline<R> {
    runner: R,
    artifacts: ArtifactWriter,
}

impl<R: StepRunner> ProvisioningPipeline<R> {
    pub fn new(runner: R, artifacts: ArtifactWriter) -> Self {
        Self { runner, artifacts }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn artifacts(&self) -> &ArtifactWriter {
        &self.artifacts
    }

    /// Run every step of [`PROVISION_STEPS`] in order, halting at the first failure.
    ///
    /// Safe to call again with new credentials; a later run supersedes any
    /// partial earlier one.
    pub async fn provision(&self, credentials: Credentials) -> PipelineOutcome {
        for step in PROVISION_STEPS {
            info!(step = step.name(), "provisioning step starting");
            if let Err(cause) = self.execute(step, &credentials).await {
                error!(step = step.name(), error = %cause, "provisioning halted");
                return PipelineOutcome::Failed { step: step.name(), cause };
            }
        }
        info!("workload has been built and is running");
        PipelineOutcome::Success
    }

    /// Run every teardown step, including those after a failed one.
    pub async fn teardown(&self) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(TEARDOWN_STEPS.len());
        for step in TEARDOWN_STEPS {
            let result = self.run_logged(step).await;
            if !result.succeeded {
                warn!(step = step.name(), exit_code = ?result.exit_code, output = %result.diagnostic().trim(), "teardown step failed");
            }
            results.push(result);
        }
        results
    }

    async fn execute(&self, step: ProvisionStep, credentials: &Credentials) -> Result<()> {
        match step {
            ProvisionStep::WriteArtifacts => self.artifacts.write_all(credentials).await,
            ProvisionStep::External(external) => self.run_logged(external).await.into_result(),
        }
    }

    async fn run_logged(&self, step: ExternalStep) -> StepResult {
        let result = self.runner.run(step).await;
        let stdout = result.stdout.trim();
        if !stdout.is_empty() {
            info!(step = step.name(), "{}", stdout);
        }
        let stderr = result.stderr.trim();
        if result.succeeded && !stderr.is_empty() {
            warn!(step = step.name(), "{}", stderr);
        }
        result
    }
}
