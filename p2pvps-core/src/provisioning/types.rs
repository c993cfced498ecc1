use std::fmt;

use crate::error::{AgentError, ExitInfo};

/// Opaque external step invoked through a [`StepRunner`](super::StepRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalStep {
    StoragePrep,
    ImageBuild,
    ImageRun,
    ImageStop,
    ImageCleanup,
}

impl ExternalStep {
    pub fn name(self) -> &'static str {
        match self {
            ExternalStep::StoragePrep => "storage-prep",
            ExternalStep::ImageBuild => "image-build",
            ExternalStep::ImageRun => "image-run",
            ExternalStep::ImageStop => "image-stop",
            ExternalStep::ImageCleanup => "image-cleanup",
        }
    }

    /// File name of the script under the scripts directory.
    pub fn script(self) -> &'static str {
        match self {
            ExternalStep::StoragePrep => "prep-flash-storage",
            ExternalStep::ImageBuild => "buildImage",
            ExternalStep::ImageRun => "runImage",
            ExternalStep::ImageStop => "stopImage",
            ExternalStep::ImageCleanup => "cleanupImages",
        }
    }

    /// Wiping and mounting storage needs root.
    pub fn privileged(self) -> bool {
        matches!(self, ExternalStep::StoragePrep)
    }
}

impl fmt::Display for ExternalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Write the Dockerfile and config.json; no external process.
    WriteArtifacts,
    External(ExternalStep),
}

impl ProvisionStep {
    pub fn name(self) -> &'static str {
        match self {
            ProvisionStep::WriteArtifacts => "write-config",
            ProvisionStep::External(step) => step.name(),
        }
    }
}

/// Provisioning order. Each step assumes the previous one completed.
pub const PROVISION_STEPS: [ProvisionStep; 4] = [
    ProvisionStep::WriteArtifacts,
    ProvisionStep::External(ExternalStep::StoragePrep),
    ProvisionStep::External(ExternalStep::ImageBuild),
    ProvisionStep::External(ExternalStep::ImageRun),
];

/// Teardown order when a lease expires.
pub const TEARDOWN_STEPS: [ExternalStep; 2] = [ExternalStep::ImageStop, ExternalStep::ImageCleanup];

/// Result of running one external step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: ExternalStep,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepResult {
    pub fn success(step: ExternalStep, stdout: impl Into<String>) -> Self {
        Self { step, succeeded: true, exit_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failure(step: ExternalStep, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self { step, succeeded: false, exit_code, stdout: String::new(), stderr: stderr.into() }
    }

    /// Diagnostic text: stderr when there is any, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    pub fn into_result(self) -> Result<(), AgentError> {
        if self.succeeded {
            return Ok(());
        }
        let output = self.diagnostic().to_string();
        Err(AgentError::StepFailed {
            step: self.step.name(),
            exit: ExitInfo { code: self.exit_code, output },
        })
    }
}

/// Outcome of a full provisioning run. No partial success is reported.
#[derive(Debug)]
pub enum PipelineOutcome {
    Success,
    Failed { step: &'static str, cause: AgentError },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success)
    }
}
