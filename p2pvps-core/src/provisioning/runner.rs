use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::types::{ExternalStep, StepResult};

/// Process-execution boundary for provisioning and teardown steps.
///
/// Runners report failure through [`StepResult::succeeded`] and never impose
/// a timeout; a step runs until its process exits.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: ExternalStep) -> StepResult;
}

/// Runs each step as an executable script from a scripts directory
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    sudo_password: Option<String>,
}

impl ScriptRunner {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self { scripts_dir: scripts_dir.into(), sudo_password: None }
    }

    /// Privileged steps are run through `sudo -S -k` with this password on stdin.
    ///
    /// `-k` makes sudo ignore cached credentials so it always reads the
    /// password line itself. Under a `NOPASSWD` rule sudo reads nothing and
    /// the line stays in the pipe, where the script can see it; leave
    /// `sudoPassword` unset on such hosts.
    pub fn with_sudo_password(mut self, password: Option<String>) -> Self {
        self.sudo_password = password;
        self
    }

    pub fn script_path(&self, step: ExternalStep) -> PathBuf {
        self.scripts_dir.join(step.script())
    }

    fn command_for(&self, step: ExternalStep) -> (Command, Option<&str>) {
        let script = self.script_path(step);
        match self.sudo_password.as_deref() {
            Some(password) if step.privileged() => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-S", "-k", "-p", ""]).arg(&script);
                cmd.stdin(Stdio::piped());
                (cmd, Some(password))
            }
            _ => {
                let mut cmd = Command::new(&script);
                cmd.stdin(Stdio::null());
                (cmd, None)
            }
        }
    }
}

#[async_trait]
impl StepRunner for ScriptRunner {
    async fn run(&self, step: ExternalStep) -> StepResult {
        let (mut cmd, password) = self.command_for(step);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        info!(step = step.name(), script = %self.script_path(step).display(), "running external step");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StepResult::failure(step, None, format!("failed to start: {}", e));
            }
        };

        if let (Some(password), Some(mut stdin)) = (password, child.stdin.take()) {
            if let Err(e) = stdin.write_all(format!("{}\n", password).as_bytes()).await {
                warn!(step = step.name(), error = %e, "could not pass sudo password");
            }
        }

        match child.wait_with_output().await {
            Ok(output) => result_from_output(step, &output),
            Err(e) => StepResult::failure(step, None, format!("failed to wait for process: {}", e)),
        }
    }
}

fn result_from_output(step: ExternalStep, output: &Output) -> StepResult {
    StepResult {
        step,
        succeeded: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn successful_script_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "buildImage", "echo built\necho chatter >&2");

        let result = ScriptRunner::new(dir.path()).run(ExternalStep::ImageBuild).await;
        assert!(result.succeeded);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "built");
        assert_eq!(result.stderr.trim(), "chatter");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_even_without_stderr() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "runImage", "echo starting\nexit 3");

        let result = ScriptRunner::new(dir.path()).run(ExternalStep::ImageRun).await;
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.diagnostic().trim(), "starting");
    }

    #[tokio::test]
    async fn missing_script_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = ScriptRunner::new(dir.path()).run(ExternalStep::ImageStop).await;
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, None);
        assert!(result.stderr.contains("failed to start"));
    }

    #[test]
    fn sudo_wraps_only_privileged_steps() {
        let runner = ScriptRunner::new("/opt/p2pvps/lib").with_sudo_password(Some("pw".into()));
        let (cmd, password) = runner.command_for(ExternalStep::StoragePrep);
        assert_eq!(cmd.as_std().get_program(), "sudo");
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, ["-S", "-k", "-p", "", "/opt/p2pvps/lib/prep-flash-storage"]);
        assert_eq!(password, Some("pw"));

        let (cmd, password) = runner.command_for(ExternalStep::ImageBuild);
        assert_eq!(cmd.as_std().get_program(), "/opt/p2pvps/lib/buildImage");
        assert_eq!(password, None);
    }
}
