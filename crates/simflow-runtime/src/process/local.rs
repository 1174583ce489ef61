//! Local process creation with `tokio::process`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::TRACING_TARGET;
use crate::error::{RunError, RunResult};

use super::{Process, ProcessCreator, ProcessOutcome, ProcessRequest};

/// Starts tools on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessCreator;

impl LocalProcessCreator {
    /// Creates a new local process creator.
    pub fn new() -> Self {
        Self
    }

    /// Copies each required file to its target location inside the run
    /// directory. Re-resolving an already-satisfied requirement is a no-op,
    /// detected and skipped.
    async fn stage_required_files(&self, request: &ProcessRequest) -> RunResult<()> {
        for required in &request.required_files {
            let target = request.out_dir.join(&required.destination);

            if target.exists() {
                tracing::debug!(
                    target: TRACING_TARGET,
                    destination = %target.display(),
                    "required file already satisfied, skipping"
                );
                continue;
            }

            let source = required.source_path();
            let source = if source.is_absolute() || request.base_path.as_os_str().is_empty() {
                source
            } else {
                request.base_path.join(source)
            };

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target).await.map_err(|e| {
                RunError::Process(format!(
                    "failed to stage required file {} -> {}: {e}",
                    source.display(),
                    target.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessCreator for LocalProcessCreator {
    fn is_remote_manager(&self) -> bool {
        false
    }

    async fn create_process(&self, request: ProcessRequest) -> RunResult<Box<dyn Process>> {
        tokio::fs::create_dir_all(&request.out_dir).await?;
        self.stage_required_files(&request).await?;

        tracing::debug!(
            target: TRACING_TARGET,
            tool = %request.tool.name,
            out_dir = %request.out_dir.display(),
            parameters = ?request.parameters,
            "starting local process"
        );

        let mut command = Command::new(&request.tool.location);
        command
            .args(&request.parameters)
            .current_dir(&request.out_dir)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            RunError::Process(format!(
                "failed to spawn {}: {e}",
                request.tool.location.display()
            ))
        })?;

        if let Some(stdin_data) = &request.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(stdin_data.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        Ok(Box::new(LocalProcess {
            child: Some(child),
            request,
        }))
    }

    async fn restore_process(&self, remote_id: u64) -> RunResult<Box<dyn Process>> {
        Err(RunError::Configuration(format!(
            "local process creator cannot restore remote process {remote_id}"
        )))
    }
}

/// A running local process.
struct LocalProcess {
    child: Option<tokio::process::Child>,
    request: ProcessRequest,
}

#[async_trait]
impl Process for LocalProcess {
    async fn wait(&mut self) -> RunResult<ProcessOutcome> {
        let child = self
            .child
            .take()
            .ok_or_else(|| RunError::Process("process already waited on".into()))?;

        let output = child.wait_with_output().await?;

        let output_files = self
            .request
            .expected_output_files
            .iter()
            .map(|f| self.request.out_dir.join(f))
            .filter(|f| f.exists())
            .collect();

        Ok(ProcessOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            output_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use simflow_core::{RequiredFile, ToolInfo};

    use super::*;

    #[tokio::test]
    async fn test_not_a_remote_manager() {
        let creator = LocalProcessCreator::new();
        assert!(!creator.is_remote_manager());
    }

    #[tokio::test]
    async fn test_restore_remote_process_fails() {
        let creator = LocalProcessCreator::new();
        assert!(matches!(
            creator.restore_process(42).await,
            Err(RunError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_staging_skips_already_satisfied_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("weather.epw");
        tokio::fs::write(&source, "original").await.unwrap();

        let mut request = ProcessRequest::new(
            ToolInfo::new("energyplus", "/opt/ep/energyplus"),
            dir.path().join("run"),
        );
        request.required_files =
            vec![RequiredFile::new(source.to_string_lossy(), "weather.epw")];

        let creator = LocalProcessCreator::new();
        creator.stage_required_files(&request).await.unwrap();
        let target = dir.path().join("run").join("weather.epw");
        assert_eq!(
            tokio::fs::read_to_string(&target).await.unwrap(),
            "original"
        );

        // Changing the source must not propagate: a satisfied target is
        // never re-copied.
        tokio::fs::write(&source, "changed").await.unwrap();
        creator.stage_required_files(&request).await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(&target).await.unwrap(),
            "original"
        );
    }
}
