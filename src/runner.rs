use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Captured outcome of one helper invocation. A failure to spawn the
/// process is reported through `error` like any non-zero exit, never as
/// a panic or an unhandled fault.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl RunOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Abstraction over the external decoder process, injected into the
/// converter so tests can script invocations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> RunOutput;
}

/// Runs the `ncmdump` helper at an injected location. No retry here;
/// fallback policy lives in the converter.
pub struct NcmdumpRunner {
    helper: PathBuf,
}

impl NcmdumpRunner {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for NcmdumpRunner {
    async fn run(&self, args: &[String]) -> RunOutput {
        debug!(helper = %self.helper.display(), ?args, "invoking decoder");
        let output = match Command::new(&self.helper).args(args).output().await {
            Ok(output) => output,
            Err(e) => {
                return RunOutput::failure(format!(
                    "failed to start {}: {e}",
                    self.helper.display()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            RunOutput {
                success: true,
                stdout,
                stderr,
                error: None,
            }
        } else {
            let error = if stderr.trim().is_empty() {
                match output.status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.trim().to_string()
            };
            RunOutput {
                success: false,
                stdout,
                stderr,
                error: Some(error),
            }
        }
    }
}

/// Locate the helper binary: an explicit override wins, then a sibling
/// of the current executable (packaged layout), then `$PATH`.
pub fn resolve_helper(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(helper_name());
            if sibling.exists() {
                return Some(sibling);
            }
        }
    }
    which::which(helper_name()).ok()
}

fn helper_name() -> &'static str {
    if cfg!(windows) {
        "ncmdump.exe"
    } else {
        "ncmdump"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_helper_reports_spawn_error() {
        let runner = NcmdumpRunner::new("/nonexistent/ncmdump");
        let output = runner.run(&["input.ncm".into()]).await;
        assert!(!output.success);
        let error = output.error.expect("spawn failure must set error");
        assert!(error.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn zero_exit_is_success() {
        let runner = NcmdumpRunner::new("/bin/sh");
        let output = runner
            .run(&["-c".into(), "echo decoded".into()])
            .await;
        assert!(output.success);
        assert!(output.stdout.contains("decoded"));
        assert!(output.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_uses_stderr_as_error() {
        let runner = NcmdumpRunner::new("/bin/sh");
        let output = runner
            .run(&["-c".into(), "echo bad key >&2; exit 3".into()])
            .await;
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("bad key"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_with_silent_stderr_reports_code() {
        let runner = NcmdumpRunner::new("/bin/sh");
        let output = runner.run(&["-c".into(), "exit 7".into()]).await;
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("exit code 7"));
    }

    #[test]
    fn explicit_helper_path_wins() {
        let resolved = resolve_helper(Some(Path::new("/opt/tools/ncmdump")));
        assert_eq!(resolved, Some(PathBuf::from("/opt/tools/ncmdump")));
    }
}
