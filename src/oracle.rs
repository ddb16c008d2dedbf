use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::OracleSettings;
use crate::error::KiraError;
use crate::fs_util;

/// Bytes of captured stdout/stderr kept for diagnostics.
const LOG_TAIL_BYTES: u64 = 8 * 1024;

/// External species-delimitation tool, run against one populated workspace.
pub trait Oracle: Send + Sync {
    fn invoke(&self, workspace: &Path) -> Result<(), KiraError>;
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn invoke(&self, workspace: &Path) -> Result<(), KiraError> {
        (**self).invoke(workspace)
    }
}

/// Runs `program args... <workspace>` as a blocking subprocess.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandOracle {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program,
            args,
            timeout,
        }
    }

    pub fn from_settings(settings: &OracleSettings) -> Result<Self, KiraError> {
        let program = settings.program.clone().ok_or(KiraError::MissingOracle)?;
        Ok(Self::new(program, settings.args.clone(), settings.timeout))
    }
}

impl Oracle for CommandOracle {
    fn invoke(&self, workspace: &Path) -> Result<(), KiraError> {
        let stdout_log =
            tempfile::tempfile().map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let stderr_log =
            tempfile::tempfile().map_err(|err| KiraError::Filesystem(err.to_string()))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::from(
                stdout_log
                    .try_clone()
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?,
            ))
            .stderr(Stdio::from(
                stderr_log
                    .try_clone()
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?,
            ));

        debug!(
            program = %self.program.display(),
            workspace = %workspace.display(),
            "oracle.spawn"
        );
        let mut child = cmd.spawn().map_err(|err| KiraError::OracleInvocationFailed {
            status: format!("spawn error for {}", self.program.display()),
            stdout: String::new(),
            stderr: err.to_string(),
        })?;

        let status = match self.timeout {
            Some(timeout) => match child
                .wait_timeout(timeout)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?
            {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(KiraError::OracleTimedOut {
                        seconds: timeout.as_secs(),
                    });
                }
            },
            None => child
                .wait()
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        };

        if status.success() {
            return Ok(());
        }
        Err(KiraError::OracleInvocationFailed {
            status: status.to_string(),
            stdout: read_log_tail(stdout_log),
            stderr: read_log_tail(stderr_log),
        })
    }
}

fn read_log_tail(mut file: fs::File) -> String {
    let len = file.seek(SeekFrom::End(0)).unwrap_or(0);
    let start = len.saturating_sub(LOG_TAIL_BYTES);
    if file.seek(SeekFrom::Start(start)).is_err() {
        return String::new();
    }
    let mut bytes = Vec::new();
    let _ = file.read_to_end(&mut bytes);
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// What a finished workspace exposes to the caller before teardown.
#[derive(Debug)]
pub struct WorkspaceOutputs<'a> {
    pub workspace: &'a Path,
    pub report_path: PathBuf,
    pub report_text: String,
    pub plot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrialRequest<'a> {
    pub probe: &'a Path,
    pub group_dir: &'a Path,
    /// Human-readable prefix for the workspace name; uniqueness comes from a random suffix.
    pub label: &'a str,
}

pub struct WorkspaceRunner<O: Oracle> {
    oracle: O,
    work_root: PathBuf,
    report_path: PathBuf,
    plot_path: PathBuf,
}

impl<O: Oracle> WorkspaceRunner<O> {
    pub fn new(oracle: O, work_root: PathBuf, report_path: PathBuf, plot_path: PathBuf) -> Self {
        Self {
            oracle,
            work_root,
            report_path,
            plot_path,
        }
    }

    pub fn from_settings(oracle: O, work_root: PathBuf, settings: &OracleSettings) -> Self {
        Self::new(
            oracle,
            work_root,
            settings.report_path.clone(),
            settings.plot_path.clone(),
        )
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Creates the work root and checks that a workspace can be made in it.
    pub fn prepare(&self) -> Result<(), KiraError> {
        fs::create_dir_all(&self.work_root).map_err(|err| self.work_dir_error(err))?;
        tempfile::Builder::new()
            .prefix("analysis_check_")
            .tempdir_in(&self.work_root)
            .and_then(|dir| dir.close())
            .map_err(|err| self.work_dir_error(err))
    }

    fn work_dir_error(&self, err: std::io::Error) -> KiraError {
        KiraError::WorkDir {
            path: self.work_root.clone(),
            message: err.to_string(),
        }
    }

    /// Stages `group_dir`'s files plus the probe into a fresh workspace, runs
    /// the oracle, hands the outputs to `extract`, and removes the workspace on
    /// every path out of this call.
    pub fn run<T, F>(&self, request: &TrialRequest<'_>, extract: F) -> Result<T, KiraError>
    where
        F: FnOnce(&WorkspaceOutputs<'_>) -> Result<T, KiraError>,
    {
        fs::create_dir_all(&self.work_root).map_err(|err| self.work_dir_error(err))?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("analysis_{}_", sanitize_label(request.label)))
            .tempdir_in(&self.work_root)
            .map_err(|err| self.work_dir_error(err))?;
        let workspace_path = std::path::absolute(workspace.path())
            .map_err(|err| KiraError::filesystem("resolve workspace", err))?;

        let result = self.execute(request, &workspace_path, extract);

        let removal = workspace.close();
        if let Err(err) = &removal {
            warn!(workspace = %workspace_path.display(), error = %err, "workspace teardown failed");
        }
        let value = result?;
        removal.map_err(|err| KiraError::filesystem("remove workspace", err))?;
        Ok(value)
    }

    fn execute<T, F>(
        &self,
        request: &TrialRequest<'_>,
        workspace: &Path,
        extract: F,
    ) -> Result<T, KiraError>
    where
        F: FnOnce(&WorkspaceOutputs<'_>) -> Result<T, KiraError>,
    {
        if !request.group_dir.is_dir() {
            return Err(KiraError::MissingGroupDir(request.group_dir.to_path_buf()));
        }
        let staged = fs_util::copy_dir_files(request.group_dir, workspace)?;
        fs_util::copy_into(request.probe, workspace)?;
        debug!(workspace = %workspace.display(), staged = staged + 1, "workspace populated");

        self.oracle.invoke(workspace)?;

        let report_path = workspace.join(&self.report_path);
        if !report_path.is_file() {
            return Err(KiraError::OracleReportMissing(report_path));
        }
        let report_text = fs::read_to_string(&report_path)
            .map_err(|err| KiraError::filesystem(format!("read {}", report_path.display()), err))?;
        let plot_path = Some(workspace.join(&self.plot_path)).filter(|path| path.is_file());

        extract(&WorkspaceOutputs {
            workspace,
            report_path,
            report_text,
            plot_path,
        })
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_path_safe() {
        assert_eq!(sanitize_label("1a/HTCC 1062"), "1a_HTCC_1062");
    }
}
