//! verify/toolchain.rs
//!
//! External compiler/test-runner collaborator.
//!
//! The default [`CommandToolchain`] runs shell command templates from the
//! config. Every run observes a [`CancellationToken`]; on cancellation the
//! process is killed and reaped before the call returns.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{CommandSet, ToolchainConfig};
use crate::detectors::language::Language;
use crate::error::ToolchainError;
use crate::resolve::TestPlacement;
use crate::verify::parse::combine;

pub const COVERAGE_FILE_ENV: &str = "UNITFORGE_COVERAGE_FILE";
pub const PER_TEST_TIMEOUT_ENV: &str = "UNITFORGE_PER_TEST_TIMEOUT_MS";

/// A materialized candidate inside a scratch area.
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub language: Language,
    pub workdir: PathBuf,
    /// Relative to `workdir`; the source file itself for inline tests
    pub test_file: PathBuf,
    pub placement: TestPlacement,
}

/// A source set whose compile step succeeded.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub language: Language,
    pub workdir: PathBuf,
    pub test_file: PathBuf,
    pub placement: TestPlacement,
}

impl From<&SourceSet> for CompiledUnit {
    fn from(s: &SourceSet) -> Self {
        Self {
            language: s.language,
            workdir: s.workdir.clone(),
            test_file: s.test_file.clone(),
            placement: s.placement,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub per_test_timeout: Duration,
    /// Where the recorder must write; `Some` only for coverage passes
    pub coverage_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn text(&self) -> String {
        combine(&self.stdout, &self.stderr)
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Compile the test sources. A failed compile is `Ok` with `success == false`.
    async fn compile(
        &self,
        sources: &SourceSet,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError>;

    /// Run the compiled tests.
    async fn execute(
        &self,
        unit: &CompiledUnit,
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError>;
}

/* ============================================================
   Time bounds
   ============================================================ */

#[derive(Debug)]
pub enum Bounded<T> {
    Finished(T),
    TimedOut,
}

/// Run `op` under `limit`. On expiry the child token is cancelled and `op`
/// is awaited to completion so its process is reaped before returning.
pub async fn bounded<T, F, Fut>(
    limit: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Result<Bounded<T>, ToolchainError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ToolchainError>>,
{
    let child = cancel.child_token();
    let fut = op(child.clone());
    tokio::pin!(fut);

    tokio::select! {
        res = &mut fut => res.map(Bounded::Finished),
        _ = tokio::time::sleep(limit) => {
            child.cancel();
            let _ = fut.await;
            if cancel.is_cancelled() {
                Err(ToolchainError::Cancelled)
            } else {
                Ok(Bounded::TimedOut)
            }
        }
    }
}

/* ============================================================
   Shell command toolchain
   ============================================================ */

#[derive(Debug, Clone)]
pub struct CommandToolchain {
    commands: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(commands: ToolchainConfig) -> Self {
        Self { commands }
    }

    fn set(&self, language: Language) -> &CommandSet {
        match language {
            Language::Rust => &self.commands.rust,
            Language::Python => &self.commands.python,
        }
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    async fn compile(
        &self,
        sources: &SourceSet,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError> {
        let set = self.set(sources.language);
        let template = match (sources.placement, &set.inline_compile) {
            (TestPlacement::Inline, Some(inline)) => inline,
            _ => &set.compile,
        };

        let vars = placeholders(&sources.workdir, &sources.test_file, None, None);
        let command = render(template, &vars);

        run_shell(&command, &sources.workdir, &[], cancel).await
    }

    async fn execute(
        &self,
        unit: &CompiledUnit,
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError> {
        let set = self.set(unit.language);
        let template = match (&options.coverage_file, &set.coverage, unit.placement, &set.inline_execute) {
            (Some(_), Some(cov), _, _) => cov,
            (_, _, TestPlacement::Inline, Some(inline)) => inline,
            _ => &set.execute,
        };

        let vars = placeholders(
            &unit.workdir,
            &unit.test_file,
            Some(options.per_test_timeout),
            options.coverage_file.as_deref(),
        );
        let command = render(template, &vars);

        let mut env = vec![(
            PER_TEST_TIMEOUT_ENV.to_string(),
            options.per_test_timeout.as_millis().to_string(),
        )];
        if let Some(cov) = &options.coverage_file {
            env.push((COVERAGE_FILE_ENV.to_string(), cov.display().to_string()));
        }

        run_shell(&command, &unit.workdir, &env, cancel).await
    }
}

fn placeholders(
    workdir: &Path,
    test_file: &Path,
    per_test: Option<Duration>,
    coverage: Option<&Path>,
) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("workdir", workdir.display().to_string());
    vars.insert("test_file", test_file.display().to_string());
    vars.insert(
        "test_name",
        test_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
    );
    vars.insert(
        "per_test_timeout_secs",
        per_test.map(|d| d.as_secs().max(1).to_string()).unwrap_or_default(),
    );
    vars.insert(
        "coverage_file",
        coverage.map(|p| p.display().to_string()).unwrap_or_default(),
    );
    vars
}

/// Replace `{name}` placeholders; unknown names are left untouched.
pub fn render(template: &str, vars: &HashMap<&'static str, String>) -> String {
    vars.iter().fold(template.to_string(), |acc, (k, v)| {
        acc.replace(&format!("{{{k}}}"), v)
    })
}

async fn run_shell(
    command: &str,
    workdir: &Path,
    env: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<ProcessOutput, ToolchainError> {
    if cancel.is_cancelled() {
        return Err(ToolchainError::Cancelled);
    }

    tracing::debug!(%command, workdir = %workdir.display(), "spawning");
    let started = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .env("PYTHONPATH", workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // own group, so test binaries and workers spawned by the shell die with it
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ToolchainError::Spawn {
        command: command.to_string(),
        source,
    })?;
    let group = child.id();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_task = tokio::spawn(read_all(stdout));
    let err_task = tokio::spawn(read_all(stderr));

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            tracing::debug!(%command, "cancelled, killing process group");
            kill_process_group(group);
            let _ = child.start_kill();
            child.wait().await?;
            out_task.abort();
            err_task.abort();
            return Err(ToolchainError::Cancelled);
        }
    };

    let aborts = (out_task.abort_handle(), err_task.abort_handle());
    let readers = async {
        (
            out_task.await.unwrap_or_default(),
            err_task.await.unwrap_or_default(),
        )
    };

    // an exited shell can leave a background grandchild holding the pipes
    let (stdout, stderr) = tokio::select! {
        output = readers => output,
        _ = cancel.cancelled() => {
            kill_process_group(group);
            aborts.0.abort();
            aborts.1.abort();
            return Err(ToolchainError::Cancelled);
        }
    };

    Ok(ProcessOutput {
        success: status.success(),
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed: started.elapsed(),
    })
}

/// SIGKILL every process in the group led by the spawned shell.
#[cfg(unix)]
fn kill_process_group(group: Option<u32>) {
    let Some(pgid) = group.and_then(|id| libc::pid_t::try_from(id).ok()).filter(|&id| id > 0) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; the negative id names the group
    // created at spawn and never our own
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        tracing::trace!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: Option<u32>) {}

async fn read_all<R>(pipe: Option<R>) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut p) = pipe {
        let _ = p.read_to_end(&mut buf).await;
    }
    buf
}
