#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use unitforge::config::EngineConfig;
use unitforge::coverage::model::{CoverageReport, CoverageUnit};
use unitforge::coverage::record::{encode, SessionInfo};
use unitforge::error::{BackendError, ToolchainError};
use unitforge::llm::{CompletionBackend, LlmPrompt};
use unitforge::repair::{RepairLoop, RetryPolicy};
use unitforge::resolve::{GenerationTarget, ScopeSpec, TargetResolver};
use unitforge::testgen::CandidateGenerator;
use unitforge::verify::{CompiledUnit, ExecOptions, ProcessOutput, SourceSet, Toolchain, VerificationPipeline};

/// Marker a fake reply uses to make the fake compiler fail.
pub const BREAKS_COMPILE: &str = "// fake: compile error";
/// Marker a fake reply uses to make the fake runner report a failed assertion.
pub const FAILS_ASSERT: &str = "// fake: assertion failure";

pub fn reply(marker: &str) -> String {
    format!("```rust\n#[test]\nfn should_add_correctly() {{\n    {marker}\n}}\n```")
}

pub fn passing() -> String {
    reply("assert_eq!(2 + 2, 4);")
}

/* ============================================================
   Backend
   ============================================================ */

pub struct FakeBackend {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<LlmPrompt>>,
}

impl FakeBackend {
    /// Scripted replies in call order, then `passing()` forever.
    pub fn scripted(script: Vec<Result<String, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: passing(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: String) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionBackend for FakeBackend {
    async fn complete(&self, prompt: &LlmPrompt, _max_tokens: u32) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn name(&self) -> String {
        "fake".into()
    }
}

/* ============================================================
   Toolchain
   ============================================================ */

/// Decides outcomes from the markers in the materialized test file.
pub struct FakeToolchain {
    compile_delay: Duration,
    execute_delay: Duration,
    pub compiles: AtomicUsize,
    pub executions: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub workdirs: Mutex<Vec<PathBuf>>,
}

impl FakeToolchain {
    pub fn new(compile_delay: Duration) -> Arc<Self> {
        Self::with_delays(compile_delay, Duration::ZERO)
    }

    /// A runner that hangs for `execute_delay` before reporting.
    pub fn with_delays(compile_delay: Duration, execute_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            compile_delay,
            execute_delay,
            compiles: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            workdirs: Mutex::new(Vec::new()),
        })
    }

    async fn busy(&self, cancel: &CancellationToken) -> Result<(), ToolchainError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let res = tokio::select! {
            _ = cancel.cancelled() => Err(ToolchainError::Cancelled),
            _ = tokio::time::sleep(self.compile_delay) => Ok(()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

fn read(workdir: &Path, file: &Path) -> String {
    fs::read_to_string(workdir.join(file)).unwrap_or_default()
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn compile(
        &self,
        sources: &SourceSet,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.workdirs.lock().unwrap().push(sources.workdir.clone());
        self.busy(cancel).await?;

        let text = read(&sources.workdir, &sources.test_file);
        if text.contains(BREAKS_COMPILE) {
            return Ok(ProcessOutput {
                success: false,
                exit_code: Some(101),
                stderr: format!(
                    "error[E0425]: cannot find value `y` in this scope\n --> {}:4:5\n",
                    sources.test_file.display()
                ),
                ..Default::default()
            });
        }
        Ok(ProcessOutput {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        })
    }

    async fn execute(
        &self,
        unit: &CompiledUnit,
        options: &ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ToolchainError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolchainError::Cancelled),
            _ = tokio::time::sleep(self.execute_delay) => {}
        }

        let text = read(&unit.workdir, &unit.test_file);
        if text.contains(FAILS_ASSERT) {
            return Ok(ProcessOutput {
                success: false,
                exit_code: Some(101),
                stdout: "running 1 test\ntest should_add_correctly ... FAILED\n\
                         test result: FAILED. 0 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out\n"
                    .into(),
                stderr: "thread 'should_add_correctly' panicked at tests/t.rs:4:5:\n\
                         assertion `left == right` failed\n  left: 3\n right: 4\n"
                    .into(),
                ..Default::default()
            });
        }

        if let Some(path) = &options.coverage_file {
            let report = CoverageReport::from_units(
                vec![(
                    "src/lib.rs".to_string(),
                    CoverageUnit::new("Calc", "add", 3, 5).with_line(4, 1),
                )],
                false,
            );
            let session = SessionInfo {
                id: "fake".into(),
                started_at_ms: 0,
                dumped_at_ms: 1,
            };
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(path, encode(&session, &report))?;
        }

        Ok(ProcessOutput {
            success: true,
            exit_code: Some(0),
            stdout: "running 1 test\ntest should_add_correctly ... ok\n\
                     test result: ok. 1 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out\n"
                .into(),
            ..Default::default()
        })
    }
}

/* ============================================================
   Fixture project
   ============================================================ */

pub struct Fixture {
    pub project: TempDir,
    pub scratch: TempDir,
}

impl Fixture {
    /// A small Rust crate with one struct of five methods.
    pub fn rust() -> Self {
        let project = tempfile::tempdir().unwrap();
        let root = project.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(
            root.join("Cargo.toml"),
            "[package]\nname = \"calc\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
        )
        .unwrap();
        fs::write(
            root.join("src/lib.rs"),
            r#"pub struct Calc;

impl Calc {
    pub fn add(&self, a: i32, b: i32) -> i32 {
        a + b
    }

    pub fn sub(&self, a: i32, b: i32) -> i32 {
        a - b
    }

    pub fn mul(&self, a: i32, b: i32) -> i32 {
        a * b
    }

    pub fn div(&self, a: i32, b: i32) -> Result<i32, String> {
        if b == 0 {
            return Err("divide by zero".into());
        }
        Ok(a / b)
    }

    pub fn neg(&self, a: i32) -> i32 {
        -a
    }

    pub fn get_scale(&self) -> i32 {
        1
    }
}
"#,
        )
        .unwrap();

        Self {
            project,
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.project.path()
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 4,
            collect_coverage: false,
            scratch_root: Some(self.scratch.path().join("work")),
            ..EngineConfig::default()
        }
    }

    pub fn targets(&self) -> Vec<GenerationTarget> {
        TargetResolver::new(self.root(), false)
            .resolve(&"class:Calc".parse::<ScopeSpec>().unwrap())
            .unwrap()
    }

    pub fn target(&self, method: &str) -> GenerationTarget {
        TargetResolver::new(self.root(), false)
            .resolve(&format!("method:Calc::{method}").parse::<ScopeSpec>().unwrap())
            .unwrap()
            .remove(0)
    }

    /// Directories left under the scratch root.
    pub fn leftover_scratch(&self) -> usize {
        match fs::read_dir(self.scratch.path().join("work")) {
            Ok(rd) => rd.count(),
            Err(_) => 0,
        }
    }
}

pub fn repair_loop(
    cfg: &EngineConfig,
    root: &Path,
    backend: Arc<dyn CompletionBackend>,
    toolchain: Arc<dyn Toolchain>,
) -> RepairLoop {
    let generator = CandidateGenerator::new(backend, cfg).with_crate_name(Some("calc".into()));
    let pipeline = VerificationPipeline::new(root, toolchain, cfg);
    RepairLoop::new(generator, pipeline, RetryPolicy::from_config(cfg))
}
