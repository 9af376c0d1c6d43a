use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::BackendError;
use crate::llm::backend::CompletionBackend;
use crate::llm::prompt::LlmPrompt;

/// Local model bridge: prompt on stdin, completion on stdout.
///
/// The child is killed if the caller drops the future (timeout, cancel).
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl CompletionBackend for CommandBackend {
    async fn complete(&self, prompt: &LlmPrompt, max_tokens: u32) -> Result<String, BackendError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("UNITFORGE_MAX_TOKENS", max_tokens.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Transport(format!("cannot start {}: {e}", self.program)))?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(BackendError::Transport(format!(
                "failed to open stdin for {}",
                self.program
            )));
        };

        // fed from its own task: bridges may start answering before they
        // have read the whole prompt
        let input = format!("{}\n\n{}", prompt.system, prompt.user);
        let writer = tokio::spawn(async move {
            stdin.write_all(input.as_bytes()).await
            // stdin drops here, so the bridge sees EOF
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        match writer.await {
            Ok(Ok(())) => {}
            // the bridge stopped reading; its exit status decides
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(BackendError::Transport(e.to_string())),
            Err(e) => return Err(BackendError::Transport(e.to_string())),
        }

        if !output.status.success() {
            return Err(BackendError::Transport(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn name(&self) -> String {
        format!("command:{}", self.program)
    }
}
