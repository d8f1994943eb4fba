//! Subprocess-backed synthesis engine.
//!
//! Each worker owns one child process. Commands and replies are single-line
//! JSON objects on the child's stdin/stdout:
//!
//! ```text
//! → {"id":7,"op":"run","text":"hello","output_target":"/tmp/a.wav"}
//! ← {"id":7,"ok":true,"duration_ms":840,"output_target":"/tmp/a.wav"}
//! ← {"id":8,"ok":false,"error":"voice not loaded","code":"MODEL_NOT_FOUND"}
//! ```
//!
//! Replies carrying a stale `id` (left over from an abandoned call) are
//! skipped, as are lines that are not JSON. A reply line cut off by a
//! cancelled call stays buffered and is finished by the next call. A command
//! whose write was cancelled leaves stdin torn, so the process is dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{EngineError, EngineFactory, EngineOutput, SynthesisEngine, SynthesisJob};
use crate::config::EngineConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum EngineOp<'a> {
    Initialize { model: Option<&'a str> },
    Run(&'a SynthesisJob),
    Ping,
    Shutdown,
}

#[derive(Debug, Serialize)]
struct EngineCommand<'a> {
    id: u64,
    #[serde(flatten)]
    op: EngineOp<'a>,
}

#[derive(Debug, Deserialize)]
struct EngineReply {
    id: Option<u64>,
    ok: bool,
    duration_ms: Option<u64>,
    output_target: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

impl EngineReply {
    fn into_error(self) -> EngineError {
        let message = self.error.unwrap_or_else(|| "engine reported failure".to_string());
        match self.code.as_deref() {
            Some("MODEL_NOT_FOUND") => EngineError::ModelNotFound(message),
            Some("INITIALIZATION_FAILED") => EngineError::Initialization(message),
            _ => EngineError::Synthesis(message),
        }
    }
}

struct ProcessIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Bytes of the reply line read so far.
    partial: Vec<u8>,
    /// Still set after a call means its command was only partly written.
    writing: bool,
}

/// Engine running as a child process.
pub struct ProcessEngine {
    worker_id: u64,
    model: Option<String>,
    config: EngineConfig,
    next_id: AtomicU64,
    io: Mutex<Option<ProcessIo>>,
}

impl ProcessEngine {
    pub fn new(worker_id: u64, model: Option<String>, config: EngineConfig) -> Self {
        Self {
            worker_id,
            model,
            config,
            next_id: AtomicU64::new(1),
            io: Mutex::new(None),
        }
    }

    fn spawn(&self) -> Result<ProcessIo, EngineError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .env("SYNTH_WORKER_ID", self.worker_id.to_string());
        if let Some(model) = &self.model {
            cmd.env("SYNTH_MODEL", model);
        }
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Initialization(format!("{}: {}", self.config.command, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Initialization("no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Initialization("no stdout".into()))?;

        tracing::debug!(
            worker_id = self.worker_id,
            pid = child.id().unwrap_or_default(),
            command = %self.config.command,
            "Engine process spawned"
        );

        Ok(ProcessIo {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            partial: Vec::new(),
            writing: false,
        })
    }

    async fn exchange(&self, slot: &mut Option<ProcessIo>, op: EngineOp<'_>) -> Result<EngineReply, EngineError> {
        let io = slot
            .as_mut()
            .ok_or_else(|| EngineError::Unavailable("engine not started".into()))?;
        if io.writing {
            tracing::warn!(worker_id = self.worker_id, "Engine stdin holds a torn command, dropping process");
            *slot = None;
            return Err(EngineError::Unavailable("engine stdin holds a partial command".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&EngineCommand { id, op })
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        line.push('\n');

        let result = self.round_trip(io, id, line.as_bytes()).await;
        if matches!(result, Err(EngineError::Io(_)) | Err(EngineError::Unavailable(_))) {
            // The pipe is gone; the process is unusable from here on.
            *slot = None;
        }
        result
    }

    async fn round_trip(&self, io: &mut ProcessIo, id: u64, line: &[u8]) -> Result<EngineReply, EngineError> {
        io.writing = true;
        io.stdin.write_all(line).await?;
        io.stdin.flush().await?;
        io.writing = false;

        loop {
            // read_until appends to `partial`, so a cancelled call loses nothing.
            let n = io.stdout.read_until(b'\n', &mut io.partial).await?;
            if n == 0 || io.partial.last() != Some(&b'\n') {
                return Err(EngineError::Unavailable("engine process exited".into()));
            }
            let raw = std::mem::take(&mut io.partial);
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let reply: EngineReply = match serde_json::from_str(trimmed) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(worker_id = self.worker_id, error = %e, "Skipping non-reply engine output");
                    continue;
                }
            };
            match reply.id {
                Some(reply_id) if reply_id != id => {
                    tracing::trace!(worker_id = self.worker_id, reply_id, "Skipping stale engine reply");
                    continue;
                }
                _ => return Ok(reply),
            }
        }
    }
}

#[async_trait]
impl SynthesisEngine for ProcessEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        let mut slot = self.io.lock().await;
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        let reply = self
            .exchange(&mut slot, EngineOp::Initialize { model: self.model.as_deref() })
            .await
            .map_err(|e| match e {
                EngineError::Initialization(_) | EngineError::ModelNotFound(_) => e,
                other => EngineError::Initialization(other.to_string()),
            })?;
        if reply.ok {
            Ok(())
        } else {
            Err(EngineError::Initialization(
                reply.error.unwrap_or_else(|| "engine refused to initialize".into()),
            ))
        }
    }

    async fn run(&self, job: &SynthesisJob) -> Result<EngineOutput, EngineError> {
        let mut slot = self.io.lock().await;
        let reply = self.exchange(&mut slot, EngineOp::Run(job)).await?;
        if !reply.ok {
            return Err(reply.into_error());
        }
        Ok(EngineOutput {
            output_target: reply.output_target.or_else(|| job.output_target.clone()),
            duration_ms: reply.duration_ms,
        })
    }

    async fn health_ping(&self) -> Result<(), EngineError> {
        let mut slot = self.io.lock().await;
        let reply = self.exchange(&mut slot, EngineOp::Ping).await?;
        if reply.ok {
            Ok(())
        } else {
            Err(reply.into_error())
        }
    }

    async fn shutdown(&self) {
        let mut slot = self.io.lock().await;
        if slot.is_none() {
            return;
        }
        let polite = tokio::time::timeout(SHUTDOWN_GRACE, self.exchange(&mut slot, EngineOp::Shutdown)).await;
        if let Some(mut io) = slot.take() {
            if polite.is_err() {
                tracing::warn!(worker_id = self.worker_id, "Engine did not acknowledge shutdown, killing");
            }
            if let Err(e) = io.child.kill().await {
                tracing::debug!(worker_id = self.worker_id, error = %e, "Engine process already gone");
            }
        }
    }
}

/// Factory producing a [`ProcessEngine`] per worker.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    config: EngineConfig,
}

impl ProcessEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self, worker_id: u64, model: Option<&str>) -> Arc<dyn SynthesisEngine> {
        Arc::new(ProcessEngine::new(
            worker_id,
            model.map(str::to_string),
            self.config.clone(),
        ))
    }

    fn models(&self) -> Vec<String> {
        self.config.models.clone()
    }
}
