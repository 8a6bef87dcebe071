//! Process Engine
//!
//! Runs the inference engine as a child worker process and talks to it with
//! newline-delimited JSON over stdio. One worker per loaded model; the worker
//! is killed when the model handle is dropped.
//!
//! Commands (stdin):  `{"op":"load",...}`, `{"op":"generate",...}`, `{"op":"tokenize",...}`
//! Events (stdout):   `{"event":"progress"|"loaded"|"result"|"tokens"|"error",...}`
//!
//! Anything on stdout that is not an event is engine chatter and only logged.

use super::format_detector::FormatDetector;
use super::runtime_manager::ProgressReporter;
use super::runtime_trait::*;
use crate::config::Config;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const WORKER_SCRIPT: &str = "airllm_worker.py";

/// Worker script shipped in the crate's `worker/` directory.
const BUNDLED_SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/worker/airllm_worker.py");

/// Progress published once the worker process is running.
const SPAWNED_PROGRESS: f32 = 0.1;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerCommand<'a> {
    Load {
        model_path: &'a str,
        compression: &'a str,
        device: &'a str,
        options: &'a LoadOptions,
    },
    Generate {
        prompt: &'a str,
        max_new_tokens: i32,
        temperature: f32,
        top_p: f32,
        stop_sequences: &'a [String],
    },
    Tokenize {
        text: &'a str,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkerEvent {
    Progress { progress: f32 },
    Loaded,
    #[serde(rename = "result")]
    Generated { text: String },
    Tokens { count: usize },
    Error { message: String },
}

pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    device: String,
}

impl ProcessEngine {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        device: &str,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            env,
            device: device.to_string(),
        }
    }

    /// Resolve the worker command and script from the runner configuration.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let program = which::which(&cfg.engine_command).map_err(|e| {
            anyhow!("engine command '{}' not found in PATH: {}", cfg.engine_command, e)
        })?;
        let script = resolve_script(cfg.engine_script.as_deref())?;

        info!("Engine worker: {} {}", program.display(), script.display());

        let mut env = vec![("AIRLLM_DEVICE".to_string(), cfg.device.clone())];
        if !cfg.engine_pythonpath.is_empty() {
            env.push(("PYTHONPATH".to_string(), cfg.engine_pythonpath.clone()));
        }

        Ok(Self::new(
            program,
            vec![script.to_string_lossy().into_owned()],
            env,
            &cfg.device,
        ))
    }

    fn spawn(&self) -> anyhow::Result<WorkerIo> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn engine worker {}", self.program.display()))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("worker stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("worker stdout unavailable"))?;

        debug!("Engine worker spawned (pid {:?})", child.id());

        Ok(WorkerIo {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

fn resolve_script(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        bail!("engine script not found: {}", path.display());
    }

    let mut candidates = vec![
        PathBuf::from("/usr/share/ollama").join(WORKER_SCRIPT),
        PathBuf::from("/usr/lib/ollama").join(WORKER_SCRIPT),
    ];
    if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        candidates.push(dir.join(WORKER_SCRIPT));
    }
    candidates.push(PathBuf::from(BUNDLED_SCRIPT));

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| anyhow!("{} not found", WORKER_SCRIPT))
}

#[async_trait]
impl InferenceEngine for ProcessEngine {
    fn name(&self) -> &str {
        "process"
    }

    async fn load(
        &self,
        request: EngineLoadRequest,
        progress: ProgressReporter,
    ) -> anyhow::Result<Arc<dyn LoadedModel>> {
        let path = Path::new(&request.model_path);
        if !path.exists() {
            bail!("model path does not exist: {}", path.display());
        }
        if !FormatDetector::is_layered_checkpoint(path) {
            warn!("No layered checkpoint layout recognized at {}; loading anyway", path.display());
        }

        let mut io = self.spawn()?;
        progress.report(SPAWNED_PROGRESS);

        io.send(&WorkerCommand::Load {
            model_path: &request.model_path,
            compression: &request.compression,
            device: &self.device,
            options: &request.options,
        })
        .await?;

        loop {
            match io.next_event().await? {
                Some(WorkerEvent::Progress { progress: value }) => progress.report(value),
                Some(WorkerEvent::Loaded) => break,
                Some(WorkerEvent::Error { message }) => bail!("engine: {}", message),
                Some(other) => debug!("Ignoring worker event during load: {:?}", other),
                None => bail!("engine worker exited during load"),
            }
        }

        Ok(Arc::new(WorkerModel { io: Arc::new(Mutex::new(io)) }))
    }
}

fn encode(command: &WorkerCommand<'_>) -> anyhow::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(command)?;
    line.push(b'\n');
    Ok(line)
}

struct WorkerIo {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerIo {
    async fn send(&mut self, command: &WorkerCommand<'_>) -> anyhow::Result<()> {
        self.write_line(&encode(command)?).await
    }

    async fn write_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        self.stdin.write_all(line).await.context("write to engine worker")?;
        self.stdin.flush().await.context("flush engine worker stdin")?;
        Ok(())
    }

    /// Next event, or `None` once the worker closed stdout.
    async fn next_event(&mut self) -> anyhow::Result<Option<WorkerEvent>> {
        while let Some(line) = self.stdout.next_line().await.context("read from engine worker")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(_) => debug!("worker: {}", line),
            }
        }
        Ok(None)
    }
}

/// Loaded model living in a worker process.
///
/// Each command and its reply form one exchange that runs in its own task
/// while holding the worker lock. Dropping the caller (a client hanging up
/// mid-completion) detaches from the exchange but never interrupts it, so the
/// reply is always consumed by the command that asked for it.
struct WorkerModel {
    io: Arc<Mutex<WorkerIo>>,
}

impl WorkerModel {
    async fn exchange(&self, command: &WorkerCommand<'_>, what: &'static str) -> anyhow::Result<WorkerEvent> {
        let task = tokio::spawn(run_exchange(self.io.clone(), encode(command)?, what));
        task.await.map_err(|e| anyhow!("engine {} task failed: {}", what, e))?
    }
}

async fn run_exchange(
    io: Arc<Mutex<WorkerIo>>,
    line: Vec<u8>,
    what: &'static str,
) -> anyhow::Result<WorkerEvent> {
    let mut io = io.lock().await;
    io.write_line(&line).await?;
    loop {
        match io.next_event().await? {
            Some(event @ (WorkerEvent::Generated { .. } | WorkerEvent::Tokens { .. } | WorkerEvent::Error { .. })) => {
                return Ok(event)
            }
            Some(other) => debug!("Ignoring worker event during {}: {:?}", what, other),
            None => bail!("engine worker exited during {}", what),
        }
    }
}

#[async_trait]
impl LoadedModel for WorkerModel {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        let command = WorkerCommand::Generate {
            prompt,
            max_new_tokens: params.max_new_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop_sequences: &params.stop_sequences,
        };
        match self.exchange(&command, "generation").await? {
            WorkerEvent::Generated { text } => Ok(text),
            WorkerEvent::Error { message } => bail!(message),
            other => bail!("unexpected worker reply to generate: {:?}", other),
        }
    }

    async fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        match self.exchange(&WorkerCommand::Tokenize { text }, "tokenize").await? {
            WorkerEvent::Tokens { count } => Ok(count),
            WorkerEvent::Error { message } => bail!(message),
            other => bail!("unexpected worker reply to tokenize: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_runtime::runtime_manager::{ModelManager, ServerStatus};
    use crate::model_runtime::test_support::wait_for_status;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_command_wire_format() {
        let cmd = WorkerCommand::Tokenize { text: "hello world" };
        assert_eq!(
            serde_json::to_string(&cmd).unwrap(),
            r#"{"op":"tokenize","text":"hello world"}"#
        );

        let stop = vec!["\n\n".to_string()];
        let cmd = WorkerCommand::Generate {
            prompt: "hi",
            max_new_tokens: 8,
            temperature: 0.5,
            top_p: 0.75,
            stop_sequences: &stop,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["op"], "generate");
        assert_eq!(value["max_new_tokens"], 8);
        assert_eq!(value["stop_sequences"], serde_json::json!(["\n\n"]));
    }

    #[test]
    fn test_event_parsing() {
        let parse = |s: &str| serde_json::from_str::<WorkerEvent>(s).unwrap();
        assert_eq!(parse(r#"{"event":"progress","progress":0.5}"#), WorkerEvent::Progress { progress: 0.5 });
        assert_eq!(parse(r#"{"event":"loaded"}"#), WorkerEvent::Loaded);
        assert_eq!(
            parse(r#"{"event":"result","text":"hi"}"#),
            WorkerEvent::Generated { text: "hi".into() }
        );
        assert_eq!(parse(r#"{"event":"tokens","count":3}"#), WorkerEvent::Tokens { count: 3 });
        assert!(serde_json::from_str::<WorkerEvent>("Loading checkpoint shards").is_err());
    }

    #[test]
    fn test_resolve_script() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("worker.py");
        std::fs::write(&script, "").unwrap();

        assert_eq!(resolve_script(Some(&script)).unwrap(), script);
        assert!(resolve_script(Some(&dir.path().join("missing.py"))).is_err());
    }

    #[test]
    fn test_bundled_worker_script_is_found() {
        assert!(Path::new(BUNDLED_SCRIPT).is_file());
        let found = resolve_script(None).unwrap();
        assert!(found.ends_with(WORKER_SCRIPT));
    }

    #[test]
    fn test_from_config_rejects_unknown_command() {
        let cfg = Config {
            engine_command: "runner-shim-no-such-interpreter".to_string(),
            ..Config::default()
        };
        assert!(ProcessEngine::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_load_rejects_missing_path() {
        let engine = ProcessEngine::new("sh", vec![], vec![], "cpu");
        let request = EngineLoadRequest {
            model_path: "/definitely/not/a/model".to_string(),
            compression: "4bit".to_string(),
            options: LoadOptions::default(),
        };
        let err = engine.load(request, ProgressReporter::detached()).await.err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }

    #[cfg(unix)]
    mod worker {
        use super::*;

        const HAPPY_WORKER: &str = r#"
read line
case "$line" in
  *'"compression":"8bit"'*) ;;
  *) echo '{"event":"error","message":"unexpected load command"}'; exit 0 ;;
esac
echo '{"event":"progress","progress":0.5}'
echo 'Loading checkpoint shards: 100%'
echo '{"event":"loaded"}'
while read line; do
  case "$line" in
    *'"op":"generate"'*) echo 'warming up'; echo '{"event":"result","text":"hi from worker"}' ;;
    *'"op":"tokenize"'*) echo '{"event":"tokens","count":7}' ;;
  esac
done
"#;

        fn sh_engine(script: &str) -> ProcessEngine {
            ProcessEngine::new("sh", vec!["-c".to_string(), script.to_string()], vec![], "cpu")
        }

        fn request(dir: &TempDir, compression: &str) -> EngineLoadRequest {
            EngineLoadRequest {
                model_path: dir.path().to_string_lossy().into_owned(),
                compression: compression.to_string(),
                options: LoadOptions::default(),
            }
        }

        #[tokio::test]
        async fn test_worker_round_trip() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine(HAPPY_WORKER);

            let model = engine
                .load(request(&dir, "8bit"), ProgressReporter::detached())
                .await
                .unwrap();

            let text = model.generate("hi", &GenerationParams::default()).await.unwrap();
            assert_eq!(text, "hi from worker");
            assert_eq!(model.count_tokens("anything").await.unwrap(), 7);
        }

        #[tokio::test]
        async fn test_worker_drives_lifecycle() {
            let dir = TempDir::new().unwrap();
            let manager = ModelManager::new(Arc::new(sh_engine(HAPPY_WORKER)));

            manager
                .start_load(&dir.path().to_string_lossy(), "8bit", LoadOptions::default())
                .unwrap();
            wait_for_status(&manager, ServerStatus::Ready).await;

            assert_eq!(manager.snapshot().progress, 1.0);
            assert_eq!(manager.count_tokens("anything").await, 7);
        }

        #[tokio::test]
        async fn test_worker_load_error() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine(HAPPY_WORKER);

            let err = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .err()
                .unwrap();
            assert!(err.to_string().contains("unexpected load command"));
        }

        #[tokio::test]
        async fn test_worker_exit_during_load() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine("read line; echo 'ImportError: no module named airllm'; exit 1");

            let err = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .err()
                .unwrap();
            assert!(err.to_string().contains("exited during load"));
        }

        #[tokio::test]
        async fn test_abandoned_request_does_not_leak_its_reply() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine(
                r#"read line; echo '{"event":"loaded"}'
n=0
while read line; do
  case "$line" in
    *'"op":"generate"'*) n=$((n+1)); sleep 0.3; echo "{\"event\":\"result\",\"text\":\"reply-$n\"}" ;;
    *'"op":"tokenize"'*) echo '{"event":"tokens","count":7}' ;;
  esac
done"#,
            );
            let model = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .unwrap();

            // caller gives up while the worker is still generating
            let abandoned = tokio::time::timeout(
                Duration::from_millis(50),
                model.generate("prompt A", &GenerationParams::default()),
            )
            .await;
            assert!(abandoned.is_err());

            assert_eq!(model.count_tokens("prompt B").await.unwrap(), 7);
            let text = model.generate("prompt C", &GenerationParams::default()).await.unwrap();
            assert_eq!(text, "reply-2");
        }

        #[tokio::test]
        async fn test_abandoned_tokenize_does_not_leak_its_count() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine(
                r#"read line; echo '{"event":"loaded"}'
n=0
while read line; do
  n=$((n+1))
  case "$line" in
    *'"op":"tokenize"'*) sleep 0.3; echo "{\"event\":\"tokens\",\"count\":$n}" ;;
    *'"op":"generate"'*) echo '{"event":"result","text":"own reply"}' ;;
  esac
done"#,
            );
            let model = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .unwrap();

            let abandoned = tokio::time::timeout(Duration::from_millis(50), model.count_tokens("a")).await;
            assert!(abandoned.is_err());

            let text = model.generate("b", &GenerationParams::default()).await.unwrap();
            assert_eq!(text, "own reply");
            assert_eq!(model.count_tokens("c").await.unwrap(), 3);
        }

        const STUB_AIRLLM: &str = r#"
class _Tokenizer:
    def encode(self, text):
        return text.split()

class AutoModel:
    @classmethod
    def from_pretrained(cls, path, device, compression, profiling_mode):
        print("Loading checkpoint shards")
        model = cls()
        model.tokenizer = _Tokenizer()
        model.settings = (device, compression)
        return model

    def generate(self, prompt, max_new_tokens, temperature, top_p, stop_sequences):
        return "%s|%d|%s" % (prompt.upper(), max_new_tokens, ",".join(stop_sequences))
"#;

        #[tokio::test]
        async fn test_bundled_worker_speaks_protocol() {
            let Ok(python) = which::which("python3") else {
                return;
            };
            let libs = TempDir::new().unwrap();
            std::fs::create_dir(libs.path().join("airllm")).unwrap();
            std::fs::write(libs.path().join("airllm/__init__.py"), STUB_AIRLLM).unwrap();
            std::fs::write(libs.path().join("torch.py"), "").unwrap();

            let engine = ProcessEngine::new(
                python,
                vec![BUNDLED_SCRIPT.to_string()],
                vec![("PYTHONPATH".to_string(), libs.path().to_string_lossy().into_owned())],
                "cpu",
            );
            let dir = TempDir::new().unwrap();
            let model = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .unwrap();

            let params = GenerationParams {
                max_new_tokens: 16,
                stop_sequences: vec!["</s>".to_string()],
                ..GenerationParams::default()
            };
            assert_eq!(model.generate("hi there", &params).await.unwrap(), "HI THERE|16|</s>");
            assert_eq!(model.count_tokens("one two three").await.unwrap(), 3);
        }

        #[tokio::test]
        async fn test_bundled_worker_reports_import_failure() {
            let Ok(python) = which::which("python3") else {
                return;
            };
            let empty = TempDir::new().unwrap();
            let engine = ProcessEngine::new(
                python,
                vec![BUNDLED_SCRIPT.to_string()],
                vec![("PYTHONPATH".to_string(), empty.path().to_string_lossy().into_owned())],
                "cpu",
            );
            let dir = TempDir::new().unwrap();
            let err = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .err()
                .unwrap();
            assert!(err.to_string().contains("airllm"), "{err}");
        }

        #[tokio::test]
        async fn test_worker_generation_error() {
            let dir = TempDir::new().unwrap();
            let engine = sh_engine(
                r#"read line; echo '{"event":"loaded"}'
while read line; do echo '{"event":"error","message":"CUDA out of memory"}'; done"#,
            );

            let model = engine
                .load(request(&dir, "4bit"), ProgressReporter::detached())
                .await
                .unwrap();
            let err = model.generate("hi", &GenerationParams::default()).await.unwrap_err();
            assert!(err.to_string().contains("CUDA out of memory"));
        }
    }
}
