// Scripted in-memory transport used by unit tests.
//
// It understands the framing that `CommandExecutor` adds (status marker,
// large-output redirect, overflow scripts, temp file removal) and hands the
// remaining inner command to a test-supplied responder.
use super::error::{AdbError, AdbResult};
use super::types::Transport;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};

static REDIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\( (.*) \)>(\S+) 2>&1$").unwrap());
static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sh (\S+)$").unwrap());

pub(crate) enum Reply {
    Output { out: String, status: i32 },
    /// Output whose status marker never arrived.
    Truncated(String),
    Fail(AdbError),
}

impl Reply {
    pub(crate) fn ok(out: impl Into<String>) -> Self {
        Reply::Output {
            out: out.into(),
            status: 0,
        }
    }

    pub(crate) fn status(out: impl Into<String>, status: i32) -> Self {
        Reply::Output {
            out: out.into(),
            status,
        }
    }
}

type Responder = Box<dyn Fn(&str) -> Reply + Send + Sync>;

pub(crate) struct FakeTransport {
    serial: String,
    responder: Responder,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// Inner commands that reached the responder.
    pub commands: Mutex<Vec<String>>,
    /// Exact text handed to `shell`.
    pub raw: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<String>>,
    pub reconnects: AtomicUsize,
    /// Make push and pull hang forever.
    pub stall_transfers: AtomicBool,
}

impl FakeTransport {
    pub(crate) fn new(responder: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            serial: "emulator-5554".to_string(),
            responder: Box::new(responder),
            files: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            raw: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
            stall_transfers: AtomicBool::new(false),
        }
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn raw(&self) -> Vec<String> {
        self.raw.lock().unwrap().clone()
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    async fn stall(&self) {
        if self.stall_transfers.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn resolve(&self, inner: &str) -> Reply {
        if let Some(caps) = SCRIPT_RE.captures(inner) {
            let script = self.file(&caps[1]);
            if let Some(script) = script {
                return self.resolve(&script);
            }
        }
        if let Some(caps) = REDIRECT_RE.captures(inner) {
            let target = caps[2].to_string();
            return match self.resolve(&caps[1]) {
                Reply::Output { out, status } => {
                    self.files.lock().unwrap().insert(target, out.into_bytes());
                    Reply::status("", status)
                }
                Reply::Truncated(out) => {
                    self.files.lock().unwrap().insert(target, out.into_bytes());
                    Reply::ok("")
                }
                fail => fail,
            };
        }
        if let Some(rest) = inner.strip_prefix("rm -f ") {
            let mut files = self.files.lock().unwrap();
            let known: Vec<&str> = rest
                .split_whitespace()
                .filter(|p| files.contains_key(*p))
                .collect();
            if !known.is_empty() {
                for p in known {
                    files.remove(p);
                }
                return Reply::ok("");
            }
        }
        self.commands.lock().unwrap().push(inner.to_string());
        (self.responder)(inner)
    }
}

impl Transport for FakeTransport {
    async fn shell(&self, command: &str) -> AdbResult<String> {
        self.raw.lock().unwrap().push(command.to_string());
        let (inner, with_status) = match command
            .strip_prefix("( ")
            .and_then(|c| c.strip_suffix(" );echo %$?"))
        {
            Some(inner) => (inner, true),
            None => (command, false),
        };
        match self.resolve(inner) {
            Reply::Output { out, status } if with_status => Ok(format!("{out}%{status}")),
            Reply::Output { out, .. } => Ok(out),
            Reply::Truncated(out) => Ok(out),
            Reply::Fail(e) => Err(e),
        }
    }

    async fn push(&self, host_path: &Path, device_path: &str) -> AdbResult<()> {
        self.stall().await;
        let bytes = std::fs::read(host_path).map_err(|e| AdbError::io(host_path, e))?;
        self.pushes.lock().unwrap().push(device_path.to_string());
        self.files
            .lock()
            .unwrap()
            .insert(device_path.to_string(), bytes);
        Ok(())
    }

    async fn pull(&self, device_path: &str, host_path: &Path) -> AdbResult<()> {
        self.stall().await;
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(device_path)
            .cloned()
            .ok_or_else(|| {
                AdbError::io(
                    device_path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "remote object does not exist"),
                )
            })?;
        std::fs::write(host_path, bytes).map_err(|e| AdbError::io(host_path, e))
    }

    async fn reconnect(&self) -> AdbResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn serial(&self) -> &str {
        &self.serial
    }
}
