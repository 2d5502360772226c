use super::command::{CommandLine, CommandResult, ShellCommand};
use super::elevation::{AsRoot, Elevation};
use super::temp_file::DeviceTempFile;
use crate::adb::{AdbError, AdbResult, Transport};
use crate::config::DeviceConfig;
use crate::retry::{self, ReconnectOnDesync, Recovery, RetryPolicy};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use tokio::sync::Mutex;

const STATUS_MARKER: char = '%';
const PIPESTATUS_LEADER: &str = "PIPESTATUS: ";
// Plain `id`: toolbox (pre-M) ignores `-u`.
const IDENTITY_PROBE: &str = "getprop ro.build.version.sdk;id";

static UID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\buid=(\d+)").expect("valid uid regex"));

/// The facts elevation depends on, probed once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub api_level: u32,
    pub uid: u32,
}

/// Builds shell commands and runs them over a `Transport`.
pub struct CommandExecutor<T: Transport> {
    transport: T,
    config: DeviceConfig,
    identity: Mutex<Option<DeviceIdentity>>,
}

/// Split `output%status` as produced by `( cmd );echo %$?`.
pub(crate) fn split_status(raw: &str) -> (Option<i32>, String) {
    let Some(idx) = raw.rfind(STATUS_MARKER) else {
        return (None, raw.to_string());
    };
    match raw[idx + 1..].trim().parse::<i32>() {
        Ok(status) => (Some(status), raw[..idx].to_string()),
        Err(_) => (None, raw.to_string()),
    }
}

impl<T: Transport> CommandExecutor<T> {
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        Self {
            transport,
            config,
            identity: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn serial(&self) -> &str {
        self.transport.serial()
    }

    /// Instance defaults with per-call overrides applied.
    pub fn policy(&self, timeout: Option<std::time::Duration>, retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(
            timeout.unwrap_or(self.config.default_timeout),
            retries.unwrap_or(self.config.default_retries),
        )
        .with_retry_delay(self.config.retry_delay)
    }

    /// Run `cmd` under its timeout/retry policy.
    pub async fn run(&self, cmd: &ShellCommand) -> AdbResult<CommandResult> {
        let policy = self.policy(cmd.timeout, cmd.retries);
        let description = cmd.describe();
        retry::wrap_with(&policy, self, &description, move || self.run_once(cmd)).await
    }

    /// Output lines of `cmd`.
    pub async fn lines(&self, cmd: &ShellCommand) -> AdbResult<Vec<String>> {
        Ok(self.run(cmd).await?.lines)
    }

    /// Run a pipeline and fail if any of its stages exited non-zero.
    pub async fn run_piped(&self, cmd: &ShellCommand) -> AdbResult<Vec<String>> {
        let CommandLine::Raw(script) = &cmd.line else {
            return Err(AdbError::InvalidCommand {
                reason: "piped commands must be raw shell text".to_string(),
            });
        };
        let mut piped = cmd.clone().check_return(true).use_shell(true);
        piped.line = CommandLine::Raw(format!(
            "{}; echo \"{}${{PIPESTATUS[@]}}\"",
            script, PIPESTATUS_LEADER
        ));
        let mut lines = self.run(&piped).await?.lines;
        let statuses = match lines.last().and_then(|l| l.strip_prefix(PIPESTATUS_LEADER)) {
            Some(rest) => rest
                .split_whitespace()
                .map(|s| s.parse::<i32>().ok())
                .collect::<Option<Vec<i32>>>(),
            None => None,
        };
        let Some(statuses) = statuses else {
            log::error!("Pipe exit statuses of shell script missing.");
            return Err(AdbError::CommandFailed {
                command: script.clone(),
                status: None,
                output: lines.join("\n"),
            });
        };
        lines.pop();
        if let Some(failed) = statuses.iter().find(|s| **s != 0) {
            return Err(AdbError::CommandFailed {
                command: script.clone(),
                status: Some(*failed),
                output: lines.join("\n"),
            });
        }
        Ok(lines)
    }

    async fn run_once(&self, cmd: &ShellCommand) -> AdbResult<CommandResult> {
        let elevation = self.elevation_for(cmd.as_root).await?;
        let text = cmd.to_shell_text(elevation)?;

        let result = if cmd.large_output {
            log::debug!("Large output mode enabled. Will write output to device and read results from file.");
            self.run_large_output(&text).await?
        } else {
            let result = self.run_text(&text).await?;
            if result.status.is_none() {
                log::warn!("No exit status found for {:?}, re-running in large output mode", cmd.describe());
                self.run_large_output(&text).await?
            } else {
                result
            }
        };

        if cmd.check_return && !result.success() {
            return Err(AdbError::CommandFailed {
                command: cmd.describe(),
                status: result.status,
                output: result.raw,
            });
        }
        if cmd.raw_output {
            return Ok(result);
        }
        if cmd.single_line {
            return result.into_single_line(&cmd.describe());
        }
        Ok(result)
    }

    /// Elevation for one command. Only commands that ask for root pay for the
    /// identity probe.
    pub async fn elevation_for(&self, request: AsRoot) -> AdbResult<Elevation> {
        if request == AsRoot::No {
            return Ok(Elevation::Direct);
        }
        let identity = self.identity().await?;
        Ok(Elevation::choose(identity.api_level, identity.uid, request))
    }

    pub async fn identity(&self) -> AdbResult<DeviceIdentity> {
        let mut guard = self.identity.lock().await;
        if let Some(identity) = *guard {
            return Ok(identity);
        }
        let result = self.run_text(IDENTITY_PROBE).await?;
        let api_level = result.lines.iter().find_map(|l| l.trim().parse::<u32>().ok());
        let uid = UID_RE
            .captures(&result.raw)
            .and_then(|caps| caps[1].parse::<u32>().ok());
        let (Some(api_level), Some(uid)) = (api_level, uid) else {
            return Err(AdbError::UnexpectedOutput {
                command: IDENTITY_PROBE.to_string(),
                output: result.lines,
            });
        };
        let identity = DeviceIdentity { api_level, uid };
        log::debug!("{}: api level {}, uid {}", self.serial(), api_level, uid);
        *guard = Some(identity);
        Ok(identity)
    }

    /// Forget the identity probe, e.g. after `adb root` or a reconnect.
    pub async fn reset_identity(&self) {
        *self.identity.lock().await = None;
    }

    async fn run_large_output(&self, text: &str) -> AdbResult<CommandResult> {
        let capture = DeviceTempFile::new(&self.config.temp_dir, "temp_file", "");
        let redirected = format!("( {} )>{} 2>&1", text, capture.name_quoted());
        let result = match self.run_text(&redirected).await {
            Ok(run) => self
                .read_to_string(&capture.name)
                .await
                .map(|raw| CommandResult::new(run.status, raw)),
            Err(e) => Err(e),
        };
        self.remove_temp(&capture).await;
        result
    }

    /// Run shell text, shipping it as a script when it is too long for one
    /// adb shell request.
    async fn run_text(&self, text: &str) -> AdbResult<CommandResult> {
        if text.len() < self.config.max_command_length {
            return self.shell_with_status(text).await;
        }
        let script = DeviceTempFile::new(&self.config.temp_dir, "temp_file", ".sh");
        self.write_bytes(&script.name, text.as_bytes()).await?;
        log::info!(
            "Large shell command will be run from file: {} ...",
            text.chars().take(self.config.max_command_length).collect::<String>()
        );
        let result = self
            .shell_with_status(&format!("sh {}", script.name_quoted()))
            .await;
        self.remove_temp(&script).await;
        result
    }

    async fn shell_with_status(&self, text: &str) -> AdbResult<CommandResult> {
        let raw = self
            .transport
            .shell(&format!("( {} );echo {}$?", text.trim_end(), STATUS_MARKER))
            .await?;
        let (status, output) = split_status(&raw);
        Ok(CommandResult::new(status, output))
    }

    /// Best effort removal; a leftover temp file is not worth failing for.
    pub async fn remove_temp(&self, temp: &DeviceTempFile) {
        if let Err(e) = self
            .shell_with_status(&format!("rm -f {}", temp.name_quoted()))
            .await
        {
            log::debug!("Could not remove {}: {}", temp.name, e);
        }
    }

    fn transfer_policy(&self) -> RetryPolicy {
        self.policy(None, None)
    }

    /// `adb push` under the default timeout/retry policy.
    pub async fn push(&self, host_path: &Path, device_path: &str) -> AdbResult<()> {
        let description = format!("push {} -> {}", host_path.display(), device_path);
        retry::wrap_with(&self.transfer_policy(), self, &description, || {
            self.transport.push(host_path, device_path)
        })
        .await
    }

    /// `adb pull` under the default timeout/retry policy.
    pub async fn pull(&self, device_path: &str, host_path: &Path) -> AdbResult<()> {
        let description = format!("pull {} -> {}", device_path, host_path.display());
        retry::wrap_with(&self.transfer_policy(), self, &description, || {
            self.transport.pull(device_path, host_path)
        })
        .await
    }

    /// Push `contents` to `device_path` through a host temp file.
    pub async fn write_with_push(&self, device_path: &str, contents: &[u8]) -> AdbResult<()> {
        let host_temp = host_copy(contents)?;
        self.push(host_temp.path(), device_path).await
    }

    /// Pull `device_path` and decode it lossily as text.
    pub async fn pull_to_string(&self, device_path: &str) -> AdbResult<String> {
        let host_temp = tempfile::NamedTempFile::new()
            .map_err(|e| AdbError::io(std::env::temp_dir(), e))?;
        self.pull(device_path, host_temp.path()).await?;
        read_lossy(host_temp.path()).await
    }

    // Single transfers used inside a command attempt, which already runs
    // under a policy.

    async fn write_bytes(&self, device_path: &str, contents: &[u8]) -> AdbResult<()> {
        let host_temp = host_copy(contents)?;
        self.transport.push(host_temp.path(), device_path).await
    }

    async fn read_to_string(&self, device_path: &str) -> AdbResult<String> {
        let host_temp = tempfile::NamedTempFile::new()
            .map_err(|e| AdbError::io(std::env::temp_dir(), e))?;
        self.transport.pull(device_path, host_temp.path()).await?;
        read_lossy(host_temp.path()).await
    }
}

/// Rebuilding the session also forgets the identity, so the next root
/// command probes again. `DeviceStateCache` needs no reset here: its token
/// file on the device outlives the adb session.
impl<T: Transport> Recovery for CommandExecutor<T> {
    async fn recover(&self, err: &AdbError) -> AdbResult<bool> {
        let recovered = ReconnectOnDesync(&self.transport).recover(err).await?;
        if recovered {
            self.reset_identity().await;
        }
        Ok(recovered)
    }
}

fn host_copy(contents: &[u8]) -> AdbResult<tempfile::NamedTempFile> {
    let mut host_temp = tempfile::NamedTempFile::new()
        .map_err(|e| AdbError::io(std::env::temp_dir(), e))?;
    host_temp
        .write_all(contents)
        .and_then(|_| host_temp.flush())
        .map_err(|e| AdbError::io(host_temp.path(), e))?;
    Ok(host_temp)
}

async fn read_lossy(path: &Path) -> AdbResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| AdbError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
