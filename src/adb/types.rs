// Core ADB types and traits
use super::error::AdbResult;
use serde::Serialize;
use std::path::Path;

/// Opaque per-device command channel.
///
/// Implementations move bytes only: they never add status markers, quoting
/// or elevation. Everything above framing lives in `shell::CommandExecutor`.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// Run `command` through the device shell and return its combined output.
    async fn shell(&self, command: &str) -> AdbResult<String>;

    /// Copy a host file or directory to `device_path`.
    async fn push(&self, host_path: &Path, device_path: &str) -> AdbResult<()>;

    /// Copy `device_path` into the host file `host_path`.
    async fn pull(&self, device_path: &str, host_path: &Path) -> AdbResult<()>;

    /// Tear down and re-establish the session after a protocol desync.
    async fn reconnect(&self) -> AdbResult<()> {
        Ok(())
    }

    fn serial(&self) -> &str;
}

#[derive(Debug, PartialEq, Serialize, Clone)]
pub struct Device {
    pub name: String,
    pub state: String,
}

impl Device {
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }
}
