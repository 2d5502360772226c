// https://crates.io/crates/adb_client
use super::error::{AdbError, AdbResult};
use super::types::{Device, Transport};
use adb_client::{ADBDeviceExt, ADBServer, ADBServerDevice};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport backed by the local ADB server (`adb start-server`).
///
/// `adb_client` is blocking, so every call runs on `spawn_blocking` while
/// holding the device mutex. That mutex is also what keeps commands on one
/// session strictly ordered.
pub struct ServerTransport {
    serial: String,
    server: Arc<Mutex<ADBServer>>,
    server_device: Arc<Mutex<ADBServerDevice>>,
}

impl ServerTransport {
    pub async fn list_devices() -> AdbResult<Vec<Device>> {
        let mut server = ADBServer::default();
        let device_list = tokio::task::spawn_blocking(move || server.devices())
            .await?
            .map_err(|source| AdbError::Transport {
                operation: "devices".to_string(),
                source,
            })?;
        Ok(device_list
            .into_iter()
            .map(|d| Device {
                name: d.identifier,
                state: d.state.to_string(),
            })
            .collect())
    }

    /// Connect to the first ready device.
    pub async fn connect_first() -> AdbResult<Self> {
        let devices = Self::list_devices().await?;
        let first = devices
            .into_iter()
            .find(Device::is_ready)
            .ok_or_else(|| AdbError::TransportUnreachable {
                serial: String::new(),
                description: "no devices found".to_string(),
            })?;
        Self::new_with_device(&first.name).await
    }

    pub async fn new_with_device(serial: &str) -> AdbResult<Self> {
        let (server, device) = Self::open(serial.to_string()).await?;
        log::debug!("Connected to {} through the ADB server", serial);
        Ok(Self {
            serial: serial.to_string(),
            server: Arc::new(Mutex::new(server)),
            server_device: Arc::new(Mutex::new(device)),
        })
    }

    async fn open(serial: String) -> AdbResult<(ADBServer, ADBServerDevice)> {
        tokio::task::spawn_blocking(move || {
            let mut server = ADBServer::default();
            let device = if serial.is_empty() {
                server.get_device()
            } else {
                server.get_device_by_name(&serial)
            };
            device
                .map(|dev| (server, dev))
                .map_err(|source| AdbError::ConnectionFailed { serial, source })
        })
        .await?
    }

    fn push_blocking(
        dev: &mut ADBServerDevice,
        serial: &str,
        host_path: &Path,
        device_path: &str,
    ) -> AdbResult<()> {
        let meta = std::fs::metadata(host_path).map_err(|e| AdbError::io(host_path, e))?;
        if meta.is_dir() {
            let mut out: Vec<u8> = Vec::new();
            dev.shell_command(&["mkdir", "-p", device_path], &mut out)
                .map_err(|e| {
                    AdbError::from_adb_error_with_desync_check(serial, format!("mkdir {device_path}"), e)
                })?;
            let entries = std::fs::read_dir(host_path).map_err(|e| AdbError::io(host_path, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| AdbError::io(host_path, e))?;
                let child_device = format!(
                    "{}/{}",
                    device_path.trim_end_matches('/'),
                    entry.file_name().to_string_lossy()
                );
                Self::push_blocking(dev, serial, &entry.path(), &child_device)?;
            }
            return Ok(());
        }
        let mut file = File::open(host_path).map_err(|e| AdbError::io(host_path, e))?;
        dev.push(&mut file, &device_path).map_err(|e| {
            AdbError::from_adb_error_with_desync_check(serial, format!("push {device_path}"), e)
        })?;
        Ok(())
    }
}

impl Transport for ServerTransport {
    async fn shell(&self, command: &str) -> AdbResult<String> {
        let server_device = Arc::clone(&self.server_device);
        let serial = self.serial.clone();
        let command = command.to_string();
        tokio::task::spawn_blocking(move || -> AdbResult<String> {
            let mut out: Vec<u8> = Vec::new();
            let mut dev = server_device.blocking_lock();
            dev.shell_command(&[command.as_str()], &mut out)
                .map_err(|e| AdbError::from_adb_error_with_desync_check(&serial, command.clone(), e))?;
            Ok(String::from_utf8_lossy(&out).into_owned())
        })
        .await?
    }

    async fn push(&self, host_path: &Path, device_path: &str) -> AdbResult<()> {
        let server_device = Arc::clone(&self.server_device);
        let serial = self.serial.clone();
        let host_path = host_path.to_path_buf();
        let device_path = device_path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut dev = server_device.blocking_lock();
            Self::push_blocking(&mut dev, &serial, &host_path, &device_path)
        })
        .await?
    }

    async fn pull(&self, device_path: &str, host_path: &Path) -> AdbResult<()> {
        let server_device = Arc::clone(&self.server_device);
        let serial = self.serial.clone();
        let host_path: PathBuf = host_path.to_path_buf();
        let device_path = device_path.to_string();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = host_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| AdbError::io(parent, e))?;
            }
            let mut file = File::create(&host_path).map_err(|e| AdbError::io(&host_path, e))?;
            let mut dev = server_device.blocking_lock();
            dev.pull(&device_path, &mut file).map_err(|e| {
                AdbError::from_adb_error_with_desync_check(&serial, format!("pull {device_path}"), e)
            })?;
            Ok(())
        })
        .await?
    }

    async fn reconnect(&self) -> AdbResult<()> {
        log::warn!("Re-establishing ADB server session for {}", self.serial);
        let (server, device) = Self::open(self.serial.clone()).await?;
        *self.server.lock().await = server;
        *self.server_device.lock().await = device;
        Ok(())
    }

    fn serial(&self) -> &str {
        &self.serial
    }
}
