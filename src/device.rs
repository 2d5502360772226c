// Device-level operations composed from the executor, cache and sync engine.
use crate::adb::{AdbError, AdbResult, Transport};
use crate::cache::DeviceStateCache;
use crate::config::DeviceConfig;
use crate::poll;
use crate::shell::{AsRoot, CommandExecutor, CommandResult, DeviceTempFile, Elevation, ShellCommand, single_quote};
use crate::sync::{DeviceFiles, FileSyncEngine, RemoteFiles, SyncReport};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const BOOT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// One Android device reached through a `Transport`.
pub struct AndroidDevice<T: Transport> {
    exec: CommandExecutor<T>,
    cache: DeviceStateCache,
}

/// Failures that mean "not yet" while a device is coming up.
fn not_ready(err: &AdbError) -> bool {
    err.is_retryable() || matches!(err, AdbError::CommandFailed { .. } | AdbError::UnexpectedOutput { .. })
}

impl<T: Transport> AndroidDevice<T> {
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        Self {
            exec: CommandExecutor::new(transport, config),
            cache: DeviceStateCache::new(),
        }
    }

    pub fn serial(&self) -> &str {
        self.exec.serial()
    }

    pub fn executor(&self) -> &CommandExecutor<T> {
        &self.exec
    }

    pub fn cache(&self) -> &DeviceStateCache {
        &self.cache
    }

    pub async fn run(&self, cmd: &ShellCommand) -> AdbResult<CommandResult> {
        self.exec.run(cmd).await
    }

    /// Output lines of a pipeline, failing if any stage failed.
    pub async fn run_piped(&self, script: &str) -> AdbResult<Vec<String>> {
        self.exec.run_piped(&ShellCommand::shell(script)).await
    }

    /// Rebuild the transport session; everything cached about the device is
    /// dropped with it.
    pub async fn reconnect(&self) -> AdbResult<()> {
        self.exec.transport().reconnect().await?;
        self.clear_cache().await;
        Ok(())
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        self.exec.reset_identity().await;
    }

    pub async fn dump_cache_data(&self) -> AdbResult<String> {
        self.cache.dump(&self.exec).await
    }

    pub async fn load_cache_data(&self, data: &str) -> AdbResult<bool> {
        self.cache.load(&self.exec, data).await
    }

    // Properties

    pub async fn get_prop(&self, key: &str, use_cache: bool) -> AdbResult<String> {
        if use_cache {
            return Ok(self.cache.get_prop(&self.exec, key).await?.unwrap_or_default());
        }
        let cmd = ShellCommand::new(["getprop", key])
            .check_return(true)
            .single_line(true);
        Ok(self.exec.run(&cmd).await?.line().to_string())
    }

    pub async fn set_prop(&self, key: &str, value: &str, check: bool) -> AdbResult<()> {
        let cmd = ShellCommand::new(["setprop", key, value]).check_return(true);
        self.exec.run(&cmd).await?;
        if check {
            let now = self.get_prop(key, false).await?;
            if now != value {
                return Err(AdbError::CommandFailed {
                    command: cmd.describe(),
                    status: Some(0),
                    output: format!("{} is {:?} after setting it to {:?}", key, now, value),
                });
            }
        }
        self.cache.set_cached_prop(key, value).await;
        Ok(())
    }

    pub async fn build_version_sdk(&self) -> AdbResult<u32> {
        let raw = self.get_prop("ro.build.version.sdk", true).await?;
        raw.trim().parse().map_err(|_| AdbError::UnexpectedOutput {
            command: "getprop ro.build.version.sdk".to_string(),
            output: vec![raw],
        })
    }

    pub async fn external_storage_path(&self) -> AdbResult<String> {
        self.cache
            .external_storage(&self.exec)
            .await?
            .ok_or_else(|| AdbError::CommandFailed {
                command: "echo $EXTERNAL_STORAGE".to_string(),
                status: Some(0),
                output: "$EXTERNAL_STORAGE is not set".to_string(),
            })
    }

    // Packages

    /// Installed apk paths of `package`, empty when it is not installed.
    pub async fn application_paths(&self, package: &str) -> AdbResult<Vec<String>> {
        if let Some(paths) = self.cache.apk_paths(&self.exec, package).await? {
            return Ok(paths);
        }
        let lines = self.exec.lines(&ShellCommand::new(["pm", "path", package])).await?;
        let paths: Vec<String> = lines
            .iter()
            .filter_map(|l| l.trim().strip_prefix("package:"))
            .map(str::to_string)
            .collect();
        if !paths.is_empty() {
            self.cache.set_apk_paths(package, paths.clone()).await;
        }
        Ok(paths)
    }

    pub async fn is_application_installed(&self, package: &str) -> AdbResult<bool> {
        Ok(!self.application_paths(package).await?.is_empty())
    }

    /// md5 of each installed apk of `package`.
    pub async fn apk_checksums(&self, package: &str) -> AdbResult<HashSet<String>> {
        if let Some(sums) = self.cache.apk_checksums(package).await {
            return Ok(sums);
        }
        let paths = self.application_paths(package).await?;
        let sums: HashSet<String> = RemoteFiles::new(&self.exec)
            .checksums(&paths)
            .await?
            .into_values()
            .collect();
        self.cache.set_apk_checksums(package, sums.clone()).await;
        Ok(sums)
    }

    /// Drop cached knowledge of a package whose install state changed.
    pub async fn invalidate_package(&self, package: &str) {
        self.cache.invalidate_package(package).await;
    }

    // Files

    pub async fn path_exists(&self, paths: &[&str], as_root: AsRoot) -> AdbResult<bool> {
        if paths.is_empty() {
            return Ok(false);
        }
        let test = paths
            .iter()
            .map(|p| format!("test -e {}", single_quote(p)))
            .collect::<Vec<_>>()
            .join(" && ");
        let cmd = ShellCommand::shell(test).as_root(as_root);
        Ok(self.exec.run(&cmd).await?.success())
    }

    /// Whether root commands need `su`, i.e. adbd is not running as root but
    /// `su` works.
    pub async fn needs_su(&self) -> AdbResult<bool> {
        if let Some(known) = self.cache.needs_su().await {
            return Ok(known);
        }
        let identity = self.exec.identity().await?;
        let needs_su = if identity.uid == 0 {
            false
        } else {
            let su = Elevation::choose(identity.api_level, identity.uid, AsRoot::Force);
            let probe = format!("{} && ! ls /root", su.prefix("ls /root"));
            self.exec.run(&ShellCommand::shell(probe)).await?.success()
        };
        self.cache.set_needs_su(needs_su).await;
        Ok(needs_su)
    }

    async fn file_size(&self, path: &str, as_root: AsRoot) -> AdbResult<u64> {
        let cmd = ShellCommand::new(["stat", "-c", "%s", path])
            .as_root(as_root)
            .check_return(true)
            .single_line(true);
        let result = self.exec.run(&cmd).await?;
        result.line().trim().parse().map_err(|_| AdbError::UnexpectedOutput {
            command: cmd.describe(),
            output: result.lines.clone(),
        })
    }

    /// Contents of a device file. Small files are read with `cat`, larger
    /// ones pulled, through a temp copy when root is needed to read them.
    pub async fn read_file(&self, path: &str, as_root: AsRoot, force_pull: bool) -> AdbResult<String> {
        if !force_pull {
            let size = self.file_size(path, as_root).await?;
            if size <= self.exec.config().max_output_length as u64 {
                let cmd = ShellCommand::new(["cat", path])
                    .as_root(as_root)
                    .check_return(true)
                    .raw_output(true);
                return Ok(self.exec.run(&cmd).await?.raw);
            }
        }
        if as_root == AsRoot::No || !self.needs_su().await? {
            return self.exec.pull_to_string(path).await;
        }
        let temp = DeviceTempFile::new(&self.exec.config().temp_dir, "temp_file", "");
        let copy = format!(
            "cp {src} {dst} && chmod 666 {dst}",
            src = single_quote(path),
            dst = temp.name_quoted()
        );
        let result = async {
            self.exec
                .run(&ShellCommand::shell(copy).as_root(as_root).check_return(true))
                .await?;
            self.exec.pull_to_string(&temp.name).await
        }
        .await;
        self.exec.remove_temp(&temp).await;
        result
    }

    /// Write `contents` to a device file. Short text goes through `echo`,
    /// the rest is pushed, through a temp copy when root is needed.
    pub async fn write_file(&self, path: &str, contents: &str, as_root: AsRoot, force_push: bool) -> AdbResult<()> {
        if !force_push && contents.len() < self.exec.config().max_command_length {
            let cmd = ShellCommand::shell(format!(
                "echo -n {} > {}",
                single_quote(contents),
                single_quote(path)
            ))
            .as_root(as_root)
            .check_return(true);
            self.exec.run(&cmd).await?;
            return Ok(());
        }
        if as_root == AsRoot::No || !self.needs_su().await? {
            return self.exec.write_with_push(path, contents.as_bytes()).await;
        }
        let temp = DeviceTempFile::new(&self.exec.config().temp_dir, "temp_file", "");
        let result = async {
            self.exec.write_with_push(&temp.name, contents.as_bytes()).await?;
            let argv = ["cp", temp.name.as_str(), path];
            self.exec
                .run(&ShellCommand::new(argv).as_root(as_root).check_return(true))
                .await
                .map(|_| ())
        }
        .await;
        self.exec.remove_temp(&temp).await;
        result
    }

    /// Push host files and directories, skipping content the device already
    /// has.
    pub async fn push_changed_files(&self, pairs: &[(PathBuf, String)], delete_stale: bool) -> AdbResult<SyncReport> {
        let config = self.exec.config();
        let files = RemoteFiles::new(&self.exec);
        let engine = FileSyncEngine::new(&files)
            .with_cache(&self.cache, config.enable_device_files_cache)
            .with_archive_push(config.archive_push);
        engine.push_changed(pairs, delete_stale).await
    }

    // Boot

    async fn poll_step<F, Fut>(&self, description: &str, timeout: Duration, mut check: F) -> AdbResult<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AdbResult<bool>>,
    {
        poll::wait_for(description, BOOT_POLL_PERIOD, timeout, || {
            let attempt = check();
            async move {
                match attempt.await {
                    Err(e) if not_ready(&e) => {
                        log::debug!("{}: {}", description, e);
                        Ok(false)
                    }
                    other => other,
                }
            }
        })
        .await
    }

    async fn sd_card_ready(&self) -> AdbResult<bool> {
        let storage = self.external_storage_path().await?;
        self.path_exists(&[storage.as_str()], AsRoot::No).await
    }

    async fn pm_ready(&self) -> AdbResult<bool> {
        let lines = self.exec.lines(&ShellCommand::new(["pm", "path", "android"])).await?;
        Ok(lines.iter().any(|l| l.trim().starts_with("package:")))
    }

    async fn boot_completed(&self) -> AdbResult<bool> {
        Ok(self.get_prop("sys.boot_completed", false).await? == "1")
    }

    async fn wifi_enabled(&self) -> AdbResult<bool> {
        let lines = self.exec.lines(&ShellCommand::new(["dumpsys", "wifi"])).await?;
        Ok(lines.iter().any(|l| l.contains("Wi-Fi is enabled")))
    }

    /// Wait for storage, the package manager and the boot flag in turn, and
    /// optionally for wifi. Each step gets the full `timeout`.
    pub async fn wait_until_fully_booted(&self, wifi: bool, timeout: Duration) -> AdbResult<()> {
        log::info!("{}: waiting for boot to complete", self.serial());
        self.poll_step("external storage", timeout, || self.sd_card_ready()).await?;
        self.poll_step("package manager", timeout, || self.pm_ready()).await?;
        self.poll_step("sys.boot_completed", timeout, || self.boot_completed()).await?;
        if wifi {
            self.poll_step("wifi", timeout, || self.wifi_enabled()).await?;
        }
        log::info!("{}: fully booted", self.serial());
        Ok(())
    }
}
