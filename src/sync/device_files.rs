// Device side of a sync, behind a trait so the planner can be exercised
// against a local directory.
use super::host::is_within;
use crate::adb::{AdbError, AdbResult, Transport};
use crate::shell::{CommandExecutor, DeviceTempFile, ShellCommand, single_quote};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

const DIR_MARKER: &str = "##DIR ";
const IS_DIR_MARKER: &str = "##IS_DIR ";
const IS_FILE_MARKER: &str = "##IS_FILE ";
const LS_FAILED_MARKER: &str = "##LS_FAILED ";

static MD5_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-fA-F]{32})\s+(.+)$").expect("valid md5sum regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
}

/// Result of one listing round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceListing {
    /// Direct children of each listed path that is a directory.
    pub children: HashMap<String, Vec<DeviceEntry>>,
    /// Type of each `stat` path that exists.
    pub kinds: HashMap<String, PathKind>,
}

/// File operations the sync engine needs from a device.
#[allow(async_fn_in_trait)]
pub trait DeviceFiles {
    /// Children of each of `dirs` that is a directory on the device, and the
    /// type of each of `stat` without listing it.
    async fn list(&self, dirs: &[String], stat: &[String]) -> AdbResult<DeviceListing>;

    /// md5 of each existing file among `paths`.
    async fn checksums(&self, paths: &[String]) -> AdbResult<HashMap<String, String>>;

    async fn make_dirs(&self, dirs: &[String]) -> AdbResult<()>;

    /// Recursive removal.
    async fn remove(&self, paths: &[String]) -> AdbResult<()>;

    /// Push a file, or a directory with everything below it.
    async fn push(&self, host: &Path, device: &str) -> AdbResult<()>;

    /// Whether `push_archive` can be used at all.
    async fn archive_supported(&self) -> AdbResult<bool> {
        Ok(false)
    }

    /// Push a zip whose entry names are device paths relative to `/` and
    /// extract it in place.
    async fn push_archive(&self, _archive: &Path) -> AdbResult<()> {
        Ok(())
    }
}

/// Parse the output of the listing script built by `RemoteFiles::list`.
/// A directory `ls` could not read fails the whole listing.
pub fn parse_listing(lines: &[String]) -> AdbResult<DeviceListing> {
    let mut listing = DeviceListing::default();
    let mut current: Option<String> = None;
    for line in lines {
        let line = line.trim_end_matches('\r');
        if let Some(dir) = line.strip_prefix(DIR_MARKER) {
            listing.children.entry(dir.to_string()).or_default();
            current = Some(dir.to_string());
            continue;
        }
        if let Some(path) = line.strip_prefix(IS_DIR_MARKER) {
            listing.kinds.insert(path.to_string(), PathKind::Dir);
            continue;
        }
        if let Some(path) = line.strip_prefix(IS_FILE_MARKER) {
            listing.kinds.insert(path.to_string(), PathKind::File);
            continue;
        }
        let Some(dir) = &current else { continue };
        let unreadable = || AdbError::UnexpectedOutput {
            command: format!("ls -a1p {dir}"),
            output: vec![line.to_string()],
        };
        if line.starts_with(LS_FAILED_MARKER) {
            return Err(unreadable());
        }
        if line.is_empty() || line == "./" || line == "../" {
            continue;
        }
        let (name, is_dir) = match line.strip_suffix('/') {
            Some(dir_name) => (dir_name, true),
            None => (line, false),
        };
        // No file name contains a slash; this is an error message.
        if name.contains('/') {
            return Err(unreadable());
        }
        if let Some(entries) = listing.children.get_mut(dir) {
            entries.push(DeviceEntry {
                name: name.to_string(),
                is_dir,
            });
        }
    }
    Ok(listing)
}

/// Parse `md5sum` output, ignoring error lines for missing files.
pub fn parse_md5sum(lines: &[String]) -> HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| MD5_LINE_RE.captures(line.trim_end()))
        .map(|caps| (caps[2].to_string(), caps[1].to_lowercase()))
        .collect()
}

/// `DeviceFiles` over a live device.
pub struct RemoteFiles<'a, T: Transport> {
    exec: &'a CommandExecutor<T>,
}

impl<'a, T: Transport> RemoteFiles<'a, T> {
    pub fn new(exec: &'a CommandExecutor<T>) -> Self {
        Self { exec }
    }
}

impl<T: Transport> DeviceFiles for RemoteFiles<'_, T> {
    async fn list(&self, dirs: &[String], stat: &[String]) -> AdbResult<DeviceListing> {
        if dirs.is_empty() && stat.is_empty() {
            return Ok(DeviceListing::default());
        }
        let stats = stat.iter().map(|p| {
            format!(
                "if [ -d {q} ]; then echo {is_dir}{q}; elif [ -e {q} ]; then echo {is_file}{q}; fi",
                q = single_quote(p),
                is_dir = single_quote(IS_DIR_MARKER),
                is_file = single_quote(IS_FILE_MARKER)
            )
        });
        let listings = dirs.iter().map(|d| {
            format!(
                "if [ -d {q} ]; then echo {marker}{q}; ls -a1p {q} 2>/dev/null || echo {failed}{q}; fi",
                q = single_quote(d),
                marker = single_quote(DIR_MARKER),
                failed = single_quote(LS_FAILED_MARKER)
            )
        });
        let script = stats.chain(listings).collect::<Vec<_>>().join(";");
        let cmd = ShellCommand::shell(script).large_output(true);
        let lines = self.exec.lines(&cmd).await?;
        parse_listing(&lines)
    }

    async fn checksums(&self, paths: &[String]) -> AdbResult<HashMap<String, String>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let mut argv = vec!["md5sum".to_string()];
        argv.extend(paths.iter().cloned());
        // Missing files make md5sum exit 1; the rest of the output is still good.
        let cmd = ShellCommand::new(argv).large_output(true);
        let lines = self.exec.lines(&cmd).await?;
        Ok(parse_md5sum(&lines))
    }

    async fn make_dirs(&self, dirs: &[String]) -> AdbResult<()> {
        if dirs.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["mkdir".to_string(), "-p".to_string()];
        argv.extend(dirs.iter().cloned());
        self.exec
            .run(&ShellCommand::new(argv).check_return(true))
            .await
            .map(|_| ())
    }

    async fn remove(&self, paths: &[String]) -> AdbResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut argv = vec!["rm".to_string(), "-rf".to_string()];
        argv.extend(paths.iter().cloned());
        self.exec
            .run(&ShellCommand::new(argv).check_return(true))
            .await
            .map(|_| ())
    }

    async fn push(&self, host: &Path, device: &str) -> AdbResult<()> {
        log::debug!("push {} -> {}", host.display(), device);
        self.exec.push(host, device).await
    }

    async fn archive_supported(&self) -> AdbResult<bool> {
        let probe = ShellCommand::shell("command -v unzip >/dev/null");
        Ok(self.exec.run(&probe).await?.success())
    }

    async fn push_archive(&self, archive: &Path) -> AdbResult<()> {
        let temp = DeviceTempFile::new(&self.exec.config().temp_dir, "temp_file", ".zip");
        let result = async {
            self.exec.push(archive, &temp.name).await?;
            let argv = ["unzip", "-o", "-q", temp.name.as_str(), "-d", "/"];
            self.exec
                .run(&ShellCommand::new(argv).check_return(true))
                .await
                .map(|_| ())
        }
        .await;
        self.exec.remove_temp(&temp).await;
        result
    }
}

/// Directories that still need `mkdir -p`, without ones implied by a deeper
/// entry.
pub fn minimal_dirs(mut dirs: Vec<String>) -> Vec<String> {
    dirs.sort();
    dirs.dedup();
    dirs.iter()
        .filter(|d| !dirs.iter().any(|other| other != *d && is_within(other, d)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::fake::{FakeTransport, Reply};
    use crate::config::DeviceConfig;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing(&lines(
            "##IS_DIR /sdcard\n##IS_FILE /sdcard/f\n##DIR /sdcard/d\n./\n../\nf1\nsub/\n##DIR /sdcard/d/sub\n./\n../\n",
        ))
        .unwrap();
        assert_eq!(listing.children.len(), 2);
        assert_eq!(listing.kinds["/sdcard"], PathKind::Dir);
        assert_eq!(listing.kinds["/sdcard/f"], PathKind::File);
        assert_eq!(
            listing.children["/sdcard/d"],
            vec![
                DeviceEntry { name: "f1".into(), is_dir: false },
                DeviceEntry { name: "sub".into(), is_dir: true },
            ]
        );
        assert!(listing.children["/sdcard/d/sub"].is_empty());
    }

    #[test]
    fn test_unreadable_directory_fails_listing() {
        let stray_error = parse_listing(&lines("##DIR /data/x\nls: /data/x: Permission denied\n"));
        assert!(matches!(stray_error, Err(AdbError::UnexpectedOutput { .. })));

        let failed = parse_listing(&lines("##DIR /data/x\n##LS_FAILED /data/x\n"));
        assert!(matches!(failed, Err(AdbError::UnexpectedOutput { .. })));
    }

    #[test]
    fn test_parse_md5sum() {
        let sums = parse_md5sum(&lines(
            "b1946ac92492d2347c6235b4d2611184  /sdcard/a b\nmd5sum: /sdcard/x: No such file or directory\n",
        ));
        assert_eq!(sums.len(), 1);
        assert_eq!(sums["/sdcard/a b"], "b1946ac92492d2347c6235b4d2611184");
    }

    #[test]
    fn test_minimal_dirs() {
        let dirs = minimal_dirs(vec![
            "/sdcard/a".into(),
            "/sdcard/a/b".into(),
            "/sdcard/ab".into(),
            "/sdcard/a/b".into(),
        ]);
        assert_eq!(dirs, vec!["/sdcard/a/b", "/sdcard/ab"]);
    }

    #[tokio::test]
    async fn test_remote_listing_script() {
        let exec = CommandExecutor::new(
            FakeTransport::new(|cmd| {
                assert!(cmd.starts_with("if [ -d /sdcard ]; then echo '##IS_DIR '/sdcard; elif [ -e /sdcard ]"));
                assert!(cmd.contains("if [ -d '/sdcard/my dir' ]; then echo '##DIR ''/sdcard/my dir'"));
                assert!(cmd.contains("ls -a1p '/sdcard/my dir' 2>/dev/null || echo '##LS_FAILED '"));
                Reply::ok("##IS_DIR /sdcard\n##DIR /sdcard/my dir\n./\n../\nx\n")
            }),
            DeviceConfig::default(),
        );
        let listing = RemoteFiles::new(&exec)
            .list(&["/sdcard/my dir".to_string()], &["/sdcard".to_string()])
            .await
            .unwrap();
        assert_eq!(listing.children["/sdcard/my dir"][0].name, "x");
        assert_eq!(listing.kinds["/sdcard"], PathKind::Dir);
    }

    #[tokio::test]
    async fn test_remote_listing_reports_unreadable_dir() {
        let exec = CommandExecutor::new(
            FakeTransport::new(|_| Reply::ok("##DIR /data/x\n##LS_FAILED /data/x\n")),
            DeviceConfig::default(),
        );
        let result = RemoteFiles::new(&exec).list(&["/data/x".to_string()], &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remote_push_honors_timeout() {
        let mut config = DeviceConfig::default();
        config.default_timeout = std::time::Duration::from_millis(100);
        config.default_retries = 0;
        let exec = CommandExecutor::new(FakeTransport::new(|_| Reply::ok("")), config);
        exec.transport()
            .stall_transfers
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let local = tempfile::NamedTempFile::new().unwrap();

        let err = RemoteFiles::new(&exec)
            .push(local.path(), "/sdcard/f")
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[tokio::test]
    async fn test_remote_archive_push_cleans_up() {
        let exec = CommandExecutor::new(FakeTransport::new(|_| Reply::ok("")), DeviceConfig::default());
        let archive = tempfile::NamedTempFile::new().unwrap();
        RemoteFiles::new(&exec).push_archive(archive.path()).await.unwrap();

        let commands = exec.transport().commands();
        assert!(commands[0].starts_with("unzip -o -q /data/local/tmp/temp_file-"));
        assert!(commands[0].ends_with(".zip -d /"));
        assert!(exec.transport().files.lock().unwrap().is_empty());
    }
}
