// Host side of a sync: tree walk and content hashes.
use crate::adb::{AdbError, AdbResult};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFile {
    pub host: PathBuf,
    pub device: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDir {
    pub host: PathBuf,
    pub device: String,
    /// Safe to push as one unit: nothing below it is a symlink or a skipped
    /// hidden entry.
    pub collapsible: bool,
}

/// One (host, device) pair flattened into leaves.
#[derive(Debug, Clone, Default)]
pub struct HostTree {
    pub root_is_dir: bool,
    pub device_root: String,
    pub files: Vec<HostFile>,
    /// Parents come before their children.
    pub dirs: Vec<HostDir>,
}

impl HostTree {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

pub fn device_join(root: &str, relative: &Path) -> String {
    let mut device = root.trim_end_matches('/').to_string();
    for component in relative.components() {
        device.push('/');
        device.push_str(&component.as_os_str().to_string_lossy());
    }
    if device.is_empty() { "/".to_string() } else { device }
}

/// Parent directory of a device path.
pub fn device_parent(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

/// `true` when `path` is `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let ancestor = ancestor.trim_end_matches('/');
    path == ancestor
        || ancestor.is_empty()
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Walk `host_root`, following symlinks to their targets and skipping hidden
/// entries.
pub fn walk(host_root: &Path, device_root: &str) -> AdbResult<HostTree> {
    let device_root = if device_root == "/" {
        device_root.to_string()
    } else {
        device_root.trim_end_matches('/').to_string()
    };
    let metadata = std::fs::metadata(host_root).map_err(|e| AdbError::io(host_root, e))?;
    if !metadata.is_dir() {
        return Ok(HostTree {
            root_is_dir: false,
            device_root: device_root.clone(),
            files: vec![HostFile {
                host: host_root.to_path_buf(),
                device: device_root,
                size: metadata.len(),
            }],
            dirs: Vec::new(),
        });
    }

    let mut tree = HostTree {
        root_is_dir: true,
        device_root: device_root.clone(),
        ..HostTree::default()
    };
    let mut blockers: Vec<PathBuf> = Vec::new();
    let mut hidden: Vec<PathBuf> = Vec::new();
    let walker = WalkDir::new(host_root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() > 0 && is_hidden(e) {
                hidden.push(e.path().to_path_buf());
                return false;
            }
            true
        });
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(host_root).to_path_buf();
            AdbError::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(host_root)
            .unwrap_or(Path::new(""))
            .to_path_buf();
        let device = device_join(&device_root, &relative);
        if entry.path_is_symlink() {
            blockers.push(relative.clone());
        }
        if entry.file_type().is_dir() {
            tree.dirs.push(HostDir {
                host: entry.path().to_path_buf(),
                device,
                collapsible: true,
            });
        } else if entry.file_type().is_file() {
            let size = entry
                .metadata()
                .map_err(|e| AdbError::io(entry.path(), e.into()))?
                .len();
            tree.files.push(HostFile {
                host: entry.path().to_path_buf(),
                device,
                size,
            });
        }
    }
    blockers.extend(
        hidden
            .iter()
            .filter_map(|p| p.strip_prefix(host_root).ok().map(Path::to_path_buf)),
    );

    for dir in &mut tree.dirs {
        let relative = dir.host.strip_prefix(host_root).unwrap_or(Path::new(""));
        dir.collapsible = !blockers.iter().any(|b| b.starts_with(relative));
    }
    Ok(tree)
}

/// Hex md5 of one file, streamed.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash host files on a blocking worker. Keys are the device paths.
pub async fn host_checksums(files: Vec<HostFile>) -> AdbResult<HashMap<String, String>> {
    tokio::task::spawn_blocking(move || {
        files
            .into_iter()
            .map(|f| {
                md5_file(&f.host)
                    .map(|sum| (f.device, sum))
                    .map_err(|e| AdbError::io(&f.host, e))
            })
            .collect()
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_device_paths() {
        assert_eq!(device_join("/sdcard/d/", Path::new("a/b")), "/sdcard/d/a/b");
        assert_eq!(device_join("/sdcard/d", Path::new("")), "/sdcard/d");
        assert_eq!(device_parent("/sdcard/d/f"), "/sdcard/d");
        assert_eq!(device_parent("/f"), "/");
        assert!(is_within("/sdcard/d/f", "/sdcard/d"));
        assert!(is_within("/sdcard/d", "/sdcard/d/"));
        assert!(!is_within("/sdcard/dx", "/sdcard/d"));
    }

    #[test]
    fn test_walk_skips_hidden_and_flags_collapsible() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(root.join("clean/inner")).unwrap();
        fs::create_dir_all(root.join("dotted")).unwrap();
        fs::write(root.join("a"), "a").unwrap();
        fs::write(root.join("clean/inner/b"), "bb").unwrap();
        fs::write(root.join("dotted/.hidden"), "h").unwrap();
        fs::write(root.join("dotted/c"), "c").unwrap();

        let tree = walk(&root, "/sdcard/dst/").unwrap();
        assert!(tree.root_is_dir);
        let files: Vec<&str> = tree.files.iter().map(|f| f.device.as_str()).collect();
        assert_eq!(files, ["/sdcard/dst/a", "/sdcard/dst/clean/inner/b", "/sdcard/dst/dotted/c"]);
        assert_eq!(tree.total_size(), 4);

        let collapsible: HashMap<&str, bool> = tree
            .dirs
            .iter()
            .map(|d| (d.device.as_str(), d.collapsible))
            .collect();
        assert_eq!(collapsible["/sdcard/dst"], false);
        assert_eq!(collapsible["/sdcard/dst/clean"], true);
        assert_eq!(collapsible["/sdcard/dst/clean/inner"], true);
        assert_eq!(collapsible["/sdcard/dst/dotted"], false);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_followed_but_block_collapse() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target.txt");
        fs::write(&target, "real").unwrap();
        let root = tmp.path().join("src");
        fs::create_dir_all(root.join("plain")).unwrap();
        fs::create_dir_all(root.join("linked")).unwrap();
        fs::write(root.join("plain/f"), "f").unwrap();
        std::os::unix::fs::symlink(&target, root.join("linked/l")).unwrap();

        let tree = walk(&root, "/sdcard/dst").unwrap();
        let link = tree
            .files
            .iter()
            .find(|f| f.device == "/sdcard/dst/linked/l")
            .unwrap();
        assert_eq!(link.size, 4);
        let by_device: HashMap<&str, bool> = tree
            .dirs
            .iter()
            .map(|d| (d.device.as_str(), d.collapsible))
            .collect();
        assert!(by_device["/sdcard/dst/plain"]);
        assert!(!by_device["/sdcard/dst/linked"]);
        assert!(!by_device["/sdcard/dst"]);
    }

    #[test]
    fn test_single_file_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("one.txt");
        fs::write(&file, "hello").unwrap();
        let tree = walk(&file, "/sdcard/one.txt").unwrap();
        assert!(!tree.root_is_dir);
        assert_eq!(tree.files[0].device, "/sdcard/one.txt");
        assert!(tree.dirs.is_empty());
    }

    #[tokio::test]
    async fn test_md5_matches_known_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, "hello\n").unwrap();
        let sums = host_checksums(vec![HostFile {
            host: file,
            device: "/sdcard/f".to_string(),
            size: 6,
        }])
        .await
        .unwrap();
        assert_eq!(sums["/sdcard/f"], "b1946ac92492d2347c6235b4d2611184");
    }
}
