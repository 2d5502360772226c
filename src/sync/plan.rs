use super::device_files::{DeviceEntry, DeviceFiles, DeviceListing, PathKind, minimal_dirs};
use super::host::{self, HostTree, device_parent, is_within};
use crate::adb::{AdbError, AdbResult};
use crate::cache::DeviceStateCache;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One unit handed to the device: a file, or a whole directory when
/// `collapsible`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushItem {
    pub host: PathBuf,
    pub device: String,
    pub collapsible: bool,
    pub file_count: usize,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub to_push: Vec<PushItem>,
    /// Stale device paths, removed only when asked to.
    pub to_delete: Vec<String>,
    /// Device paths whose type differs from the host; always removed first.
    pub to_replace: Vec<String>,
    pub make_dirs: Vec<String>,
    /// Host content hashes keyed by device path, recorded after a successful
    /// apply.
    pub host_checksums: HashMap<String, String>,
    /// Listing or hashing failed and the plan falls back to pushing
    /// everything without deleting anything.
    pub degraded: bool,
    /// Whether `to_delete` is carried out by `apply`.
    pub delete_stale: bool,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_push.is_empty()
            && self.to_delete.is_empty()
            && self.to_replace.is_empty()
            && self.make_dirs.is_empty()
    }

    pub fn push_size(&self) -> u64 {
        self.to_push.iter().map(|p| p.size).sum()
    }

    pub fn push_file_count(&self) -> usize {
        self.to_push.iter().map(|p| p.file_count).sum()
    }
}

/// What the listing told us about the device.
struct DeviceView {
    listing: DeviceListing,
    entries: HashMap<String, PathKind>,
}

impl DeviceView {
    fn new(listing: DeviceListing) -> Self {
        let mut entries = HashMap::new();
        for (dir, children) in &listing.children {
            for child in children {
                let kind = if child.is_dir { PathKind::Dir } else { PathKind::File };
                entries.insert(host::device_join(dir, Path::new(&child.name)), kind);
            }
        }
        Self { listing, entries }
    }

    fn kind(&self, path: &str) -> Option<PathKind> {
        if self.listing.children.contains_key(path) {
            return Some(PathKind::Dir);
        }
        self.entries
            .get(path)
            .or_else(|| self.listing.kinds.get(path))
            .copied()
    }

    fn children(&self, dir: &str) -> Option<&Vec<DeviceEntry>> {
        self.listing.children.get(dir)
    }
}

fn file_item(file: &host::HostFile) -> PushItem {
    PushItem {
        host: file.host.clone(),
        device: file.device.clone(),
        collapsible: false,
        file_count: 1,
        size: file.size,
    }
}

fn dir_item(tree: &HostTree, dir: &host::HostDir) -> PushItem {
    let inside: Vec<&host::HostFile> = tree
        .files
        .iter()
        .filter(|f| is_within(&f.device, &dir.device))
        .collect();
    PushItem {
        host: dir.host.clone(),
        device: dir.device.clone(),
        collapsible: true,
        file_count: inside.len(),
        size: inside.iter().map(|f| f.size).sum(),
    }
}

/// Everything, no deletions. Used when the device side could not be read.
fn push_everything(trees: &[HostTree], delete_stale: bool) -> SyncPlan {
    let mut plan = SyncPlan {
        degraded: true,
        delete_stale,
        ..SyncPlan::default()
    };
    let mut dirs = Vec::new();
    for tree in trees {
        if !tree.root_is_dir {
            dirs.push(device_parent(&tree.device_root));
            plan.to_push.extend(tree.files.iter().map(file_item));
            continue;
        }
        match tree.dirs.first() {
            Some(root) if root.collapsible => {
                dirs.push(device_parent(&root.device));
                plan.to_push.push(dir_item(tree, root));
            }
            _ => {
                dirs.extend(tree.dirs.iter().map(|d| d.device.clone()));
                plan.to_push.extend(tree.files.iter().map(file_item));
            }
        }
    }
    plan.make_dirs = minimal_dirs(dirs);
    plan
}

/// Compute what has to change on the device so that each device path mirrors
/// its host path.
pub async fn plan<F: DeviceFiles>(
    files: &F,
    cache: Option<&DeviceStateCache>,
    pairs: &[(PathBuf, String)],
    delete_stale: bool,
) -> AdbResult<SyncPlan> {
    let owned_pairs = pairs.to_vec();
    let trees: Vec<HostTree> = tokio::task::spawn_blocking(move || {
        owned_pairs
            .iter()
            .map(|(h, d)| host::walk(h, d))
            .collect::<AdbResult<Vec<_>>>()
    })
    .await??;

    // List only the directories we touch; roots and their parents are just
    // tested for existence and type.
    let mut to_list: Vec<String> = Vec::new();
    let mut to_stat: Vec<String> = Vec::new();
    for tree in &trees {
        to_stat.push(tree.device_root.clone());
        to_stat.push(device_parent(&tree.device_root));
        if tree.root_is_dir {
            to_list.extend(tree.dirs.iter().map(|d| d.device.clone()));
        }
    }
    to_list.sort();
    to_list.dedup();
    to_stat.sort();
    to_stat.dedup();

    let view = match files.list(&to_list, &to_stat).await {
        Ok(listing) => DeviceView::new(listing),
        Err(e) => {
            let degraded = AdbError::SyncPartialFailure {
                description: format!("device listing failed: {e}"),
            };
            log::warn!("{}, pushing everything", degraded);
            return Ok(push_everything(&trees, delete_stale));
        }
    };

    let mut plan = SyncPlan {
        delete_stale,
        ..SyncPlan::default()
    };
    let mut missing_dirs: Vec<String> = Vec::new();
    let mut candidates: Vec<&host::HostFile> = Vec::new();
    let mut expected: HashSet<&str> = HashSet::new();

    for tree in &trees {
        expected.extend(tree.files.iter().map(|f| f.device.as_str()));
        expected.extend(tree.dirs.iter().map(|d| d.device.as_str()));

        let mut absent: Vec<&str> = Vec::new();
        let mut collapsed: Vec<&str> = Vec::new();
        for dir in &tree.dirs {
            if collapsed.iter().any(|c| is_within(&dir.device, c)) {
                continue;
            }
            match view.kind(&dir.device) {
                Some(PathKind::Dir) => continue,
                Some(PathKind::File) => plan.to_replace.push(dir.device.clone()),
                None => {}
            }
            absent.push(&dir.device);
            if dir.collapsible {
                collapsed.push(&dir.device);
                plan.to_push.push(dir_item(tree, dir));
                let parent = device_parent(&dir.device);
                if view.kind(&parent) != Some(PathKind::Dir) {
                    missing_dirs.push(parent);
                }
            } else {
                missing_dirs.push(dir.device.clone());
            }
        }

        for file in &tree.files {
            if collapsed.iter().any(|c| is_within(&file.device, c)) {
                continue;
            }
            match view.kind(&file.device) {
                Some(PathKind::File) => candidates.push(file),
                kind => {
                    if kind == Some(PathKind::Dir) {
                        plan.to_replace.push(file.device.clone());
                    }
                    let parent = device_parent(&file.device);
                    if !tree.root_is_dir && view.kind(&parent) != Some(PathKind::Dir) {
                        missing_dirs.push(parent);
                    }
                    plan.to_push.push(file_item(file));
                }
            }
        }

        // Stale entries live only in directories that belong to a pushed tree.
        if delete_stale && tree.root_is_dir {
            for dir in &tree.dirs {
                if absent.iter().any(|a| is_within(&dir.device, a)) {
                    continue;
                }
                let Some(children) = view.children(&dir.device) else {
                    continue;
                };
                for child in children.iter().filter(|c| !c.name.starts_with('.')) {
                    let path = host::device_join(&dir.device, Path::new(&child.name));
                    if !expected.contains(path.as_str()) {
                        plan.to_delete.push(path);
                    }
                }
            }
        }
    }

    // Never remove an ancestor of something that should be there.
    plan.to_delete
        .retain(|d| !expected.iter().any(|e| *e != d.as_str() && is_within(e, d)));
    plan.to_delete.sort();
    plan.to_delete.dedup();
    plan.make_dirs = minimal_dirs(missing_dirs);

    let all_files: Vec<host::HostFile> = trees.iter().flat_map(|t| t.files.clone()).collect();
    let candidate_paths: Vec<String> = candidates.iter().map(|f| f.device.clone()).collect();
    let (host_sums, device_sums) = tokio::join!(
        host::host_checksums(all_files),
        device_checksums(files, cache, &candidate_paths)
    );
    let (host_sums, device_sums) = match (host_sums, device_sums) {
        (Ok(h), Ok(d)) => (h, d),
        (Err(e), _) | (_, Err(e)) => {
            let degraded = AdbError::SyncPartialFailure {
                description: format!("error calculating md5: {e}"),
            };
            log::warn!("{}, pushing without comparing", degraded);
            plan.to_push.extend(candidates.into_iter().map(file_item));
            plan.to_delete.clear();
            plan.degraded = true;
            return Ok(plan);
        }
    };

    for file in candidates {
        let host_sum = host_sums.get(&file.device);
        if host_sum.is_none() || host_sum != device_sums.get(&file.device) {
            plan.to_push.push(file_item(file));
        }
    }
    plan.host_checksums = host_sums;
    log::debug!(
        "Sync plan: {} to push, {} stale, {} to replace",
        plan.to_push.len(),
        plan.to_delete.len(),
        plan.to_replace.len()
    );
    Ok(plan)
}

/// Device hashes, taking what the cache already knows when it is enabled.
async fn device_checksums<F: DeviceFiles>(
    files: &F,
    cache: Option<&DeviceStateCache>,
    paths: &[String],
) -> AdbResult<HashMap<String, String>> {
    let known = match cache {
        Some(cache) => cache.device_checksums(paths).await,
        None => HashMap::new(),
    };
    let unknown: Vec<String> = paths
        .iter()
        .filter(|p| !known.contains_key(*p))
        .cloned()
        .collect();
    let mut sums = files.checksums(&unknown).await?;
    if sums.len() < unknown.len() {
        log::debug!(
            "{} of {} device files had no checksum",
            unknown.len() - sums.len(),
            unknown.len()
        );
    }
    sums.extend(known);
    Ok(sums)
}
