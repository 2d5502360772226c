// Content-addressed host -> device file sync.
//
// `plan` diffs host trees against the device, `apply` ships the difference,
// and the engine records host checksums in the device cache once a sync went
// through.

pub mod apply;
pub mod device_files;
pub mod host;
pub mod plan;


pub use apply::{PushStrategy, SyncReport, approximate_duration};
pub use device_files::{DeviceEntry, DeviceFiles, DeviceListing, PathKind, RemoteFiles};
pub use plan::{PushItem, SyncPlan};

use crate::adb::AdbResult;
use crate::cache::DeviceStateCache;
use std::path::PathBuf;

pub struct FileSyncEngine<'a, F: DeviceFiles> {
    files: &'a F,
    cache: Option<&'a DeviceStateCache>,
    use_cached_checksums: bool,
    archive_push: bool,
}

impl<'a, F: DeviceFiles> FileSyncEngine<'a, F> {
    pub fn new(files: &'a F) -> Self {
        Self {
            files,
            cache: None,
            use_cached_checksums: false,
            archive_push: false,
        }
    }

    /// Record pushed checksums in `cache`; with `use_cached_checksums` the
    /// planner also trusts them instead of re-hashing on the device.
    pub fn with_cache(mut self, cache: &'a DeviceStateCache, use_cached_checksums: bool) -> Self {
        self.cache = Some(cache);
        self.use_cached_checksums = use_cached_checksums;
        self
    }

    pub fn with_archive_push(mut self, archive_push: bool) -> Self {
        self.archive_push = archive_push;
        self
    }

    pub async fn plan(&self, pairs: &[(PathBuf, String)], delete_stale: bool) -> AdbResult<SyncPlan> {
        let cache = self.cache.filter(|_| self.use_cached_checksums);
        plan::plan(self.files, cache, pairs, delete_stale).await
    }

    /// Apply `plan`, then commit its host checksums to the cache.
    pub async fn apply(&self, plan: &SyncPlan) -> AdbResult<SyncReport> {
        if let Some(cache) = self.cache {
            // Touched paths stay untrusted until the apply succeeds.
            let mut touched: Vec<String> = plan.to_push.iter().map(|p| p.device.clone()).collect();
            touched.extend(plan.to_replace.iter().cloned());
            if plan.delete_stale {
                touched.extend(plan.to_delete.iter().cloned());
            }
            cache.forget_device_paths(&touched).await;
        }

        let report = apply::apply(self.files, plan, self.archive_push).await?;

        if let Some(cache) = self.cache {
            cache
                .record_device_checksums(plan.host_checksums.iter().map(|(k, v)| (k.clone(), v.clone())))
                .await;
        }
        log::info!(
            "Synced {} file(s), removed {} stale path(s){}",
            report.pushed,
            report.deleted,
            if report.archived { " via archive" } else { "" }
        );
        Ok(report)
    }

    /// Plan and apply in one go.
    pub async fn push_changed(&self, pairs: &[(PathBuf, String)], delete_stale: bool) -> AdbResult<SyncReport> {
        let plan = self.plan(pairs, delete_stale).await?;
        self.apply(&plan).await
    }
}
