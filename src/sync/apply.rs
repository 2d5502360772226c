use super::device_files::DeviceFiles;
use super::plan::{PushItem, SyncPlan};
use crate::adb::{AdbError, AdbResult};
use std::fs::File;
use std::io::{Seek, Write};
use walkdir::WalkDir;

// Rough costs of getting bytes onto a device.
const ADB_CALL_PENALTY: f64 = 0.1; // seconds per adb call
const ADB_PUSH_PENALTY: f64 = 0.01; // seconds per pushed file
const ZIP_PENALTY: f64 = 2.0; // seconds
const ZIP_RATE: f64 = 10_000_000.0; // bytes / second
const TRANSFER_RATE: f64 = 2_000_000.0; // bytes / second
const COMPRESSION_RATIO: f64 = 2.0;

/// Estimated seconds to push `byte_count` bytes in `file_count` files using
/// `adb_calls` transport calls, optionally zipped first.
pub fn approximate_duration(adb_calls: usize, file_count: usize, byte_count: u64, zipping: bool) -> f64 {
    let bytes = byte_count as f64;
    let adb_call_time = ADB_CALL_PENALTY * adb_calls as f64;
    let push_setup_time = ADB_PUSH_PENALTY * file_count as f64;
    let (zip_time, transfer_time) = if zipping {
        (ZIP_PENALTY + bytes / ZIP_RATE, bytes / (TRANSFER_RATE * COMPRESSION_RATIO))
    } else {
        (0.0, bytes / TRANSFER_RATE)
    };
    adb_call_time + push_setup_time + zip_time + transfer_time
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStrategy {
    Individual,
    Archive,
}

pub fn choose_strategy(plan: &SyncPlan, archive_allowed: bool) -> PushStrategy {
    if !archive_allowed || plan.to_push.is_empty() {
        return PushStrategy::Individual;
    }
    let size = plan.push_size();
    let individual = approximate_duration(plan.to_push.len(), plan.push_file_count(), size, false);
    let zipped = approximate_duration(1, 1, size, true);
    if zipped < individual {
        PushStrategy::Archive
    } else {
        PushStrategy::Individual
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub deleted: usize,
    pub archived: bool,
}

fn entry_name(device: &str) -> String {
    device.trim_start_matches('/').to_string()
}

fn add_file<W: Write + Seek>(
    zip: &mut zip::ZipWriter<W>,
    host: &std::path::Path,
    device: &str,
) -> AdbResult<()> {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    zip.start_file(entry_name(device), options)?;
    let mut source = File::open(host).map_err(|e| AdbError::io(host, e))?;
    std::io::copy(&mut source, zip).map_err(|e| AdbError::io(host, e))?;
    Ok(())
}

/// Zip every push item under its device path. Runs on a blocking worker.
pub fn build_archive(items: &[PushItem]) -> AdbResult<tempfile::NamedTempFile> {
    let archive = tempfile::Builder::new()
        .suffix(".zip")
        .tempfile()
        .map_err(|e| AdbError::io(std::env::temp_dir(), e))?;
    let handle = archive.reopen().map_err(|e| AdbError::io(archive.path(), e))?;
    let mut zip = zip::ZipWriter::new(handle);
    let dir_options = zip::write::SimpleFileOptions::default();

    for item in items {
        if !item.collapsible {
            add_file(&mut zip, &item.host, &item.device)?;
            continue;
        }
        for entry in WalkDir::new(&item.host).sort_by_file_name() {
            let entry = entry.map_err(|e| AdbError::io(&item.host, e.into()))?;
            let relative = entry.path().strip_prefix(&item.host).unwrap_or(entry.path());
            let device = super::host::device_join(&item.device, relative);
            if entry.file_type().is_dir() {
                zip.add_directory(entry_name(&device), dir_options)?;
            } else {
                add_file(&mut zip, entry.path(), &device)?;
            }
        }
    }
    zip.finish()?;
    Ok(archive)
}

async fn push_individually<F: DeviceFiles>(files: &F, items: &[PushItem]) -> AdbResult<()> {
    for item in items {
        files.push(&item.host, &item.device).await?;
    }
    Ok(())
}

/// Archive path: build the zip while asking the device whether it can unzip.
/// `Ok(false)` means the caller should fall back to individual pushes.
async fn push_archived<F: DeviceFiles>(files: &F, items: &[PushItem]) -> AdbResult<bool> {
    let owned = items.to_vec();
    let (archive, supported) = tokio::join!(
        tokio::task::spawn_blocking(move || build_archive(&owned)),
        files.archive_supported()
    );
    match supported {
        Ok(true) => {}
        Ok(false) => {
            log::info!("unzip not available on device");
            return Ok(false);
        }
        Err(e) => {
            log::warn!("unzip probe failed: {}", e);
            return Ok(false);
        }
    }
    let archive = match archive? {
        Ok(archive) => archive,
        Err(e) => {
            log::warn!("Could not build push archive: {}", e);
            return Ok(false);
        }
    };
    match files.push_archive(archive.path()).await {
        Ok(()) => Ok(true),
        Err(e) => {
            log::warn!("Archive push failed, pushing files one by one: {}", e);
            Ok(false)
        }
    }
}

/// Carry out `plan`. Stale paths are only removed when the plan was made
/// with `delete_stale`.
pub async fn apply<F: DeviceFiles>(
    files: &F,
    plan: &SyncPlan,
    archive_allowed: bool,
) -> AdbResult<SyncReport> {
    let mut report = SyncReport::default();

    let mut removals = plan.to_replace.clone();
    if plan.delete_stale {
        removals.extend(plan.to_delete.iter().cloned());
        report.deleted = plan.to_delete.len();
    }
    if !removals.is_empty() {
        files.remove(&removals).await?;
    }
    if plan.to_push.is_empty() {
        return Ok(report);
    }
    files.make_dirs(&plan.make_dirs).await?;

    report.archived = match choose_strategy(plan, archive_allowed) {
        PushStrategy::Archive => push_archived(files, &plan.to_push).await?,
        PushStrategy::Individual => false,
    };
    if !report.archived {
        push_individually(files, &plan.to_push).await?;
    }
    report.pushed = plan.push_file_count();
    Ok(report)
}
