// Session-scoped device state, invalidated by an on-device token.
use crate::adb::{AdbError, AdbResult, Transport};
use crate::shell::{CommandExecutor, ShellCommand, single_quote};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use tokio::sync::Mutex;

pub const CACHE_TOKEN_PATH: &str = "/data/local/tmp/cache_token";

static PROP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(.*?)\]: \[(.*)\]$").expect("valid getprop regex"));

#[derive(Debug, Default)]
struct CacheState {
    token: Option<String>,
    prev_token: Option<String>,
    external_storage: Option<String>,
    props: HashMap<String, String>,
    package_apk_paths: HashMap<String, Vec<String>>,
    package_apk_paths_to_verify: HashSet<String>,
    package_apk_checksums: HashMap<String, HashSet<String>>,
    device_path_checksums: HashMap<String, String>,
    needs_su: Option<bool>,
}

/// Persisted form of the cache. Maps are ordered so dumps are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub package_apk_paths: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub package_apk_checksums: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub device_path_checksums: BTreeMap<String, String>,
}

/// Parse `getprop` output into a property map. Lines that are not
/// `[key]: [value]` (continuations of multi-line values) are skipped.
pub fn parse_getprop(lines: &[String]) -> HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| PROP_RE.captures(line.trim_end()))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Device properties, paths and checksums for one client session.
///
/// The cache is `Valid` while it holds the token it wrote to the device.
/// Everything is dropped by `clear`, or when the device reports a different
/// token than ours.
#[derive(Debug, Default)]
pub struct DeviceStateCache {
    state: Mutex<CacheState>,
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_valid(&self) -> bool {
        self.state.lock().await.token.is_some()
    }

    pub async fn token(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    /// Token that was on the device before our probe replaced it.
    pub async fn prev_token(&self) -> Option<String> {
        self.state.lock().await.prev_token.clone()
    }

    /// Probe the device if the cache is not valid yet. Returns our token.
    pub async fn ensure<T: Transport>(&self, exec: &CommandExecutor<T>) -> AdbResult<String> {
        let mut state = self.state.lock().await;
        Self::ensure_locked(&mut state, exec).await
    }

    async fn ensure_locked<T: Transport>(
        state: &mut CacheState,
        exec: &CommandExecutor<T>,
    ) -> AdbResult<String> {
        if let Some(token) = &state.token {
            return Ok(token.clone());
        }
        let token = uuid::Uuid::new_v4().simple().to_string();
        // One round trip: storage root, previous token, swap in ours, all props.
        let probe = format!(
            "c={};echo $EXTERNAL_STORAGE;cat $c 2>/dev/null||echo;echo \"{}\">$c &&getprop",
            CACHE_TOKEN_PATH, token
        );
        let cmd = ShellCommand::shell(probe)
            .check_return(true)
            .large_output(true);
        let lines = exec.lines(&cmd).await?;
        if lines.len() < 2 {
            return Err(AdbError::UnexpectedOutput {
                command: cmd.describe(),
                output: lines,
            });
        }

        let external_storage = lines[0].trim();
        let prev_token = lines[1].trim();
        state.external_storage = (!external_storage.is_empty()).then(|| external_storage.to_string());
        state.prev_token = (!prev_token.is_empty()).then(|| prev_token.to_string());
        state.props = parse_getprop(&lines[2..]);
        state.token = Some(token.clone());
        log::debug!(
            "{}: cache initialized with {} properties, token {}",
            exec.serial(),
            state.props.len(),
            token
        );
        Ok(token)
    }

    /// Drop everything. The next access probes the device again.
    pub async fn clear(&self) {
        *self.state.lock().await = CacheState::default();
    }

    /// Re-read the token file. A foreign token means the device was reset or
    /// is not the one we probed; the cache is cleared and `false` returned.
    pub async fn check_identity<T: Transport>(&self, exec: &CommandExecutor<T>) -> AdbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(ours) = state.token.clone() else {
            return Ok(true);
        };
        let cmd = ShellCommand::new(["cat", CACHE_TOKEN_PATH]).single_line(true);
        let found = exec.run(&cmd).await?.line().trim().to_string();
        if found == ours {
            return Ok(true);
        }
        log::warn!(
            "{}: device token changed ({} -> {:?}), clearing cache",
            exec.serial(),
            ours,
            found
        );
        *state = CacheState::default();
        drop(state);
        exec.reset_identity().await;
        Ok(false)
    }

    pub async fn get_prop<T: Transport>(
        &self,
        exec: &CommandExecutor<T>,
        key: &str,
    ) -> AdbResult<Option<String>> {
        let mut state = self.state.lock().await;
        Self::ensure_locked(&mut state, exec).await?;
        Ok(state.props.get(key).cloned())
    }

    /// Record a property we just changed on the device.
    pub async fn set_cached_prop(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        if state.token.is_some() {
            state.props.insert(key.to_string(), value.to_string());
        }
    }

    pub async fn external_storage<T: Transport>(
        &self,
        exec: &CommandExecutor<T>,
    ) -> AdbResult<Option<String>> {
        let mut state = self.state.lock().await;
        Self::ensure_locked(&mut state, exec).await?;
        Ok(state.external_storage.clone())
    }

    /// Cached apk paths of `package`. Entries restored by `load` are checked
    /// against the device once; if a path is gone the package is forgotten.
    pub async fn apk_paths<T: Transport>(
        &self,
        exec: &CommandExecutor<T>,
        package: &str,
    ) -> AdbResult<Option<Vec<String>>> {
        let mut state = self.state.lock().await;
        let Some(paths) = state.package_apk_paths.get(package).cloned() else {
            return Ok(None);
        };
        if !state.package_apk_paths_to_verify.remove(package) {
            return Ok(Some(paths));
        }
        if paths_exist(exec, &paths).await? {
            return Ok(Some(paths));
        }
        log::info!("{}: cached apk paths of {} are gone", exec.serial(), package);
        state.package_apk_paths.remove(package);
        state.package_apk_checksums.remove(package);
        Ok(None)
    }

    pub async fn set_apk_paths(&self, package: &str, paths: Vec<String>) {
        let mut state = self.state.lock().await;
        state.package_apk_paths_to_verify.remove(package);
        state.package_apk_paths.insert(package.to_string(), paths);
    }

    pub async fn apk_checksums(&self, package: &str) -> Option<HashSet<String>> {
        self.state.lock().await.package_apk_checksums.get(package).cloned()
    }

    pub async fn set_apk_checksums(&self, package: &str, checksums: HashSet<String>) {
        self.state
            .lock()
            .await
            .package_apk_checksums
            .insert(package.to_string(), checksums);
    }

    /// Forget everything known about one package, e.g. after (un)install.
    pub async fn invalidate_package(&self, package: &str) {
        let mut state = self.state.lock().await;
        state.package_apk_paths.remove(package);
        state.package_apk_paths_to_verify.remove(package);
        state.package_apk_checksums.remove(package);
    }

    /// Recorded checksums for those of `paths` we know.
    pub async fn device_checksums(&self, paths: &[String]) -> HashMap<String, String> {
        let state = self.state.lock().await;
        paths
            .iter()
            .filter_map(|p| state.device_path_checksums.get(p).map(|c| (p.clone(), c.clone())))
            .collect()
    }

    pub async fn record_device_checksums(&self, checksums: impl IntoIterator<Item = (String, String)>) {
        self.state.lock().await.device_path_checksums.extend(checksums);
    }

    /// Forget `paths` and anything below them.
    pub async fn forget_device_paths(&self, paths: &[String]) {
        let mut state = self.state.lock().await;
        state.device_path_checksums.retain(|known, _| {
            !paths.iter().any(|p| {
                known == p
                    || known
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
        });
    }

    pub async fn needs_su(&self) -> Option<bool> {
        self.state.lock().await.needs_su
    }

    pub async fn set_needs_su(&self, needs_su: bool) {
        self.state.lock().await.needs_su = Some(needs_su);
    }

    /// Serialize the persistable part of the cache.
    pub async fn dump<T: Transport>(&self, exec: &CommandExecutor<T>) -> AdbResult<String> {
        let mut state = self.state.lock().await;
        let token = Self::ensure_locked(&mut state, exec).await?;
        let snapshot = CacheSnapshot {
            token,
            package_apk_paths: state
                .package_apk_paths
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            package_apk_checksums: state
                .package_apk_checksums
                .iter()
                .map(|(k, v)| {
                    let mut sums: Vec<String> = v.iter().cloned().collect();
                    sums.sort();
                    (k.clone(), sums)
                })
                .collect(),
            device_path_checksums: state
                .device_path_checksums
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Adopt a dump made by the client session that ran just before ours on
    /// this device. Anything else is stale and ignored; returns whether the
    /// data was used.
    pub async fn load<T: Transport>(&self, exec: &CommandExecutor<T>, data: &str) -> AdbResult<bool> {
        let snapshot: CacheSnapshot = serde_json::from_str(data)?;
        let mut state = self.state.lock().await;
        Self::ensure_locked(&mut state, exec).await?;

        if let Err(stale) = check_fresh(&snapshot.token, state.prev_token.as_deref()) {
            log::warn!("{}: not using persisted cache: {}", exec.serial(), stale);
            return Ok(false);
        }

        for (package, paths) in snapshot.package_apk_paths {
            state.package_apk_paths_to_verify.insert(package.clone());
            state.package_apk_paths.insert(package, paths);
        }
        for (package, sums) in snapshot.package_apk_checksums {
            state
                .package_apk_checksums
                .insert(package, sums.into_iter().collect());
        }
        state.device_path_checksums.extend(snapshot.device_path_checksums);
        log::info!("{}: loaded persisted cache", exec.serial());
        Ok(true)
    }
}

fn check_fresh(given: &str, prev_token: Option<&str>) -> AdbResult<()> {
    match prev_token {
        Some(prev) if !given.is_empty() && prev == given => Ok(()),
        found => Err(AdbError::CacheStale {
            expected: given.to_string(),
            found: found.map(str::to_string),
        }),
    }
}

async fn paths_exist<T: Transport>(exec: &CommandExecutor<T>, paths: &[String]) -> AdbResult<bool> {
    if paths.is_empty() {
        return Ok(false);
    }
    let test = paths
        .iter()
        .map(|p| format!("test -e {}", single_quote(p)))
        .collect::<Vec<_>>()
        .join(" && ");
    Ok(exec.run(&ShellCommand::shell(test)).await?.success())
}
