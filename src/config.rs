use std::time::Duration;

pub const ENV_TIMEOUT_SECS: &str = "ADB_UTILS_TIMEOUT_SECS";
pub const ENV_RETRIES: &str = "ADB_UTILS_RETRIES";
pub const ENV_FILES_CACHE: &str = "ADB_UTILS_FILES_CACHE";

/// Per-device defaults shared by every component.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub default_timeout: Duration,
    pub default_retries: u32,
    pub retry_delay: Duration,
    /// Commands at least this long are shipped as a script file.
    pub max_command_length: usize,
    /// Files at most this large are read with `cat` instead of a pull.
    pub max_output_length: usize,
    /// Scratch directory for temp scripts, output captures and archives.
    pub temp_dir: String,
    /// Trust recorded device checksums instead of re-hashing on every sync.
    pub enable_device_files_cache: bool,
    /// Allow zip + on-device unzip when it beats individual pushes.
    pub archive_push: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retries: 3,
            retry_delay: Duration::from_millis(500),
            max_command_length: 512,
            max_output_length: 32768,
            temp_dir: "/data/local/tmp".to_string(),
            enable_device_files_cache: false,
            archive_push: true,
        }
    }
}

impl DeviceConfig {
    /// Defaults overridden by `ADB_UTILS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.parse::<u64>() {
                Ok(secs) => config.default_timeout = Duration::from_secs(secs),
                Err(_) => log::warn!("Ignoring invalid {}={:?}", ENV_TIMEOUT_SECS, raw),
            }
        }
        if let Some(raw) = lookup(ENV_RETRIES) {
            match raw.parse::<u32>() {
                Ok(retries) => config.default_retries = retries,
                Err(_) => log::warn!("Ignoring invalid {}={:?}", ENV_RETRIES, raw),
            }
        }
        if let Some(raw) = lookup(ENV_FILES_CACHE) {
            config.enable_device_files_cache = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_device_files_cache(mut self, enabled: bool) -> Self {
        self.enable_device_files_cache = enabled;
        self
    }
}
