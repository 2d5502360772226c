pub mod adb;
pub mod cache;
pub mod config;
pub mod device;
pub mod poll;
pub mod retry;
pub mod shell;
pub mod sync;

pub use adb::{AdbError, AdbResult, ServerTransport, Transport};
pub use cache::DeviceStateCache;
pub use config::DeviceConfig;
pub use device::AndroidDevice;
pub use shell::{AsRoot, CommandExecutor, CommandResult, ShellCommand};
pub use sync::{FileSyncEngine, SyncPlan, SyncReport};
