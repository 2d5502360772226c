// Shell command construction and execution on the device.

pub mod command;
pub mod elevation;
pub mod executor;
pub mod quote;
pub mod temp_file;

pub use command::{CommandLine, CommandResult, ShellCommand};
pub use elevation::{AsRoot, Elevation};
pub use executor::{CommandExecutor, DeviceIdentity};
pub use quote::{join_quoted, single_quote};
pub use temp_file::DeviceTempFile;
