// ADB module - transport boundary between the device utilities and adbd.
// The core never parses transport framing; it only sees `Transport`.

pub mod error;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
mod tests;

// Re-export the main types and functions for easy access
pub use error::{AdbError, AdbResult, TimeoutKind};
pub use server::ServerTransport;
pub use types::{Device, Transport};
