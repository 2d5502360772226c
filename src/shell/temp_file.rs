use super::quote::single_quote;

/// A uniquely named path on the device, owned by one operation.
///
/// Nothing is created on the device by constructing it; whoever writes the
/// file removes it again through `CommandExecutor::remove_temp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTempFile {
    pub name: String,
}

impl DeviceTempFile {
    pub fn new(dir: &str, prefix: &str, suffix: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("{}/{}-{}{}", dir.trim_end_matches('/'), prefix, id, suffix),
        }
    }

    pub fn name_quoted(&self) -> String {
        single_quote(&self.name)
    }
}
