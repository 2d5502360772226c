use super::elevation::{AsRoot, Elevation};
use super::quote::{double_quote, is_valid_variable_name, join_quoted, single_quote};
use crate::adb::{AdbError, AdbResult};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Program and arguments, each quoted into a single literal token.
    Argv(Vec<String>),
    /// Text interpreted by the device shell.
    Raw(String),
}

/// One shell invocation and the knobs that shape how it is run.
///
/// `timeout` and `retries` left as `None` fall back to the executor defaults.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub line: CommandLine,
    pub use_shell: bool,
    pub check_return: bool,
    pub as_root: AsRoot,
    pub run_as: Option<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub single_line: bool,
    pub large_output: bool,
    pub raw_output: bool,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl ShellCommand {
    fn with_line(line: CommandLine, use_shell: bool) -> Self {
        Self {
            line,
            use_shell,
            check_return: false,
            as_root: AsRoot::No,
            run_as: None,
            cwd: None,
            env: Vec::new(),
            single_line: false,
            large_output: false,
            raw_output: false,
            timeout: None,
            retries: None,
        }
    }

    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_line(CommandLine::Argv(argv.into_iter().map(Into::into).collect()), false)
    }

    /// Raw text that still needs `.use_shell(true)` before it may run.
    pub fn raw(text: impl Into<String>) -> Self {
        Self::with_line(CommandLine::Raw(text.into()), false)
    }

    /// Raw text run through the device shell (pipes, `&&`, globs).
    pub fn shell(text: impl Into<String>) -> Self {
        Self::with_line(CommandLine::Raw(text.into()), true)
    }

    pub fn use_shell(mut self, use_shell: bool) -> Self {
        self.use_shell = use_shell;
        self
    }

    pub fn check_return(mut self, check: bool) -> Self {
        self.check_return = check;
        self
    }

    pub fn as_root(mut self, as_root: AsRoot) -> Self {
        self.as_root = as_root;
        self
    }

    pub fn run_as(mut self, package: impl Into<String>) -> Self {
        self.run_as = Some(package.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn single_line(mut self, single_line: bool) -> Self {
        self.single_line = single_line;
        self
    }

    pub fn large_output(mut self, large_output: bool) -> Self {
        self.large_output = large_output;
        self
    }

    pub fn raw_output(mut self, raw_output: bool) -> Self {
        self.raw_output = raw_output;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Short human readable form for logs and errors.
    pub fn describe(&self) -> String {
        match &self.line {
            CommandLine::Argv(argv) => join_quoted(argv),
            CommandLine::Raw(text) => text.clone(),
        }
    }

    /// Build the text the device shell will run, before any overflow or
    /// large-output handling.
    pub fn to_shell_text(&self, elevation: Elevation) -> AdbResult<String> {
        let mut cmd = match &self.line {
            CommandLine::Argv(argv) if argv.is_empty() => {
                return Err(AdbError::InvalidCommand {
                    reason: "empty argument list".to_string(),
                });
            }
            CommandLine::Argv(argv) => join_quoted(argv),
            CommandLine::Raw(_) if !self.use_shell => {
                return Err(AdbError::InvalidCommand {
                    reason: format!(
                        "raw command {:?} given without use_shell; pass argv tokens instead",
                        self.describe()
                    ),
                });
            }
            CommandLine::Raw(text) => text.clone(),
        };

        if !self.env.is_empty() {
            let mut assignments = Vec::with_capacity(self.env.len());
            for (key, value) in &self.env {
                if !is_valid_variable_name(key) {
                    return Err(AdbError::InvalidEnvVar { name: key.clone() });
                }
                assignments.push(format!("{}={}", key, double_quote(value)));
            }
            cmd = format!("{} {}", assignments.join(" "), cmd);
        }
        if let Some(cwd) = &self.cwd {
            cmd = format!("cd {} && {}", single_quote(cwd), cmd);
        }
        if let Some(package) = &self.run_as {
            cmd = format!("run-as {} sh -c {}", single_quote(package), single_quote(&cmd));
        }
        Ok(elevation.wrap(&cmd))
    }
}

/// Output of one shell command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    /// Exit status; `None` when the device never reported one.
    pub status: Option<i32>,
    pub lines: Vec<String>,
    pub raw: String,
}

impl CommandResult {
    pub fn new(status: Option<i32>, raw: String) -> Self {
        let lines = raw.lines().map(str::to_string).collect();
        Self { status, lines, raw }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// The only line of a `single_line` command, or `""` when it printed nothing.
    pub fn line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub(crate) fn into_single_line(mut self, command: &str) -> AdbResult<Self> {
        let non_empty: Vec<String> = self
            .lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .cloned()
            .collect();
        if non_empty.len() > 1 {
            return Err(AdbError::UnexpectedOutput {
                command: command.to_string(),
                output: self.lines,
            });
        }
        self.lines = non_empty;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::super::quote::tests::split_words;
    use super::*;

    #[test]
    fn test_argv_is_quoted_per_token() {
        let cmd = ShellCommand::new(["echo", "a b", "$X"]);
        assert_eq!(cmd.to_shell_text(Elevation::Direct).unwrap(), "echo 'a b' '$X'");
    }

    #[test]
    fn test_raw_requires_use_shell() {
        let err = ShellCommand::raw("ls | wc -l")
            .to_shell_text(Elevation::Direct)
            .unwrap_err();
        assert!(matches!(err, AdbError::InvalidCommand { .. }));

        let ok = ShellCommand::raw("ls | wc -l").use_shell(true);
        assert_eq!(ok.to_shell_text(Elevation::Direct).unwrap(), "ls | wc -l");
    }

    #[test]
    fn test_env_and_cwd_prefixes() {
        let cmd = ShellCommand::new(["ls"])
            .env("PATH", "$PATH:/data/local/tmp/bin")
            .env("X", "1")
            .cwd("/sdcard/my dir");
        assert_eq!(
            cmd.to_shell_text(Elevation::Direct).unwrap(),
            "cd '/sdcard/my dir' && PATH=\"$PATH:/data/local/tmp/bin\" X=1 ls"
        );
    }

    #[test]
    fn test_invalid_env_name_rejected() {
        let err = ShellCommand::new(["ls"])
            .env("BAD-NAME", "1")
            .to_shell_text(Elevation::Direct)
            .unwrap_err();
        assert!(matches!(err, AdbError::InvalidEnvVar { name } if name == "BAD-NAME"));
    }

    #[test]
    fn test_root_and_run_as_nesting_order() {
        let cmd = ShellCommand::new(["cat", "files/a b"]).run_as("com.example.app");
        let text = cmd.to_shell_text(Elevation::SuModern).unwrap();
        assert!(text.starts_with("su 0 sh -c "));

        // su 0 sh -c <X>  where X = run-as pkg sh -c <inner>
        let outer = split_words(&text);
        assert_eq!(&outer[..3], ["su", "0", "sh"]);
        assert_eq!(outer[3], "-c");
        let run_as = split_words(&outer[4]);
        assert_eq!(&run_as[..4], ["run-as", "com.example.app", "sh", "-c"]);
        assert_eq!(split_words(&run_as[4]), vec!["cat", "files/a b"]);
    }

    #[test]
    fn test_empty_argv_rejected() {
        let cmd = ShellCommand::new(Vec::<String>::new());
        assert!(cmd.to_shell_text(Elevation::Direct).is_err());
    }

    #[test]
    fn test_single_line_shaping() {
        let one = CommandResult::new(Some(0), "value\n\n".to_string())
            .into_single_line("getprop x")
            .unwrap();
        assert_eq!(one.line(), "value");

        let none = CommandResult::new(Some(0), String::new())
            .into_single_line("getprop x")
            .unwrap();
        assert_eq!(none.line(), "");

        let many = CommandResult::new(Some(0), "a\nb\n".to_string()).into_single_line("ls");
        assert!(matches!(many, Err(AdbError::UnexpectedOutput { .. })));
    }
}
