use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAction {
    Dump,
    Load,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Devices,
    Shell(String),
    GetProp(String),
    Push {
        host: PathBuf,
        device: String,
        delete_stale: bool,
    },
    WaitBoot {
        wifi: bool,
    },
    Cache {
        action: CacheAction,
        file: Option<PathBuf>,
    },
}

#[derive(Debug)]
pub struct Args {
    pub mode: Mode,
    pub serial: Option<String>,
    pub debug_mode: bool,
    pub as_root: bool,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

impl Args {
    pub fn parse() -> Option<Self> {
        let args: Vec<String> = env::args().skip(1).collect();
        Self::parse_from(&args)
    }

    pub fn parse_from(args: &[String]) -> Option<Self> {
        let mut serial: Option<String> = None;
        let mut debug_mode = false;
        let mut as_root = false;
        let mut delete_stale = false;
        let mut wifi = false;
        let mut timeout_secs: Option<u64> = None;
        let mut retries: Option<u32> = None;
        let mut positional: Vec<String> = Vec::new();

        for arg in args {
            if !positional.is_empty() && positional[0] == "shell" {
                // Everything after `shell` belongs to the device command.
                positional.push(arg.clone());
                continue;
            }
            if arg == "--help" || arg == "-h" {
                print_help();
                return None;
            } else if arg == "--version" || arg == "-v" {
                println!("Android ADB Utils v{}", env!("CARGO_PKG_VERSION"));
                return None;
            } else if arg == "--debug" {
                debug_mode = true;
            } else if arg == "--root" {
                as_root = true;
            } else if arg == "--delete-stale" {
                delete_stale = true;
            } else if arg == "--wifi" {
                wifi = true;
            } else if let Some(val) = arg.strip_prefix("--serial=") {
                serial = Some(val.to_string());
            } else if let Some(val) = arg.strip_prefix("--timeout=") {
                match val.parse::<u64>() {
                    Ok(secs) => timeout_secs = Some(secs),
                    Err(_) => {
                        eprintln!("❌ Invalid timeout value: {}", val);
                        return None;
                    }
                }
            } else if let Some(val) = arg.strip_prefix("--retries=") {
                match val.parse::<u32>() {
                    Ok(n) => retries = Some(n),
                    Err(_) => {
                        eprintln!("❌ Invalid retries value: {}", val);
                        return None;
                    }
                }
            } else if arg.starts_with("--") {
                eprintln!("❌ Unknown argument: {}", arg);
                print_help();
                return None;
            } else {
                positional.push(arg.clone());
            }
        }

        let mode = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            [] | ["devices"] => Mode::Devices,
            ["shell", rest @ ..] if !rest.is_empty() => Mode::Shell(rest.join(" ")),
            ["getprop", key] => Mode::GetProp(key.to_string()),
            ["push", host, device] => Mode::Push {
                host: PathBuf::from(host),
                device: device.to_string(),
                delete_stale,
            },
            ["wait-boot"] => Mode::WaitBoot { wifi },
            ["cache", action, rest @ ..] if rest.len() <= 1 => {
                let action = match *action {
                    "dump" => CacheAction::Dump,
                    "load" => CacheAction::Load,
                    other => {
                        eprintln!("❌ Unknown cache action '{}', expected 'dump' or 'load'", other);
                        return None;
                    }
                };
                Mode::Cache {
                    action,
                    file: rest.first().map(PathBuf::from),
                }
            }
            other => {
                eprintln!("❌ Unknown command: {}", other.join(" "));
                print_help();
                return None;
            }
        };

        Some(Args {
            mode,
            serial,
            debug_mode,
            as_root,
            timeout_secs,
            retries,
        })
    }
}

fn print_help() {
    println!("🤖 Android ADB Utils");
    println!();
    println!("USAGE:");
    println!("    android-adb-utils [FLAGS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    devices                     List connected devices (default)");
    println!("    shell <command...>          Run a shell command on the device");
    println!("    getprop <key>               Print a device property");
    println!("    push <host> <device>        Push only files whose content changed");
    println!("    wait-boot                   Wait until the device is fully booted");
    println!("    cache <dump|load> [file]    Persist or restore the device cache");
    println!();
    println!("FLAGS:");
    println!("    --serial=S          Device serial (default: first device)");
    println!("    --root              Run shell commands as root");
    println!("    --delete-stale      push: remove device files missing on the host");
    println!("    --wifi              wait-boot: also wait for wifi");
    println!("    --timeout=N         Per-operation timeout in seconds");
    println!("    --retries=N         Retries for transport failures");
    println!("    --debug             Enable debug logging");
    println!("    --help, -h          Show this help message");
    println!("    --version, -v       Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    android-adb-utils shell ls -l /sdcard");
    println!("    android-adb-utils --serial=emulator-5554 push ./assets /sdcard/assets --delete-stale");
    println!("    android-adb-utils cache dump");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<Args> {
        Args::parse_from(&args.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_shell_keeps_its_flags() {
        let args = parse(&["--root", "shell", "ls", "--color", "/sdcard"]).unwrap();
        assert_eq!(args.mode, Mode::Shell("ls --color /sdcard".to_string()));
        assert!(args.as_root);
    }

    #[test]
    fn test_push_and_flags() {
        let args = parse(&["push", "./a", "/sdcard/a", "--delete-stale", "--serial=X", "--timeout=5"]).unwrap();
        assert_eq!(
            args.mode,
            Mode::Push {
                host: PathBuf::from("./a"),
                device: "/sdcard/a".to_string(),
                delete_stale: true,
            }
        );
        assert_eq!(args.serial.as_deref(), Some("X"));
        assert_eq!(args.timeout_secs, Some(5));
    }

    #[test]
    fn test_cache_and_defaults() {
        assert_eq!(parse(&[]).unwrap().mode, Mode::Devices);
        assert_eq!(
            parse(&["cache", "load", "c.json"]).unwrap().mode,
            Mode::Cache {
                action: CacheAction::Load,
                file: Some(PathBuf::from("c.json")),
            }
        );
        assert!(parse(&["cache", "nuke"]).is_none());
        assert!(parse(&["--timeout=soon", "devices"]).is_none());
    }
}
