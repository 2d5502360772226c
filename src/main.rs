mod args;

use android_adb_utils::adb::{AdbError, AdbResult, ServerTransport};
use android_adb_utils::{AndroidDevice, AsRoot, DeviceConfig, ShellCommand};
use args::{Args, CacheAction, Mode};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(120);

fn main() {
    let Some(args) = Args::parse() else {
        return;
    };

    let level = if args.debug_mode { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("❌ Could not start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run(args)) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

/// `~/.android/adb-utils-cache/<serial>.json`
fn default_cache_file(serial: &str) -> Option<PathBuf> {
    homedir::my_home()
        .ok()
        .flatten()
        .map(|home| home.join(".android").join("adb-utils-cache").join(format!("{serial}.json")))
}

async fn run(args: Args) -> AdbResult<()> {
    let mut config = DeviceConfig::from_env();
    if let Some(secs) = args.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(retries) = args.retries {
        config = config.with_retries(retries);
    }

    if args.mode == Mode::Devices {
        let devices = ServerTransport::list_devices().await?;
        if devices.is_empty() {
            println!("❌ No devices found");
        }
        for device in devices {
            println!("📱 {}\t{}", device.name, device.state);
        }
        return Ok(());
    }

    let transport = match &args.serial {
        Some(serial) => ServerTransport::new_with_device(serial).await?,
        None => ServerTransport::connect_first().await?,
    };
    let device = AndroidDevice::new(transport, config.clone());
    log::info!("Using device {}", device.serial());

    match args.mode {
        Mode::Devices => {}
        Mode::Shell(text) => {
            let as_root = if args.as_root { AsRoot::IfNeeded } else { AsRoot::No };
            let result = device
                .run(&ShellCommand::shell(text).as_root(as_root).raw_output(true))
                .await?;
            print!("{}", result.raw);
            match result.status {
                Some(0) => {}
                Some(code) => println!("⚠️ exit status {code}"),
                None => println!("⚠️ exit status unknown"),
            }
        }
        Mode::GetProp(key) => {
            println!("{}", device.get_prop(&key, false).await?);
        }
        Mode::Push {
            host,
            device: device_path,
            delete_stale,
        } => {
            let host = std::fs::canonicalize(&host).map_err(|e| AdbError::io(&host, e))?;
            let report = device
                .push_changed_files(&[(host, device_path)], delete_stale)
                .await?;
            println!(
                "✅ Pushed {} file(s), removed {} stale path(s){}",
                report.pushed,
                report.deleted,
                if report.archived { " (archive)" } else { "" }
            );
        }
        Mode::WaitBoot { wifi } => {
            let timeout = args
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BOOT_TIMEOUT);
            device.wait_until_fully_booted(wifi, timeout).await?;
            println!("✅ {} is fully booted", device.serial());
        }
        Mode::Cache { action, file } => {
            let Some(path) = file.or_else(|| default_cache_file(device.serial())) else {
                println!("❌ Failed to determine home directory for the cache file, pass one explicitly");
                return Ok(());
            };
            match action {
                CacheAction::Dump => {
                    let data = device.dump_cache_data().await?;
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| AdbError::io(parent, e))?;
                    }
                    tokio::fs::write(&path, data)
                        .await
                        .map_err(|e| AdbError::io(&path, e))?;
                    println!("✅ Cache written to {}", path.display());
                }
                CacheAction::Load => {
                    let data = tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|e| AdbError::io(&path, e))?;
                    if device.load_cache_data(&data).await? {
                        println!("✅ Cache loaded from {}", path.display());
                    } else {
                        println!("⚠️ Cache in {} is stale, ignored", path.display());
                    }
                }
            }
        }
    }
    Ok(())
}
