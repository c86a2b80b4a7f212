//! bcache CLI - device inspection
//!
//! Reads bcache superblocks, identifies the underlying disks and lists
//! cache/backing devices. The only write it performs is relabeling.

use anyhow::{Context, Result};
use bcache_common::Config;
use bcache_storage::device::BCACHE_NO_SUPPORT;
use bcache_storage::{DeviceRecord, Inventory, Prober};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "bcache-cli")]
#[command(about = "bcache device inspection")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/bcache/bcache.toml")]
    config: PathBuf,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Skip ATA/NVMe identify commands
    #[arg(long)]
    no_identify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the superblock of a device
    Show {
        /// Device path
        device: PathBuf,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show model and serial number reported by a device
    Identify {
        /// Device path
        device: PathBuf,
    },
    /// List bcache devices
    List {
        /// Devices to probe (discovered from sysfs when empty)
        devices: Vec<PathBuf>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the label of a device
    SetLabel {
        /// Device path
        device: PathBuf,
        /// New label (up to 32 bytes)
        label: String,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    let config: Config = if path.exists() {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&config_str)
            .map_err(|e| bcache_common::Error::Configuration(e.to_string()))
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

fn version_kind(version: u64) -> &'static str {
    match version {
        0 | 3 => "cache device",
        1 | 4 => "backing device",
        _ => "unknown",
    }
}

fn print_detail(record: &DeviceRecord) {
    let base = record.base();
    println!("sb.magic\t\t{}", base.magic);
    println!("sb.first_sector\t\t{}", base.first_sector);
    println!("sb.csum\t\t\t{:016X}", base.csum);
    println!("sb.version\t\t{} [{}]", base.version, version_kind(base.version));
    println!();
    let label = if base.label.is_empty() {
        "(empty)"
    } else {
        base.label.as_str()
    };
    println!("dev.label\t\t{label}");
    println!("dev.uuid\t\t{}", base.uuid);
    println!("dev.model\t\t{}", base.model());
    println!("dev.serial\t\t{}", base.serial());
    println!("dev.sectors_per_block\t{}", base.sectors_per_block);
    println!("dev.sectors_per_bucket\t{}", base.sectors_per_bucket);

    match record {
        DeviceRecord::Backing(bdev) => {
            println!("dev.data.first_sector\t{}", bdev.data_offset);
            println!(
                "dev.data.cache_mode\t{}",
                bdev.cache_mode.map_or(BCACHE_NO_SUPPORT, |m| m.as_str())
            );
            println!(
                "dev.data.cache_state\t{}",
                bdev.cache_state.map_or(BCACHE_NO_SUPPORT, |s| s.as_str())
            );
            println!("dev.bname\t\t{}", base.bname);
            println!("dev.state\t\t{}", base.state);
            println!();
            println!("cset.uuid\t\t{}", base.attach_uuid);
        }
        DeviceRecord::Cache(cdev) => {
            println!(
                "dev.cache.first_sector\t{}",
                u64::from(cdev.first_bucket) * u64::from(base.sectors_per_bucket)
            );
            println!("dev.cache.cache_sectors\t{}", cdev.cache_sectors);
            println!("dev.cache.total_sectors\t{}", cdev.total_sectors);
            println!("dev.cache.ordered\t{}", if cdev.ordered { "yes" } else { "no" });
            println!("dev.cache.discard\t{}", if cdev.discard { "yes" } else { "no" });
            println!("dev.cache.pos\t\t{}", cdev.pos);
            println!(
                "dev.cache.replacement\t{}",
                cdev.replacement.map_or(BCACHE_NO_SUPPORT, |r| r.as_str())
            );
            println!();
            println!("cset.uuid\t\t{}", base.cset);
            println!("cset.state\t\t{}", base.state);
        }
    }
}

/// Where a backing device is attached, by cache device name when known
fn attached_to(inventory: &Inventory, record: &DeviceRecord) -> String {
    let base = record.base();
    if !record.is_backing() {
        return BCACHE_NO_SUPPORT.to_string();
    }
    Uuid::parse_str(&base.attach_uuid)
        .ok()
        .and_then(|set| inventory.cset_to_devname(&set))
        .map_or_else(|| base.attach_uuid.clone(), String::from)
}

fn print_list(inventory: &Inventory) {
    println!(
        "{:<20} {:<20} {:<16} {:<12} {:<36}",
        "Name", "Type", "State", "Bname", "AttachToDev"
    );
    for record in inventory {
        let base = record.base();
        let kind = if record.is_backing() { "data" } else { "cache" };
        println!(
            "{:<20} {:<20} {:<16} {:<12} {:<36}",
            base.name,
            format!("{} ({kind})", base.version),
            base.state,
            base.bname,
            attached_to(inventory, record),
        );
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if args.no_identify {
        config.probe.identify = false;
    }
    let log_level = args.log_level.unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let prober = Prober::new(config.probe);

    match args.command {
        Commands::Show { device, json } => {
            let record = prober
                .probe(&device)
                .with_context(|| format!("failed to read {}", device.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_detail(&record);
            }
        }
        Commands::Identify { device } => {
            let identity = prober
                .identify_device(&device)
                .with_context(|| format!("failed to identify {}", device.display()))?;
            println!("Model:    {}", identity.model);
            println!("Serial:   {}", identity.serial);
            println!("Firmware: {}", identity.firmware);
            println!("Protocol: {:?}", identity.protocol);
        }
        Commands::List { devices, json } => {
            let devices = if devices.is_empty() {
                prober.discover()?
            } else {
                devices
            };
            debug!("probing {} candidate devices", devices.len());

            let report = prober.scan(&devices);
            if json {
                println!("{}", serde_json::to_string_pretty(&report.inventory)?);
            } else {
                print_list(&report.inventory);
            }
        }
        Commands::SetLabel { device, label } => {
            let sb = prober
                .set_label(&device, &label)
                .with_context(|| format!("failed to relabel {}", device.display()))?;
            println!("{}: label set to \"{}\"", device.display(), sb.label);
        }
    }

    Ok(())
}
