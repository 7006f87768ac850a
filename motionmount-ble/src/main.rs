//! Command-line control for MotionMount TV wall mounts
//!
//! Finds a mount over BLE, authenticates with the configured PIN and runs
//! one action against it.

mod config;

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use motionmount_controller::ble::{self, BtleLink};
use motionmount_controller::{
    AutoMove, DeviceState, HdmiChannel, MotionMount, MountEvent, MultiPinFeatures, PinTier,
    PresetData, PresetTarget,
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, REDACTED};

#[derive(Parser)]
#[command(name = "motionmount")]
#[command(about = "Control a Vogel's MotionMount over Bluetooth LE")]
#[command(version)]
struct Cli {
    /// Mount name or address (overrides the config file)
    #[arg(short, long, global = true, env = "MOTIONMOUNT_DEVICE")]
    device: Option<String>,

    /// Four-digit PIN (overrides the config file)
    #[arg(short, long, global = true, env = "MOTIONMOUNT_PIN", hide_env_values = true)]
    pin: Option<String>,

    /// More output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby devices
    Scan {
        /// Scan duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },
    /// Read and print the full device state
    Status {
        /// Print diagnostics as JSON with PIN and address redacted
        #[arg(long)]
        json: bool,
    },
    /// Follow position and connection changes until Ctrl-C
    Watch,
    /// Move to a preset slot (0-6) or "default"
    Select {
        #[arg(value_parser = parse_target)]
        target: PresetTarget,
    },
    /// Move to an explicit position
    Move {
        /// Distance from the wall, 0-100
        #[arg(long)]
        distance: Option<u16>,
        /// Rotation, -100 (left) to 100 (right)
        #[arg(long, allow_negative_numbers = true)]
        rotation: Option<i16>,
    },
    /// Manage preset slots
    #[command(subcommand)]
    Preset(PresetCommand),
    /// Rename the mount
    Name { name: String },
    /// Set the TV width in centimetres
    Width { width: u8 },
    /// Follow an HDMI input automatically
    Automove {
        #[arg(value_enum)]
        state: Toggle,
        /// HDMI input number, 1-5
        #[arg(value_parser = parse_hdmi)]
        hdmi: HdmiChannel,
    },
    /// Position used when the TV turns off: a slot (0-6) or "default"
    Freeze {
        #[arg(value_parser = parse_target)]
        target: PresetTarget,
    },
    /// Set a PIN; "0000" removes it
    Pin {
        #[arg(value_enum)]
        tier: Tier,
        new_pin: String,
    },
    /// Choose which settings the authorized user may change
    Features(FeatureArgs),
    /// Start the calibration run
    Calibrate,
    /// Show or change the stored configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum PresetCommand {
    /// Store a position in a slot
    Set {
        slot: u8,
        name: String,
        #[arg(long)]
        distance: u16,
        #[arg(long, allow_negative_numbers = true)]
        rotation: i16,
    },
    /// Clear a slot
    Delete { slot: u8 },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    /// Store the given --device and --pin, and optionally the scan time
    Set {
        #[arg(long)]
        scan_secs: Option<u64>,
    },
}

#[derive(Args)]
struct FeatureArgs {
    #[arg(long)]
    presets: bool,
    #[arg(long)]
    name: bool,
    #[arg(long)]
    disable_channel: bool,
    #[arg(long)]
    tv_detection: bool,
    #[arg(long)]
    default_position: bool,
    #[arg(long)]
    calibration: bool,
}

impl From<&FeatureArgs> for MultiPinFeatures {
    fn from(args: &FeatureArgs) -> Self {
        MultiPinFeatures {
            change_presets: args.presets,
            change_name: args.name,
            disable_channel: args.disable_channel,
            change_tv_on_off_detection: args.tv_detection,
            change_default_position: args.default_position,
            start_calibration: args.calibration,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum Tier {
    User,
    Supervisor,
}

impl From<Tier> for PinTier {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::User => PinTier::AuthorizedUser,
            Tier::Supervisor => PinTier::Supervisor,
        }
    }
}

fn parse_target(s: &str) -> Result<PresetTarget, String> {
    if s.eq_ignore_ascii_case("default") {
        return Ok(PresetTarget::Default);
    }
    s.parse::<u8>()
        .map(PresetTarget::Slot)
        .map_err(|_| format!("expected a slot number or \"default\", got {s:?}"))
}

fn parse_hdmi(s: &str) -> Result<HdmiChannel, String> {
    s.parse::<u8>()
        .ok()
        .and_then(HdmiChannel::from_number)
        .ok_or_else(|| format!("expected an HDMI input 1-5, got {s:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("motionmount_ble={log_level},motionmount_controller={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;
    if let Some(device) = &cli.device {
        config.device = Some(device.clone());
    }
    if let Some(pin) = &cli.pin {
        config.pin = Some(pin.clone());
    }

    match &cli.command {
        Commands::Scan { duration } => scan_devices(*duration).await?,
        Commands::Config(command) => run_config(&cli, command)?,
        command => {
            let mount = open(&config).await?;
            let result = run(&mount, &config, command).await;
            if let Err(err) = mount.unload().await {
                debug!(%err, "disconnect failed");
            }
            result?;
        }
    }

    Ok(())
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for MotionMounts ({duration} seconds)...");
    let devices = ble::scan(Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_motionmount { " [MOTIONMOUNT]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

fn run_config(cli: &Cli, command: &ConfigCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ConfigCommand::Show => {
            let config = Config::load()?;
            println!("{}", Config::path()?.display());
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        ConfigCommand::Set { scan_secs } => {
            let mut config = Config::load()?;
            if let Some(device) = &cli.device {
                config.device = Some(device.clone());
            }
            if let Some(pin) = &cli.pin {
                // Reject malformed PINs before they are stored
                pin.parse::<motionmount_controller::Pin>()?;
                config.pin = Some(pin.clone());
            }
            if let Some(secs) = scan_secs {
                config.scan_secs = *secs;
            }
            config.save()?;
            println!("Saved {}", Config::path()?.display());
        }
    }
    Ok(())
}

async fn open(config: &Config) -> Result<MotionMount<BtleLink>, Box<dyn std::error::Error>> {
    println!("Looking for MotionMount...");
    let link = ble::find_device(
        config.device.as_deref(),
        Duration::from_secs(config.scan_secs),
    )
    .await?;
    info!(address = %link.address(), "using MotionMount");

    Ok(MotionMount::with_policy(link, config.pin.as_deref(), config.auth_policy())?)
}

async fn run(
    mount: &MotionMount<BtleLink>,
    config: &Config,
    command: &Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Status { json } => {
            let state = mount.refresh_with_retry(&config.retry_policy()).await?;
            if *json {
                let diagnostics = json!({
                    "address": REDACTED,
                    "config": config.redacted(),
                    "state": state,
                });
                println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            } else {
                print_state(&state);
            }
        }
        Commands::Watch => watch(mount).await?,
        Commands::Select { target } => {
            mount.select_preset(*target).await?;
            println!("Moving to {target}");
        }
        Commands::Move { distance, rotation } => {
            if distance.is_none() && rotation.is_none() {
                return Err("nothing to do: pass --distance and/or --rotation".into());
            }
            if let Some(distance) = distance {
                mount.set_distance(*distance).await?;
            }
            if let Some(rotation) = rotation {
                mount.set_rotation(*rotation).await?;
            }
            println!("Moving");
        }
        Commands::Preset(PresetCommand::Set { slot, name, distance, rotation }) => {
            let data = PresetData {
                name: name.clone(),
                distance: *distance,
                rotation: *rotation,
            };
            mount.set_preset(*slot, data).await?;
            println!("Preset {slot} saved");
        }
        Commands::Preset(PresetCommand::Delete { slot }) => {
            mount.delete_preset(*slot).await?;
            println!("Preset {slot} deleted");
        }
        Commands::Name { name } => {
            mount.set_name(name).await?;
            println!("Renamed to {name}");
        }
        Commands::Width { width } => {
            mount.set_width(*width).await?;
            println!("TV width set to {width} cm");
        }
        Commands::Automove { state, hdmi } => {
            let automove = match state {
                Toggle::On => AutoMove::On(*hdmi),
                Toggle::Off => AutoMove::Off(*hdmi),
            };
            mount.set_automove(automove).await?;
            println!("Automove {automove}");
        }
        Commands::Freeze { target } => {
            mount.set_freeze_preset(*target).await?;
            println!("Freeze position set to {target}");
        }
        Commands::Pin { tier, new_pin } => {
            mount.set_pin((*tier).into(), new_pin).await?;
            println!("PIN updated; now {}", mount.state().pin_setting);
        }
        Commands::Features(args) => {
            mount.set_multi_pin_features(args.into()).await?;
            println!("Authorized-user features updated");
        }
        Commands::Calibrate => {
            mount.start_calibration().await?;
            println!("Calibration started");
        }
        Commands::Scan { .. } | Commands::Config(_) => {}
    }
    Ok(())
}

async fn watch(mount: &MotionMount<BtleLink>) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = mount.subscribe();
    let state = mount.refresh().await?;
    println!("{}: distance {} rotation {}", state.name, state.distance, state.rotation);
    println!("Watching, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(MountEvent::Distance(distance)) => println!("distance {distance}"),
                Ok(MountEvent::Rotation(rotation)) => println!("rotation {rotation}"),
                Ok(MountEvent::Connection(false)) => {
                    println!("disconnected");
                    break;
                }
                Ok(MountEvent::Connection(true)) => println!("connected"),
                Ok(MountEvent::Permissions(p)) => debug!(auth_type = ?p.auth_type, "permissions changed"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_state(state: &DeviceState) {
    println!("Name:        {}", state.name);
    println!("Position:    distance {} rotation {}", state.distance, state.rotation);
    println!("TV width:    {} cm", state.width);
    println!("Automove:    {}", state.automove);
    println!("Freeze:      {}", state.freeze_preset);
    println!("PIN:         {}", state.pin_setting);
    println!("Access:      {:?}", state.permissions.auth_type);
    println!(
        "Versions:    CEB {} / MCP hw {} bl {} fw {}",
        state.versions.ceb_bl, state.versions.mcp_hw, state.versions.mcp_bl, state.versions.mcp_fw
    );
    println!("Presets:");
    for slot in state.presets.values() {
        match &slot.data {
            Some(data) => println!(
                "  {}: {} (distance {} rotation {})",
                slot.index, data.name, data.distance, data.rotation
            ),
            None => println!("  {}: -", slot.index),
        }
    }
}
