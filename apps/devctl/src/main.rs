use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use aw5808_core::protocol::constants::{AW5808_PRODUCT_ID, AW5808_VENDOR_ID, DEFAULT_BAUD_RATE};
use aw5808_core::transport::list_serial_ports;
use aw5808_core::{
    ConnectMode, DEFAULT_CONFIG_PATH, DevctlConfig, Device, DeviceConfig, DeviceEvent, DeviceId,
    DeviceObserver, DeviceStatus, DeviceTable, EventKind, EventLoop, I2sMode, Mode, SystemConnector,
    UsbConfig, list_usb_devices,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "AW5808 transceiver control tool", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port; bypasses the configuration file
    #[arg(long)]
    serial: Option<PathBuf>,

    /// Serial baud rate (with --serial)
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Also attach the USB side (with --serial), or use USB only
    #[arg(long)]
    usb: bool,

    /// hidraw physical path or HID name substring
    #[arg(long)]
    usb_name: Option<String>,

    /// Start mode negotiated on open (with --serial)
    #[arg(long, value_enum, default_value_t = ModeArg::I2s)]
    mode: ModeArg,

    /// Configured device to talk to (defaults to the first one)
    #[arg(short, long)]
    device: Option<String>,

    /// How long to wait for a reply
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List AW5808 USB devices and serial ports
    List,
    #[command(flatten)]
    Device(DeviceCmd),
}

/// Commands that need an opened device.
#[derive(Subcommand, Debug, Clone, Copy)]
enum DeviceCmd {
    /// Read firmware version, mode, RF channel and power
    GetConfig,
    /// Read the RF link and pairing status
    RfStatus,
    /// Start pairing
    Pair,
    /// Switch between I2S and USB audio
    SetMode { mode: ModeArg },
    /// Set the I2S clock role
    SetI2sMode { mode: I2sModeArg },
    /// Set single or multi connection mode
    SetConnectMode { mode: ConnectModeArg },
    /// Set the RF channel (1-8)
    SetChannel { channel: u8 },
    /// Set the RF power (1-16)
    SetPower { power: u8 },
    /// Read the firmware version over USB HID
    FwVersion,
    /// Print every event; query RF status periodically
    Monitor {
        /// Seconds between RF status queries (0 disables polling)
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    I2s,
    Usb,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::I2s => Mode::I2s,
            ModeArg::Usb => Mode::Usb,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum I2sModeArg {
    Master,
    Slave,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ConnectModeArg {
    Multi,
    Single,
}

/// Prints events to stdout and remembers which kinds were seen.
struct PrintObserver {
    seen: Mutex<Vec<EventKind>>,
}

impl PrintObserver {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    fn has_seen(&self, kind: EventKind) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.contains(&kind))
            .unwrap_or(false)
    }
}

impl DeviceObserver for PrintObserver {
    fn name(&self) -> &str {
        "devctl"
    }

    fn on_event(&self, status: &DeviceStatus, event: &DeviceEvent) {
        println!("{}: {}", status.ident, event);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(event.kind());
        }
    }
}

fn init_tracing(verbose: bool, log: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(if verbose {
            tracing::Level::DEBUG.into()
        } else {
            tracing::Level::INFO.into()
        })
        .from_env_lossy();

    match log {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Build the device list from the command line or the configuration file.
fn load_config(args: &Args) -> Result<DevctlConfig> {
    if args.serial.is_some() || args.usb {
        let usb = args.usb.then(|| UsbConfig {
            name: args.usb_name.clone(),
            ..Default::default()
        });
        return Ok(DevctlConfig {
            devices: vec![DeviceConfig {
                name: "cli".to_string(),
                serial: args.serial.clone(),
                baud_rate: args.baud,
                mode: match args.mode {
                    ModeArg::I2s => aw5808_core::config::ModeSetting::I2s,
                    ModeArg::Usb => aw5808_core::config::ModeSetting::Usb,
                },
                sync_timeout_ms: args.timeout_ms,
                usb,
            }],
            ..Default::default()
        });
    }

    let mut config = DevctlConfig::load_from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(name) = &args.device {
        config.devices.retain(|d| &d.name == name);
        if config.devices.is_empty() {
            bail!("no device named '{name}' in {}", args.config.display());
        }
    }
    Ok(config)
}

fn list() -> Result<()> {
    let devices = list_usb_devices(AW5808_VENDOR_ID, AW5808_PRODUCT_ID)?;
    if devices.is_empty() {
        println!("No AW5808 on USB");
    }
    for dev in devices {
        println!(
            "usb {} {:04X}:{:04X} {} {}",
            dev.bus_id,
            dev.vendor_id,
            dev.product_id,
            dev.manufacturer.as_deref().unwrap_or("-"),
            dev.product.as_deref().unwrap_or("-"),
        );
        for node in dev.hidraw {
            println!(
                "    {} {}",
                node.devnode.display(),
                node.hid_phys.as_deref().unwrap_or("")
            );
        }
    }
    for port in list_serial_ports()? {
        println!(
            "serial {} {}",
            port.path,
            port.usb.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// Issue one request and run the loop until its reply event arrives.
fn one_shot<F>(
    event_loop: &mut EventLoop,
    observer: &PrintObserver,
    id: DeviceId,
    expect: EventKind,
    timeout: Duration,
    request: F,
) -> Result<()>
where
    F: FnOnce(&mut Device) -> Result<(), aw5808_core::DeviceError>,
{
    let device = event_loop
        .devices_mut()
        .get_mut(id)
        .ok_or_else(|| anyhow!("device {id} is gone"))?;
    request(device)?;

    if !event_loop.run_until(timeout, |_| observer.has_seen(expect))? {
        bail!("no reply within {}ms", timeout.as_millis());
    }
    Ok(())
}

fn monitor(event_loop: &mut EventLoop, poll_interval: u64, duration: Option<u64>) -> Result<()> {
    let handle = event_loop.handle();

    if poll_interval > 0 {
        let poller = handle.clone();
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_secs(poll_interval));
                let posted = poller.submit(|table: &mut DeviceTable| {
                    for (id, device) in table.iter_mut() {
                        if let Err(e) = device.get_rfstatus() {
                            warn!(device = %id, error = %e, "RF status query failed");
                        }
                    }
                });
                if posted.is_err() {
                    break;
                }
            }
        });
    }

    if let Some(secs) = duration {
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            let _ = handle.stop();
        });
    }

    event_loop.run()?;
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    match args.command {
        Cmd::List => list(),
        Cmd::Device(command) => run_device(args, command),
    }
}

fn run_device(args: &Args, command: DeviceCmd) -> Result<()> {
    let config = load_config(args)?;
    let table = DeviceTable::open_from_config(&config, Arc::new(SystemConnector));
    let Some(id) = table.ids().first().copied() else {
        bail!("no device could be opened");
    };

    let observer = Arc::new(PrintObserver::new());
    let dyn_observer: Arc<dyn DeviceObserver> = observer.clone();
    let mut event_loop = EventLoop::new(table)?;
    for (_, device) in event_loop.devices_mut().iter_mut() {
        device.register(&dyn_observer)?;
    }

    let timeout = Duration::from_millis(args.timeout_ms);
    let ol = &mut event_loop;
    let obs = observer.as_ref();
    match command {
        DeviceCmd::GetConfig => {
            one_shot(ol, obs, id, EventKind::GetConfig, timeout, |d| d.get_config())
        }
        DeviceCmd::RfStatus => {
            one_shot(ol, obs, id, EventKind::GetRfStatus, timeout, |d| d.get_rfstatus())
        }
        DeviceCmd::Pair => one_shot(ol, obs, id, EventKind::Pair, timeout, |d| d.pair()),
        DeviceCmd::SetMode { mode } => {
            one_shot(ol, obs, id, EventKind::SetMode, timeout, |d| {
                d.set_mode(mode.into())
            })
        }
        DeviceCmd::SetI2sMode { mode } => {
            let mode = match mode {
                I2sModeArg::Master => I2sMode::Master,
                I2sModeArg::Slave => I2sMode::Slave,
            };
            one_shot(ol, obs, id, EventKind::SetI2sMode, timeout, |d| d.set_i2s_mode(mode))
        }
        DeviceCmd::SetConnectMode { mode } => {
            let mode = match mode {
                ConnectModeArg::Multi => ConnectMode::Multi,
                ConnectModeArg::Single => ConnectMode::Single,
            };
            one_shot(ol, obs, id, EventKind::SetConnectMode, timeout, |d| {
                d.set_connect_mode(mode)
            })
        }
        DeviceCmd::SetChannel { channel } => {
            one_shot(ol, obs, id, EventKind::SetRfChannel, timeout, |d| {
                d.set_rfchannel(channel)
            })
        }
        DeviceCmd::SetPower { power } => {
            one_shot(ol, obs, id, EventKind::SetRfPower, timeout, |d| {
                d.set_rfpower(power)
            })
        }
        DeviceCmd::FwVersion => {
            let device = ol
                .devices_mut()
                .get_mut(id)
                .ok_or_else(|| anyhow!("device {id} is gone"))?;
            let version = device.read_firmware_version_sync(timeout)?;
            info!(version = %format!("0x{version:04X}"), "Firmware version read");
            Ok(())
        }
        DeviceCmd::Monitor {
            poll_interval,
            duration,
        } => monitor(ol, poll_interval, duration),
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose, args.log.as_deref()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    info!("Starting devctl...");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_needs_no_device() {
        let args = Args::try_parse_from(["devctl", "list"]).unwrap();
        assert!(matches!(args.command, Cmd::List));
    }

    #[test]
    fn test_device_commands_parse() {
        let args = Args::try_parse_from(["devctl", "--serial", "/dev/ttyS1", "set-channel", "3"])
            .unwrap();
        assert!(matches!(
            args.command,
            Cmd::Device(DeviceCmd::SetChannel { channel: 3 })
        ));

        let args = Args::try_parse_from(["devctl", "monitor", "--poll-interval", "0"]).unwrap();
        assert!(matches!(
            args.command,
            Cmd::Device(DeviceCmd::Monitor {
                poll_interval: 0,
                duration: None
            })
        ));
    }
}
