//! TOML configuration for one or more devices.
//!
//! ```toml
//! [io]
//! max_read_per_poll = 65536
//!
//! [[device]]
//! name = "mic0"
//! serial = "/dev/ttyS1"
//! mode = "usb"
//!
//! [device.usb]
//! name = "usb-0000:00:14.0-2"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::device::OpenOptions;
use crate::protocol::Mode;
use crate::protocol::constants::{
    AW5808_PRODUCT_ID, AW5808_VENDOR_ID, DEFAULT_BAUD_RATE, DEFAULT_MAX_READ_PER_POLL,
    DEFAULT_SYNC_TIMEOUT_MS, MAX_RECV_BUF_SIZE,
};
use crate::transport::{ChannelLimits, UsbIdentity};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/devctl.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevctlConfig {
    pub io: IoConfig,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

/// Buffer limits shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub max_read_per_poll: usize,
    pub max_recv_buffer: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_read_per_poll: DEFAULT_MAX_READ_PER_POLL,
            max_recv_buffer: MAX_RECV_BUF_SIZE,
        }
    }
}

impl From<&IoConfig> for ChannelLimits {
    fn from(io: &IoConfig) -> Self {
        ChannelLimits {
            max_read_per_poll: io.max_read_per_poll,
            max_recv_buffer: io.max_recv_buffer,
        }
    }
}

/// Start mode as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    #[default]
    I2s,
    Usb,
}

impl From<ModeSetting> for Mode {
    fn from(m: ModeSetting) -> Self {
        match m {
            ModeSetting::I2s => Mode::I2s,
            ModeSetting::Usb => Mode::Usb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<PathBuf>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub mode: ModeSetting,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb: Option<UsbConfig>,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbConfig {
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// Substring of the hidraw physical path or HID name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_vendor_id() -> u16 {
    AW5808_VENDOR_ID
}

fn default_product_id() -> u16 {
    AW5808_PRODUCT_ID
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            vendor_id: AW5808_VENDOR_ID,
            product_id: AW5808_PRODUCT_ID,
            name: None,
        }
    }
}

impl From<&UsbConfig> for UsbIdentity {
    fn from(usb: &UsbConfig) -> Self {
        UsbIdentity {
            vendor_id: usb.vendor_id,
            product_id: usb.product_id,
            name: usb.name.clone(),
        }
    }
}

impl DeviceConfig {
    pub fn open_options(&self, io: &IoConfig) -> OpenOptions {
        OpenOptions {
            serial: self.serial.clone(),
            baud_rate: self.baud_rate,
            usb: self.usb.as_ref().map(UsbIdentity::from),
            mode: self.mode.into(),
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            limits: io.into(),
        }
    }
}

impl DevctlConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DevctlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (i, dev) in self.devices.iter().enumerate() {
            if dev.serial.is_none() && dev.usb.is_none() {
                bail!("device #{i} ({}) has neither serial nor usb", dev.name);
            }
            if self.devices[..i].iter().any(|d| d.name == dev.name) {
                bail!("duplicate device name '{}'", dev.name);
            }
        }
        if self.io.max_read_per_poll == 0 || self.io.max_recv_buffer == 0 {
            bail!("io limits must be non-zero");
        }
        Ok(())
    }
}
