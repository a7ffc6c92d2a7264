//! Command ids and the typed values they carry.
//!
//! Requests use `0x50..=0x58`; the device answers with the same id with the
//! high bit set. The RF-status notification is the exception: the device sends
//! it unsolicited as `0x52` and the host acknowledges with `0xD2`.

use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use super::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetConfig,
    GetRfStatus,
    NotifyRfStatus,
    Pair,
    SetMode,
    SetI2sMode,
    SetConnectMode,
    SetRfChannel,
    SetRfPower,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::GetConfig,
        Command::GetRfStatus,
        Command::NotifyRfStatus,
        Command::Pair,
        Command::SetMode,
        Command::SetI2sMode,
        Command::SetConnectMode,
        Command::SetRfChannel,
        Command::SetRfPower,
    ];

    /// Id of the request frame.
    pub const fn request_id(self) -> u8 {
        match self {
            Command::GetConfig => CMD_GET_CONFIG,
            Command::GetRfStatus => CMD_GET_RFSTATUS,
            Command::NotifyRfStatus => CMD_NOTIFY_RFSTATUS,
            Command::Pair => CMD_PAIR,
            Command::SetMode => CMD_SET_MODE,
            Command::SetI2sMode => CMD_SET_I2S_MODE,
            Command::SetConnectMode => CMD_SET_CONNECT_MODE,
            Command::SetRfChannel => CMD_SET_RFCHANNEL,
            Command::SetRfPower => CMD_SET_RFPOWER,
        }
    }

    /// Id of the matching reply frame.
    pub const fn reply_id(self) -> u8 {
        self.request_id() | REPLY_FLAG
    }

    /// Id the device uses when it talks to us.
    pub const fn inbound_id(self) -> u8 {
        match self {
            Command::NotifyRfStatus => CMD_NOTIFY_RFSTATUS,
            other => other.reply_id(),
        }
    }

    pub fn from_inbound(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.inbound_id() == id)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::GetConfig => "get-config",
            Command::GetRfStatus => "get-rfstatus",
            Command::NotifyRfStatus => "notify-rfstatus",
            Command::Pair => "pair",
            Command::SetMode => "set-mode",
            Command::SetI2sMode => "set-i2s-mode",
            Command::SetConnectMode => "set-connect-mode",
            Command::SetRfChannel => "set-rfchannel",
            Command::SetRfPower => "set-rfpower",
        };
        f.write_str(name)
    }
}

/// Audio path the transceiver is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    I2s,
    Usb,
    #[default]
    Unknown,
}

impl Mode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Mode::I2s,
            0x01 => Mode::Usb,
            _ => Mode::Unknown,
        }
    }

    pub fn to_u8(self) -> Option<u8> {
        match self {
            Mode::I2s => Some(0x00),
            Mode::Usb => Some(0x01),
            Mode::Unknown => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::I2s => write!(f, "i2s"),
            Mode::Usb => write!(f, "usb"),
            Mode::Unknown => write!(f, "unknown"),
        }
    }
}

/// I2S clock role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum I2sMode {
    Master,
    Slave,
    #[default]
    Unknown,
}

impl I2sMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => I2sMode::Master,
            0x01 => I2sMode::Slave,
            _ => I2sMode::Unknown,
        }
    }

    pub fn to_u8(self) -> Option<u8> {
        match self {
            I2sMode::Master => Some(0x00),
            I2sMode::Slave => Some(0x01),
            I2sMode::Unknown => None,
        }
    }
}

impl fmt::Display for I2sMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2sMode::Master => write!(f, "master"),
            I2sMode::Slave => write!(f, "slave"),
            I2sMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Number of receivers the transmitter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    Multi,
    Single,
    #[default]
    Unknown,
}

impl ConnectMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ConnectMode::Multi,
            0x01 => ConnectMode::Single,
            _ => ConnectMode::Unknown,
        }
    }

    pub fn to_u8(self) -> Option<u8> {
        match self {
            ConnectMode::Multi => Some(0x00),
            ConnectMode::Single => Some(0x01),
            ConnectMode::Unknown => None,
        }
    }
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMode::Multi => write!(f, "multi"),
            ConnectMode::Single => write!(f, "single"),
            ConnectMode::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    ExitPairing,
    Failed,
    Success,
    Pairing,
}

impl PairStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => PairStatus::ExitPairing,
            1 => PairStatus::Failed,
            2 => PairStatus::Success,
            _ => PairStatus::Pairing,
        }
    }
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairStatus::ExitPairing => write!(f, "exit pairing"),
            PairStatus::Failed => write!(f, "pairing fail"),
            PairStatus::Success => write!(f, "pairing success"),
            PairStatus::Pairing => write!(f, "pairing"),
        }
    }
}

/// RF link status byte: bit 0 is the link, bits 1..=2 the pairing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfStatus {
    pub connected: bool,
    pub pair: PairStatus,
}

impl RfStatus {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            connected: byte & 0x1 != 0,
            pair: PairStatus::from_bits(byte >> 1),
        }
    }
}

/// Payload of a get-config reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigReport {
    pub firmware_version: u16,
    pub mcu_version: u8,
    pub mode: Mode,
    pub rf_channel: u8,
    pub rf_power: u8,
}

impl ConfigReport {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < CONFIG_REPORT_LEN {
            return None;
        }
        let mut cursor = Cursor::new(payload);
        Some(Self {
            firmware_version: cursor.read_u16::<BigEndian>().ok()?,
            mcu_version: cursor.read_u8().ok()?,
            mode: Mode::from_u8(cursor.read_u8().ok()?),
            rf_channel: cursor.read_u8().ok()?,
            rf_power: cursor.read_u8().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_ids() {
        assert_eq!(Command::from_inbound(0xD0), Some(Command::GetConfig));
        assert_eq!(Command::from_inbound(0x52), Some(Command::NotifyRfStatus));
        assert_eq!(Command::from_inbound(0xD8), Some(Command::SetRfPower));
        // 0xD2 is our acknowledgement, the device never sends it.
        assert_eq!(Command::from_inbound(0xD2), None);
        assert_eq!(Command::from_inbound(0x50), None);
    }

    #[test]
    fn test_reply_id_sets_high_bit() {
        assert_eq!(Command::SetMode.reply_id(), 0xD4);
        assert_eq!(Command::NotifyRfStatus.reply_id(), 0xD2);
    }

    #[test]
    fn test_rf_status_bits() {
        let status = RfStatus::from_byte(0b101);
        assert!(status.connected);
        assert_eq!(status.pair, PairStatus::Success);

        let status = RfStatus::from_byte(0b110);
        assert!(!status.connected);
        assert_eq!(status.pair, PairStatus::Pairing);
    }

    #[test]
    fn test_config_report_parse() {
        let report = ConfigReport::parse(&[0x12, 0x34, 0x07, 0x01, 0x03, 0x0A]).unwrap();
        assert_eq!(report.firmware_version, 0x1234);
        assert_eq!(report.mcu_version, 0x07);
        assert_eq!(report.mode, Mode::Usb);
        assert_eq!(report.rf_channel, 3);
        assert_eq!(report.rf_power, 10);

        assert!(ConfigReport::parse(&[0x12, 0x34, 0x07]).is_none());
    }

    #[test]
    fn test_mode_bytes() {
        assert_eq!(Mode::from_u8(0x01), Mode::Usb);
        assert_eq!(Mode::from_u8(0x7F), Mode::Unknown);
        assert_eq!(Mode::Unknown.to_u8(), None);
        assert_eq!(I2sMode::Slave.to_u8(), Some(0x01));
        assert_eq!(ConnectMode::from_u8(0x00), ConnectMode::Multi);
    }
}
