//! Event system for client decoupling.
//!
//! Observers register with a device and receive every decoded reply,
//! notification and transport change they declared interest in, together
//! with the device status as it stands after the update.

use std::fmt;

use crate::protocol::{ConfigReport, ConnectMode, I2sMode, Mode, RfStatus};
use crate::state::DeviceStatus;
use crate::transport::TransportKind;

/// Events emitted by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Reply to get-config.
    Config(ConfigReport),
    /// Reply to get-rfstatus.
    RfStatus(RfStatus),
    /// Unsolicited RF status change; acknowledged automatically.
    RfStatusNotify(RfStatus),
    /// Pair request accepted.
    Paired,
    ModeSet(Mode),
    I2sModeSet(I2sMode),
    ConnectModeSet(ConnectMode),
    RfChannelSet(u8),
    RfPowerSet(u8),
    /// Version register read back over HID.
    FirmwareVersion(u16),
    TransportAttached(TransportKind),
    TransportDetached(TransportKind),
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::Config(_) => EventKind::GetConfig,
            DeviceEvent::RfStatus(_) => EventKind::GetRfStatus,
            DeviceEvent::RfStatusNotify(_) => EventKind::NotifyRfStatus,
            DeviceEvent::Paired => EventKind::Pair,
            DeviceEvent::ModeSet(_) => EventKind::SetMode,
            DeviceEvent::I2sModeSet(_) => EventKind::SetI2sMode,
            DeviceEvent::ConnectModeSet(_) => EventKind::SetConnectMode,
            DeviceEvent::RfChannelSet(_) => EventKind::SetRfChannel,
            DeviceEvent::RfPowerSet(_) => EventKind::SetRfPower,
            DeviceEvent::FirmwareVersion(_) => EventKind::FirmwareVersion,
            DeviceEvent::TransportAttached(_) | DeviceEvent::TransportDetached(_) => {
                EventKind::Transport
            }
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Config(c) => write!(
                f,
                "config: firmware 0x{:04X}, mcu 0x{:02X}, mode {}, channel {}, power {}",
                c.firmware_version, c.mcu_version, c.mode, c.rf_channel, c.rf_power
            ),
            DeviceEvent::RfStatus(s) | DeviceEvent::RfStatusNotify(s) => write!(
                f,
                "rf {}, {}",
                if s.connected { "connected" } else { "disconnected" },
                s.pair
            ),
            DeviceEvent::Paired => write!(f, "pair request accepted"),
            DeviceEvent::ModeSet(m) => write!(f, "mode {m}"),
            DeviceEvent::I2sModeSet(m) => write!(f, "i2s mode {m}"),
            DeviceEvent::ConnectModeSet(m) => write!(f, "connect mode {m}"),
            DeviceEvent::RfChannelSet(c) => write!(f, "rf channel {c}"),
            DeviceEvent::RfPowerSet(p) => write!(f, "rf power {p}"),
            DeviceEvent::FirmwareVersion(v) => write!(f, "firmware version 0x{v:04X}"),
            DeviceEvent::TransportAttached(k) => write!(f, "{k} attached"),
            DeviceEvent::TransportDetached(k) => write!(f, "{k} detached"),
        }
    }
}

/// Observer capability, one per event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    GetConfig,
    GetRfStatus,
    NotifyRfStatus,
    Pair,
    SetMode,
    SetI2sMode,
    SetConnectMode,
    SetRfChannel,
    SetRfPower,
    FirmwareVersion,
    Transport,
}

impl EventKind {
    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of event kinds an observer wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u16);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);
    pub const ALL: EventMask = EventMask((1 << (EventKind::Transport as u16 + 1)) - 1);

    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        EventMask(bits)
    }

    pub const fn with(self, kind: EventKind) -> Self {
        EventMask(self.0 | kind.bit())
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Observer trait for receiving device events.
///
/// Callbacks run on the thread driving the device, after the status has
/// been updated. They must not block.
pub trait DeviceObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "observer"
    }

    /// Event kinds this observer handles. An empty mask is rejected at
    /// registration.
    fn interests(&self) -> EventMask {
        EventMask::ALL
    }

    fn on_event(&self, status: &DeviceStatus, event: &DeviceEvent);
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DeviceObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, status: &DeviceStatus, event: &DeviceEvent) {
        let device = status.ident.as_str();
        match event {
            DeviceEvent::Config(c) => {
                tracing::info!(
                    device,
                    firmware = %format!("0x{:04X}", c.firmware_version),
                    mcu = %format!("0x{:02X}", c.mcu_version),
                    mode = %c.mode,
                    channel = c.rf_channel,
                    power = c.rf_power,
                    "Config"
                );
            }
            DeviceEvent::RfStatus(s) => {
                tracing::info!(device, connected = s.connected, pair = %s.pair, "RF status");
            }
            DeviceEvent::RfStatusNotify(s) => {
                tracing::info!(
                    device,
                    connected = s.connected,
                    pair = %s.pair,
                    "RF status changed"
                );
            }
            DeviceEvent::Paired => tracing::info!(device, "Pairing started"),
            DeviceEvent::ModeSet(m) => tracing::info!(device, mode = %m, "Mode set"),
            DeviceEvent::I2sModeSet(m) => tracing::info!(device, i2s_mode = %m, "I2S mode set"),
            DeviceEvent::ConnectModeSet(m) => {
                tracing::info!(device, connect_mode = %m, "Connect mode set")
            }
            DeviceEvent::RfChannelSet(c) => tracing::info!(device, channel = c, "RF channel set"),
            DeviceEvent::RfPowerSet(p) => tracing::info!(device, power = p, "RF power set"),
            DeviceEvent::FirmwareVersion(v) => {
                tracing::info!(device, version = %format!("0x{v:04X}"), "Firmware version")
            }
            DeviceEvent::TransportAttached(k) => {
                tracing::info!(device, transport = %k, "Transport attached")
            }
            DeviceEvent::TransportDetached(k) => {
                tracing::warn!(device, transport = %k, "Transport detached")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PairStatus;

    #[test]
    fn test_mask_membership() {
        let mask = EventMask::of(&[EventKind::SetMode, EventKind::NotifyRfStatus]);
        assert!(mask.contains(EventKind::SetMode));
        assert!(mask.contains(EventKind::NotifyRfStatus));
        assert!(!mask.contains(EventKind::GetConfig));
        assert!(!mask.is_empty());
        assert!(EventMask::EMPTY.is_empty());
        assert!(EventMask::EMPTY.with(EventKind::Pair).contains(EventKind::Pair));
    }

    #[test]
    fn test_all_covers_every_kind() {
        for kind in [
            EventKind::GetConfig,
            EventKind::GetRfStatus,
            EventKind::NotifyRfStatus,
            EventKind::Pair,
            EventKind::SetMode,
            EventKind::SetI2sMode,
            EventKind::SetConnectMode,
            EventKind::SetRfChannel,
            EventKind::SetRfPower,
            EventKind::FirmwareVersion,
            EventKind::Transport,
        ] {
            assert!(EventMask::ALL.contains(kind), "{kind:?}");
        }
    }

    #[test]
    fn test_event_display() {
        let status = RfStatus {
            connected: true,
            pair: PairStatus::Success,
        };
        assert_eq!(
            DeviceEvent::RfStatusNotify(status).to_string(),
            "rf connected, pairing success"
        );
        assert_eq!(DeviceEvent::FirmwareVersion(0x0102).to_string(), "firmware version 0x0102");
        assert_eq!(
            DeviceEvent::TransportDetached(TransportKind::UsbHid).kind(),
            EventKind::Transport
        );
    }
}
